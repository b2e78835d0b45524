//! Persisted assistant preferences.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use utoipa::ToSchema;

/// Connection preferences, stored under fixed keys so other clients of the
/// same store can read them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct Preferences {
    #[serde(rename = "assistantMicEnabled", default)]
    pub microphone_enabled: bool,
    #[serde(rename = "assistantSpeakerEnabled", default = "enabled")]
    pub speaker_enabled: bool,
    #[serde(rename = "assistantWidgetOpen", default)]
    pub widget_open: bool,
}

fn enabled() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            microphone_enabled: false,
            speaker_enabled: true,
            widget_open: false,
        }
    }
}

/// Partial update of [`Preferences`].
#[derive(Debug, Clone, Copy, Default, Deserialize, ToSchema)]
pub struct PreferencesPatch {
    #[serde(rename = "assistantMicEnabled")]
    pub microphone_enabled: Option<bool>,
    #[serde(rename = "assistantSpeakerEnabled")]
    pub speaker_enabled: Option<bool>,
    #[serde(rename = "assistantWidgetOpen")]
    pub widget_open: Option<bool>,
}

impl Preferences {
    pub fn apply(&mut self, patch: PreferencesPatch) {
        if let Some(v) = patch.microphone_enabled {
            self.microphone_enabled = v;
        }
        if let Some(v) = patch.speaker_enabled {
            self.speaker_enabled = v;
        }
        if let Some(v) = patch.widget_open {
            self.widget_open = v;
        }
    }
}

/// A JSON file holding [`Preferences`]. Every change is written through.
pub struct PreferenceStore {
    path: PathBuf,
    current: Mutex<Preferences>,
}

impl PreferenceStore {
    /// Loads the store at `path`. A missing or unreadable file yields the
    /// defaults.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match read(&path).await {
            Ok(Some(prefs)) => prefs,
            Ok(None) => {
                debug!(path = %path.display(), "No stored preferences; using defaults.");
                Preferences::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = ?e, "Ignoring unreadable preferences.");
                Preferences::default()
            }
        };
        Self {
            path,
            current: Mutex::new(current),
        }
    }

    pub async fn get(&self) -> Preferences {
        *self.current.lock().await
    }

    /// Applies `patch`, persists the result and returns it.
    pub async fn update(&self, patch: PreferencesPatch) -> Result<Preferences> {
        let mut current = self.current.lock().await;
        let mut next = *current;
        next.apply(patch);
        if next != *current {
            write(&self.path, &next).await?;
            *current = next;
        }
        Ok(next)
    }
}

async fn read(path: &Path) -> Result<Option<Preferences>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(
            serde_json::from_slice(&bytes).context("Preferences file is not valid JSON")?,
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context("Failed to read preferences"),
    }
}

async fn write(path: &Path, prefs: &Preferences) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create preferences directory")?;
    }
    let body = serde_json::to_vec_pretty(prefs)?;
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("Failed to write preferences to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::load(dir.path().join("prefs.json")).await;
        assert_eq!(store.get().await, Preferences::default());
    }

    #[tokio::test]
    async fn test_update_persists_under_fixed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");
        let store = PreferenceStore::load(&path).await;

        let prefs = store
            .update(PreferencesPatch {
                widget_open: Some(true),
                microphone_enabled: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(prefs.widget_open);

        let stored: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(
            stored,
            json!({
                "assistantMicEnabled": true,
                "assistantSpeakerEnabled": true,
                "assistantWidgetOpen": true
            })
        );

        let reloaded = PreferenceStore::load(&path).await;
        assert_eq!(reloaded.get().await, prefs);
    }

    #[tokio::test]
    async fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = PreferenceStore::load(&path).await;
        assert_eq!(store.get().await, Preferences::default());
    }
}
