//! Transcript Store
//!
//! An ordered, append-mostly log of conversation messages and diagnostic
//! breadcrumbs that drives the assistant UI. Items are keyed by id, mutated in
//! place as streamed events arrive, and never removed except by [`Transcript::reset`].

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shown while a spoken user turn is still being transcribed.
pub const TRANSCRIBING_PLACEHOLDER: &str = "[Transcribing...]";
/// Shown when a finished transcription came back empty.
pub const INAUDIBLE_PLACEHOLDER: &str = "[inaudible]";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    InProgress,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
    pub hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Breadcrumb {
    pub id: String,
    pub title: String,
    pub data: Option<Value>,
    pub expanded: bool,
    pub created_at: DateTime<Utc>,
    pub hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TranscriptItem {
    Message(Message),
    Breadcrumb(Breadcrumb),
}

impl TranscriptItem {
    pub fn id(&self) -> &str {
        match self {
            TranscriptItem::Message(m) => &m.id,
            TranscriptItem::Breadcrumb(b) => &b.id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            TranscriptItem::Message(m) => m.created_at,
            TranscriptItem::Breadcrumb(b) => b.created_at,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            TranscriptItem::Message(m) => Some(m),
            TranscriptItem::Breadcrumb(_) => None,
        }
    }
}

/// The conversation log.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    items: Vec<TranscriptItem>,
    breadcrumb_seq: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message. Returns `false` without touching the log when an
    /// item with `id` already exists.
    ///
    /// A `pending` message is a spoken turn awaiting its transcript and starts
    /// out with [`TRANSCRIBING_PLACEHOLDER`] as its text.
    pub fn add_message(&mut self, id: &str, role: Role, text: &str, pending: bool) -> bool {
        if self.contains(id) {
            return false;
        }
        let text = if pending {
            TRANSCRIBING_PLACEHOLDER.to_string()
        } else {
            text.to_string()
        };
        self.items.push(TranscriptItem::Message(Message {
            id: id.to_string(),
            role,
            text,
            status: ItemStatus::InProgress,
            created_at: self.next_timestamp(),
            hidden: false,
        }));
        true
    }

    /// Appends a breadcrumb and returns its generated id.
    pub fn add_breadcrumb(&mut self, title: impl Into<String>, data: Option<Value>) -> String {
        self.breadcrumb_seq += 1;
        let created_at = self.next_timestamp();
        let suffix: u32 = rand::rng().random();
        let id = format!(
            "breadcrumb-{}-{}-{:08x}",
            self.breadcrumb_seq,
            created_at.timestamp_millis(),
            suffix
        );
        self.items.push(TranscriptItem::Breadcrumb(Breadcrumb {
            id: id.clone(),
            title: title.into(),
            data,
            expanded: false,
            created_at,
            hidden: false,
        }));
        id
    }

    /// Appends `delta` to, or replaces, a message's text.
    ///
    /// Finished messages are immutable; updating one, or an unknown id,
    /// returns `false`.
    pub fn update_message(&mut self, id: &str, delta: &str, append: bool) -> bool {
        match self.message_mut(id) {
            Some(message) if message.status == ItemStatus::InProgress => {
                if append {
                    message.text.push_str(delta);
                } else {
                    message.text = delta.to_string();
                }
                true
            }
            _ => false,
        }
    }

    pub fn set_status(&mut self, id: &str, status: ItemStatus) -> bool {
        match self.message_mut(id) {
            Some(message) => {
                message.status = status;
                true
            }
            None => false,
        }
    }

    pub fn hide(&mut self, id: &str) -> bool {
        match self.items.iter_mut().find(|item| item.id() == id) {
            Some(TranscriptItem::Message(m)) => {
                m.hidden = true;
                true
            }
            Some(TranscriptItem::Breadcrumb(b)) => {
                b.hidden = true;
                true
            }
            None => false,
        }
    }

    /// Flips a breadcrumb's expanded state.
    pub fn toggle_expand(&mut self, id: &str) -> bool {
        match self.items.iter_mut().find(|item| item.id() == id) {
            Some(TranscriptItem::Breadcrumb(b)) => {
                b.expanded = !b.expanded;
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.items.clear();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id() == id)
    }

    pub fn get(&self, id: &str) -> Option<&TranscriptItem> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn items(&self) -> &[TranscriptItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The most recent assistant message still streaming, if any.
    pub fn streaming_assistant_message(&self) -> Option<&Message> {
        self.items.iter().rev().find_map(|item| match item {
            TranscriptItem::Message(m)
                if m.role == Role::Assistant && m.status == ItemStatus::InProgress =>
            {
                Some(m)
            }
            _ => None,
        })
    }

    fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.items.iter_mut().find_map(|item| match item {
            TranscriptItem::Message(m) if m.id == id => Some(m),
            _ => None,
        })
    }

    /// Wall-clock time, nudged forward so timestamps never decrease along the log.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.items.last() {
            Some(last) if last.created_at() > now => last.created_at(),
            _ => now,
        }
    }
}

/// Generates an item id in the backend's format (32 hex characters).
pub fn new_item_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
