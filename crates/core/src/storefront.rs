//! Local storefront state the assistant mutates: cart, wishlist and the UI.

use crate::{UiCommand, catalog::Variant};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

/// One line of a cart or wishlist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListEntry {
    pub variant: Variant,
    pub quantity: u32,
}

/// A mutable list of variants, used for both the cart and the wishlist.
#[cfg_attr(test, mockall::automock)]
pub trait ItemList: Send + Sync {
    fn add(&self, variant: &Variant, quantity: u32) -> Result<()>;
    fn remove(&self, variant: &Variant) -> Result<()>;
    fn clear(&self) -> Result<()>;
    fn entries(&self) -> Vec<ListEntry>;
}

/// An in-process [`ItemList`].
#[derive(Debug, Default)]
pub struct MemoryList {
    entries: Mutex<Vec<ListEntry>>,
}

impl MemoryList {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ListEntry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl ItemList for MemoryList {
    fn add(&self, variant: &Variant, quantity: u32) -> Result<()> {
        let mut entries = self.lock();
        match entries
            .iter_mut()
            .find(|e| e.variant.variant_id == variant.variant_id)
        {
            Some(entry) => entry.quantity += quantity.max(1),
            None => entries.push(ListEntry {
                variant: variant.clone(),
                quantity: quantity.max(1),
            }),
        }
        Ok(())
    }

    fn remove(&self, variant: &Variant) -> Result<()> {
        self.lock()
            .retain(|e| e.variant.variant_id != variant.variant_id);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.lock().clear();
        Ok(())
    }

    fn entries(&self) -> Vec<ListEntry> {
        self.lock().clone()
    }
}

/// A page the storefront UI can show.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "page", rename_all = "snake_case")]
pub enum Route {
    Product {
        handle: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variant_id: Option<String>,
    },
    Cart,
    Wishlist,
    FittingRoom,
}

impl Route {
    /// The client-side path for this route.
    pub fn path(&self) -> String {
        match self {
            Route::Product {
                handle,
                variant_id: Some(variant),
            } => format!("/products/{handle}?variant={variant}"),
            Route::Product { handle, .. } => format!("/products/{handle}"),
            Route::Cart => "/cart".to_string(),
            Route::Wishlist => "/wishlist".to_string(),
            Route::FittingRoom => "/fitting-room".to_string(),
        }
    }
}

/// The storefront UI as seen by the assistant.
#[cfg_attr(test, mockall::automock)]
pub trait UiBridge: Send + Sync {
    fn navigate(&self, route: Route) -> Result<()>;

    /// Replaces the fitting-room display collection.
    fn stage_display(&self, variants: Vec<Variant>) -> Result<()>;
}

/// A [`UiBridge`] that records UI state and broadcasts every command to
/// attached UI clients.
pub struct ChannelUi {
    commands: broadcast::Sender<UiCommand>,
    location: Mutex<Option<Route>>,
    staged: Mutex<Vec<Variant>>,
}

impl ChannelUi {
    pub fn new(capacity: usize) -> Self {
        let (commands, _) = broadcast::channel(capacity.max(1));
        Self {
            commands,
            location: Mutex::new(None),
            staged: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiCommand> {
        self.commands.subscribe()
    }

    pub fn location(&self) -> Option<Route> {
        self.location
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn staged(&self) -> Vec<Variant> {
        self.staged.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn publish(&self, command: UiCommand) {
        if self.commands.send(command).is_err() {
            debug!("No UI client attached; command recorded only.");
        }
    }
}

impl UiBridge for ChannelUi {
    fn navigate(&self, route: Route) -> Result<()> {
        let path = route.path();
        *self.location.lock().unwrap_or_else(|p| p.into_inner()) = Some(route.clone());
        self.publish(UiCommand::Navigate { route, path });
        Ok(())
    }

    fn stage_display(&self, variants: Vec<Variant>) -> Result<()> {
        *self.staged.lock().unwrap_or_else(|p| p.into_inner()) = variants.clone();
        self.publish(UiCommand::StageDisplay { variants });
        Ok(())
    }
}
