//! Shared application state handed to every handler.

use crate::{preferences::PreferenceStore, realtime::SessionController};
use shopper_core::storefront::{ChannelUi, ItemList};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub controller: SessionController,
    pub preferences: Arc<PreferenceStore>,
    pub ui: Arc<ChannelUi>,
    pub cart: Arc<dyn ItemList>,
    pub wishlist: Arc<dyn ItemList>,
}
