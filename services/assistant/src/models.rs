//! Request and response bodies of the control surface.
//!
//! Transcript, event and storefront types come from `shopper-core`, which has
//! no OpenAPI dependency, so they are documented here as opaque objects.

use serde::{Deserialize, Serialize};
use shopper_core::{
    catalog::Variant, event_log::LoggedEvent, storefront::ListEntry, transcript::TranscriptItem,
};
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct SendMessagePayload {
    pub text: String,
}

/// Visible transcript items, oldest first.
#[derive(Serialize, ToSchema, Debug)]
pub struct TranscriptResponse {
    #[schema(value_type = Vec<Object>)]
    pub items: Vec<TranscriptItem>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct EventsResponse {
    #[schema(value_type = Vec<Object>)]
    pub events: Vec<LoggedEvent>,
}

/// Contents of the cart or the wishlist.
#[derive(Serialize, ToSchema, Debug)]
pub struct ListResponse {
    #[schema(value_type = Vec<Object>)]
    pub entries: Vec<ListEntry>,
}

/// Variants staged for the fitting room.
#[derive(Serialize, ToSchema, Debug)]
pub struct FittingRoomResponse {
    #[schema(value_type = Vec<Object>)]
    pub variants: Vec<Variant>,
}
