use crate::{item::Item, session::SessionConfig};
use serde::{Deserialize, Serialize};

/// Events sent from the client to the realtime backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: Item },
    #[serde(rename = "response.create")]
    ResponseCreate,
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        item_id: String,
        content_index: u32,
        audio_end_ms: u64,
    },
    #[serde(rename = "response.cancel")]
    ResponseCancel,
    /// Keepalive frame sent periodically while the channel is open.
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

impl ClientEvent {
    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate => "response.create",
            ClientEvent::ConversationItemTruncate { .. } => "conversation.item.truncate",
            ClientEvent::ResponseCancel => "response.cancel",
            ClientEvent::Heartbeat => "heartbeat",
        }
    }
}
