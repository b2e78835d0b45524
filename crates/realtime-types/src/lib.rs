//! Wire types for the realtime assistant data channel.
//!
//! Every frame exchanged over the data channel is a JSON object tagged by a
//! `type` field. Outbound frames are modelled by [`ClientEvent`], inbound ones
//! by [`ServerEvent`]. Unknown inbound types deserialize to
//! [`ServerEvent::Other`] so a newer backend never breaks the client.

pub mod client;
pub mod item;
pub mod server;
pub mod session;

pub use client::ClientEvent;
pub use item::{ContentPart, Item, ItemRole, ItemType};
pub use server::{ErrorDetail, ResponseInfo, ServerEvent, SessionInfo};
pub use session::{
    AudioFormat, InputAudioTranscription, Modality, SessionConfig, ToolDefinition, TurnDetection,
};
