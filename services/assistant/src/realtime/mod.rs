//! The assistant session: lifecycle, inbound event handling and the
//! conversation state both of them update.

pub mod controller;
pub mod error;
pub mod handler;
#[cfg(test)]
pub(crate) mod testing;

pub use controller::{
    ControllerSettings, MAX_ATTEMPTS_MESSAGE, SessionController, SessionDeps, SessionSnapshot,
    SessionStatus,
};
pub use error::SessionError;
pub use handler::{EventHandler, HandleOutcome, ToolCallRequest};

use shopper_core::{event_log::EventLog, transcript::Transcript};

/// Everything the UI reads about the running conversation.
#[derive(Debug, Default)]
pub struct Conversation {
    pub transcript: Transcript,
    pub events: EventLog,
}
