//! Realtime transport for the shopping assistant.
//!
//! Opens a WebRTC peer connection to the realtime backend: one local audio
//! track (always attached, optionally silenced), one ordered data channel for
//! JSON protocol events, and an HTTP offer/answer exchange with the
//! negotiation endpoint. Callers program against the [`Connector`],
//! [`PeerLink`] and [`EventChannel`] traits so the session layer can be
//! exercised without a network.

pub mod audio;
pub mod connection;
pub mod error;
pub mod listeners;
pub mod microphone;
pub mod peer;
pub mod signaling;

pub use audio::{AudioSink, AudioSource, LocalAudio, NullSink, OggSink, SilenceSource};
pub use connection::{
    ChannelEvent, Connection, Connector, EventChannel, OpenRequest, PeerLink, cleanup,
};
pub use error::ConnectionError;
pub use listeners::{Listeners, Subscription};
pub use microphone::MicrophoneSource;
pub use peer::{RtcConnector, RtcSettings};
