//! Transport-neutral handles for an open realtime connection.

use crate::{AudioSink, ConnectionError, Subscription};
use async_trait::async_trait;
use realtime_types::ClientEvent;
use secrecy::SecretString;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle and traffic notifications of the data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(String),
    Error(String),
    Closed,
}

/// The ordered message stream carrying JSON protocol events.
#[async_trait]
pub trait EventChannel: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), ConnectionError>;

    /// Registers a listener for channel events. Dropping or disposing the
    /// returned [`Subscription`] unregisters it.
    fn subscribe(&self) -> (Subscription, mpsc::UnboundedReceiver<ChannelEvent>);

    fn is_open(&self) -> bool;

    async fn close(&self);
}

/// The peer connection and the media attached to it.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Stops every local track and closes the connection. Repeated calls are no-ops.
    async fn close(&self);

    /// Enables or silences the local audio track without detaching it.
    fn set_microphone_enabled(&self, enabled: bool);

    /// Controls whether remote audio reaches the sink.
    fn set_speaker_muted(&self, muted: bool);

    /// Number of local tracks that have not been stopped.
    fn live_tracks(&self) -> usize;
}

/// Parameters for opening a connection.
pub struct OpenRequest {
    /// Short-lived credential presented to the negotiation endpoint.
    pub credential: SecretString,
    pub sink: Arc<dyn AudioSink>,
    pub microphone_enabled: bool,
    pub speaker_muted: bool,
    pub skip_device_check: bool,
}

/// Opens connections to the realtime backend.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, request: OpenRequest) -> Result<Connection, ConnectionError>;
}

/// An established connection: the peer plus its event channel.
#[derive(Clone)]
pub struct Connection {
    pub peer: Arc<dyn PeerLink>,
    pub channel: Arc<dyn EventChannel>,
}

impl Connection {
    /// Serializes and sends one protocol event.
    pub async fn send(&self, event: &ClientEvent) -> Result<(), ConnectionError> {
        let text = serde_json::to_string(event)
            .map_err(|e| ConnectionError::Channel(format!("cannot encode {}: {e}", event.kind())))?;
        self.channel.send_text(text).await
    }
}

/// Releases everything a connection holds. Safe to call repeatedly or with `None`.
pub async fn cleanup(connection: Option<&Connection>) {
    if let Some(connection) = connection {
        connection.channel.close().await;
        connection.peer.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Listeners;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakePeer {
        stopped: AtomicBool,
        closes: AtomicUsize,
    }

    #[async_trait]
    impl PeerLink for FakePeer {
        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.stopped.store(true, Ordering::SeqCst);
        }
        fn set_microphone_enabled(&self, _enabled: bool) {}
        fn set_speaker_muted(&self, _muted: bool) {}
        fn live_tracks(&self) -> usize {
            if self.stopped.load(Ordering::SeqCst) { 0 } else { 1 }
        }
    }

    #[derive(Default)]
    struct FakeChannel {
        listeners: Listeners<ChannelEvent>,
        sent: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventChannel for FakeChannel {
        async fn send_text(&self, text: String) -> Result<(), ConnectionError> {
            self.sent.lock().unwrap().push(text);
            Ok(())
        }
        fn subscribe(&self) -> (Subscription, mpsc::UnboundedReceiver<ChannelEvent>) {
            self.listeners.subscribe()
        }
        fn is_open(&self) -> bool {
            true
        }
        async fn close(&self) {
            self.listeners.emit(ChannelEvent::Closed);
        }
    }

    #[tokio::test]
    async fn test_cleanup_twice_and_with_none() {
        let peer = Arc::new(FakePeer::default());
        let connection = Connection {
            peer: peer.clone(),
            channel: Arc::new(FakeChannel::default()),
        };
        assert_eq!(connection.peer.live_tracks(), 1);

        cleanup(Some(&connection)).await;
        cleanup(Some(&connection)).await;
        cleanup(None).await;

        assert_eq!(connection.peer.live_tracks(), 0);
        assert_eq!(peer.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_send_serializes_event() {
        let channel = Arc::new(FakeChannel::default());
        let connection = Connection {
            peer: Arc::new(FakePeer::default()),
            channel: channel.clone(),
        };
        connection.send(&ClientEvent::ResponseCreate).await.unwrap();
        assert_eq!(
            channel.sent.lock().unwrap().as_slice(),
            [r#"{"type":"response.create"}"#.to_string()]
        );
    }
}
