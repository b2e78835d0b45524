//! Local audio sources and remote audio sinks.
//!
//! The realtime backend refuses a session without at least one audio track,
//! so even a text-only session attaches a local track fed by a source. A
//! track that should stay quiet is not removed; its frames are replaced with
//! Opus silence.

use crate::ConnectionError;
use async_trait::async_trait;
use bytes::Bytes;
use std::{fs::File, path::Path, sync::Mutex, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::media::io::{Writer, ogg_writer::OggWriter};
use webrtc::rtp::packet::Packet;

/// Duration of one encoded Opus frame.
pub const OPUS_FRAME_DURATION: Duration = Duration::from_millis(20);

/// A single 20ms Opus frame that decodes to silence.
pub const OPUS_SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

pub(crate) const OPUS_SAMPLE_RATE: u32 = 48_000;
const OPUS_CHANNELS: u8 = 2;

/// A stream of encoded Opus frames captured locally.
pub struct LocalAudio {
    pub frames: mpsc::Receiver<Bytes>,
    pub frame_duration: Duration,
}

/// Where the local audio track gets its frames from.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Checks that an input device is present and usable.
    async fn check_device(&self) -> Result<(), ConnectionError>;

    /// Starts capturing. Capture stops once the returned receiver is dropped.
    async fn acquire(&self) -> Result<LocalAudio, ConnectionError>;
}

/// A source producing Opus silence at the normal frame cadence. Used when the
/// assistant only listens and speaks back, with no microphone attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilenceSource;

#[async_trait]
impl AudioSource for SilenceSource {
    async fn check_device(&self) -> Result<(), ConnectionError> {
        Ok(())
    }

    async fn acquire(&self) -> Result<LocalAudio, ConnectionError> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(OPUS_FRAME_DURATION);
            loop {
                ticker.tick().await;
                if tx
                    .send(Bytes::from_static(&OPUS_SILENCE_FRAME))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            debug!("Silence source stopped.");
        });
        Ok(LocalAudio {
            frames: rx,
            frame_duration: OPUS_FRAME_DURATION,
        })
    }
}

/// Receives the backend's audio as RTP packets.
pub trait AudioSink: Send + Sync {
    fn write_packet(&self, packet: &Packet);

    fn close(&self) {}
}

/// Discards remote audio.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn write_packet(&self, _packet: &Packet) {}
}

/// Records remote audio into an Ogg/Opus file.
pub struct OggSink {
    writer: Mutex<Option<OggWriter<File>>>,
}

impl OggSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ConnectionError> {
        let file = File::create(path.as_ref())
            .map_err(|e| ConnectionError::Transport(format!("cannot create recording: {e}")))?;
        let writer = OggWriter::new(file, OPUS_SAMPLE_RATE, OPUS_CHANNELS)
            .map_err(|e| ConnectionError::Transport(format!("cannot start recording: {e}")))?;
        Ok(Self {
            writer: Mutex::new(Some(writer)),
        })
    }
}

impl AudioSink for OggSink {
    fn write_packet(&self, packet: &Packet) {
        let mut guard = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(writer) = guard.as_mut() {
            if let Err(e) = writer.write_rtp(packet) {
                warn!(error = %e, "Failed to record remote audio packet.");
            }
        }
    }

    fn close(&self) {
        let mut guard = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(mut writer) = guard.take() {
            if let Err(e) = writer.close() {
                warn!(error = %e, "Failed to finalize audio recording.");
            }
        }
    }
}
