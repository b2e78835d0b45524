//! Microphone capture for the local audio track.
//!
//! The input stream lives on a dedicated thread for as long as the frames
//! receiver is held. Captured samples are mixed down to mono, resampled to
//! 48kHz when the device runs at another rate, and encoded into 20ms Opus
//! frames.

use crate::{
    AudioSource, ConnectionError, LocalAudio,
    audio::{OPUS_FRAME_DURATION, OPUS_SAMPLE_RATE},
};
use async_trait::async_trait;
use bytes::Bytes;
use cpal::{
    FromSample, Sample, SampleFormat, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::sync::mpsc::{RecvTimeoutError, SyncSender, sync_channel};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Samples in one 20ms mono frame at 48kHz.
const OPUS_FRAME_SAMPLES: usize = 960;

const MAX_OPUS_PACKET: usize = 4000;

/// Captures the system's input device.
#[derive(Debug, Default, Clone)]
pub struct MicrophoneSource {
    /// Input device to use; the host default when unset.
    device_name: Option<String>,
}

impl MicrophoneSource {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

#[async_trait]
impl AudioSource for MicrophoneSource {
    async fn check_device(&self) -> Result<(), ConnectionError> {
        let device_name = self.device_name.clone();
        tokio::task::spawn_blocking(move || {
            let device = find_input_device(device_name.as_deref())?;
            device.default_input_config().map_err(config_error)?;
            Ok(())
        })
        .await
        .map_err(|e| ConnectionError::Transport(format!("microphone lookup failed: {e}")))?
    }

    async fn acquire(&self) -> Result<LocalAudio, ConnectionError> {
        let (frames_tx, frames_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel();
        let device_name = self.device_name.clone();
        std::thread::Builder::new()
            .name("microphone".to_string())
            .spawn(move || run_capture(device_name, frames_tx, ready_tx))
            .map_err(|e| ConnectionError::Transport(format!("cannot start audio capture: {e}")))?;

        ready_rx.await.map_err(|_| {
            ConnectionError::Transport("audio capture stopped before starting".to_string())
        })??;
        Ok(LocalAudio {
            frames: frames_rx,
            frame_duration: OPUS_FRAME_DURATION,
        })
    }
}

fn run_capture(
    device_name: Option<String>,
    frames: mpsc::Sender<Bytes>,
    ready: oneshot::Sender<Result<(), ConnectionError>>,
) {
    let (samples_tx, samples_rx) = sync_channel::<Vec<f32>>(32);
    let started = open_stream(device_name.as_deref(), samples_tx).and_then(|(stream, rate)| {
        FrameEncoder::new(rate).map(|encoder| (stream, rate, encoder))
    });
    let (stream, sample_rate, mut encoder) = match started {
        Ok(started) => started,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }
    info!(sample_rate, "Microphone capture started.");

    'capture: loop {
        match samples_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(chunk) => {
                for frame in encoder.push(&chunk) {
                    if frames.blocking_send(frame).is_err() {
                        break 'capture;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) if frames.is_closed() => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    drop(stream);
    debug!("Microphone capture stopped.");
}

fn find_input_device(device_name: Option<&str>) -> Result<cpal::Device, ConnectionError> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(wanted) => host
            .input_devices()
            .map_err(|e| match e {
                cpal::DevicesError::BackendSpecific { err } => backend_error(&err.description),
            })?
            .find(|d| d.name().map(|name| name == wanted).unwrap_or(false)),
        None => host.default_input_device(),
    };
    device.ok_or(ConnectionError::DeviceNotFound)
}

fn open_stream(
    device_name: Option<&str>,
    samples: SyncSender<Vec<f32>>,
) -> Result<(cpal::Stream, u32), ConnectionError> {
    let device = find_input_device(device_name)?;
    let supported = device.default_input_config().map_err(config_error)?;
    let sample_rate = supported.sample_rate().0;
    let channels = usize::from(supported.channels());
    let config = supported.config();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, samples),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, samples),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, channels, samples),
        other => Err(ConnectionError::Transport(format!(
            "unsupported microphone sample format {other:?}"
        ))),
    }?;
    stream.play().map_err(|e| match e {
        cpal::PlayStreamError::DeviceNotAvailable => ConnectionError::DeviceBusy,
        cpal::PlayStreamError::BackendSpecific { err } => backend_error(&err.description),
    })?;
    Ok((stream, sample_rate))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    samples: SyncSender<Vec<f32>>,
) -> Result<cpal::Stream, ConnectionError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // A full queue means the encoder is behind; drop the chunk.
                let _ = samples.try_send(mix_to_mono(data, channels));
            },
            |err| warn!(error = %err, "Microphone stream error."),
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => ConnectionError::DeviceBusy,
            cpal::BuildStreamError::BackendSpecific { err } => backend_error(&err.description),
            other => ConnectionError::Transport(format!("cannot open the microphone: {other}")),
        })
}

fn config_error(err: cpal::DefaultStreamConfigError) -> ConnectionError {
    match err {
        cpal::DefaultStreamConfigError::DeviceNotAvailable
        | cpal::DefaultStreamConfigError::StreamTypeNotSupported => ConnectionError::DeviceNotFound,
        cpal::DefaultStreamConfigError::BackendSpecific { err } => backend_error(&err.description),
    }
}

/// Classifies a host audio error by its description. Hosts report denied
/// access and devices held by another process only as backend text.
pub(crate) fn backend_error(description: &str) -> ConnectionError {
    let lower = description.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not permitted")
    {
        ConnectionError::PermissionDenied
    } else if lower.contains("busy") || lower.contains("in use") {
        ConnectionError::DeviceBusy
    } else if lower.contains("no such device") || lower.contains("not found") {
        ConnectionError::DeviceNotFound
    } else {
        ConnectionError::Transport(format!("microphone error: {description}"))
    }
}

/// Averages interleaved frames into one channel.
pub(crate) fn mix_to_mono<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: Sample,
    f32: FromSample<T>,
{
    data.chunks(channels.max(1))
        .map(|frame| {
            frame.iter().map(|s| f32::from_sample(*s)).sum::<f32>() / frame.len() as f32
        })
        .collect()
}

/// Turns mono samples at the device rate into Opus frames.
pub(crate) struct FrameEncoder {
    resampler: Option<FastFixedIn<f32>>,
    /// Device-rate samples waiting for a full resampler chunk.
    pending: Vec<f32>,
    /// 48kHz samples waiting for a full frame.
    ready: Vec<f32>,
    encoder: opus::Encoder,
    packet: Vec<u8>,
}

impl FrameEncoder {
    pub(crate) fn new(input_rate: u32) -> Result<Self, ConnectionError> {
        let resampler = if input_rate == OPUS_SAMPLE_RATE {
            None
        } else {
            let resampler = FastFixedIn::<f32>::new(
                f64::from(OPUS_SAMPLE_RATE) / f64::from(input_rate),
                1.0,
                PolynomialDegree::Cubic,
                (input_rate / 50).max(1) as usize,
                1,
            )
            .map_err(|e| ConnectionError::Transport(format!("cannot resample audio: {e}")))?;
            Some(resampler)
        };
        let encoder = opus::Encoder::new(
            OPUS_SAMPLE_RATE,
            opus::Channels::Mono,
            opus::Application::Voip,
        )
        .map_err(|e| ConnectionError::Transport(format!("cannot start the Opus encoder: {e}")))?;
        Ok(Self {
            resampler,
            pending: Vec::new(),
            ready: Vec::new(),
            encoder,
            packet: vec![0; MAX_OPUS_PACKET],
        })
    }

    /// Feeds captured samples and returns every frame completed by them.
    pub(crate) fn push(&mut self, mono: &[f32]) -> Vec<Bytes> {
        match self.resampler.as_mut() {
            None => self.ready.extend_from_slice(mono),
            Some(resampler) => {
                self.pending.extend_from_slice(mono);
                while self.pending.len() >= resampler.input_frames_next() {
                    let chunk: Vec<f32> = self
                        .pending
                        .drain(..resampler.input_frames_next())
                        .collect();
                    match resampler.process(&[chunk], None) {
                        Ok(mut out) => self.ready.append(&mut out[0]),
                        Err(e) => warn!(error = %e, "Dropped microphone chunk."),
                    }
                }
            }
        }

        let mut frames = Vec::new();
        while self.ready.len() >= OPUS_FRAME_SAMPLES {
            let frame: Vec<f32> = self.ready.drain(..OPUS_FRAME_SAMPLES).collect();
            match self.encoder.encode_float(&frame, &mut self.packet) {
                Ok(len) => frames.push(Bytes::copy_from_slice(&self.packet[..len])),
                Err(e) => warn!(error = %e, "Failed to encode microphone frame."),
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_errors_map_to_device_failures() {
        assert_eq!(
            backend_error("snd_pcm_open: Permission denied"),
            ConnectionError::PermissionDenied
        );
        assert_eq!(
            backend_error("Device or resource busy"),
            ConnectionError::DeviceBusy
        );
        assert_eq!(
            backend_error("No such device"),
            ConnectionError::DeviceNotFound
        );
        assert!(matches!(
            backend_error("underrun"),
            ConnectionError::Transport(msg) if msg.contains("underrun")
        ));
    }

    #[test]
    fn test_device_errors_from_cpal() {
        assert_eq!(
            config_error(cpal::DefaultStreamConfigError::DeviceNotAvailable),
            ConnectionError::DeviceNotFound
        );
        assert!(!config_error(cpal::DefaultStreamConfigError::StreamTypeNotSupported).is_retryable());
    }

    #[test]
    fn test_mix_to_mono_averages_channels() {
        let stereo = [0.5f32, -0.5, 1.0, 0.0];
        assert_eq!(mix_to_mono(&stereo, 2), vec![0.0, 0.5]);

        let pcm = [i16::MAX, i16::MAX];
        let mono = mix_to_mono(&pcm, 1);
        assert!(mono.iter().all(|s| (*s - 1.0).abs() < 1e-3));
    }

    #[test]
    fn test_encoder_emits_a_frame_per_20ms_at_48khz() {
        let mut encoder = FrameEncoder::new(48_000).unwrap();
        assert!(encoder.push(&[0.0; 500]).is_empty());
        let frames = encoder.push(&[0.0; 1420]);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| !f.is_empty()));
    }

    #[test]
    fn test_encoder_resamples_other_rates() {
        let mut encoder = FrameEncoder::new(16_000).unwrap();
        let tone: Vec<f32> = (0..16_000)
            .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / 16_000.0).sin() * 0.2)
            .collect();
        let frames = encoder.push(&tone);
        // One second of input, less the resampler's start-up delay.
        assert!((45..=50).contains(&frames.len()), "got {} frames", frames.len());
    }
}
