//! WebRTC implementation of the realtime transport.

use crate::{
    AudioSource, ChannelEvent, Connection, ConnectionError, Connector, EventChannel, Listeners,
    LocalAudio, OpenRequest, PeerLink, Subscription, audio::OPUS_SILENCE_FRAME,
    signaling::exchange_sdp,
};
use async_trait::async_trait;
use bytes::Bytes;
use realtime_types::ClientEvent;
use std::sync::{
    Arc, Mutex, Weak,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use webrtc::{
    api::{
        API, APIBuilder, interceptor_registry::register_default_interceptors,
        media_engine::{MIME_TYPE_OPUS, MediaEngine},
    },
    data_channel::{
        RTCDataChannel, data_channel_init::RTCDataChannelInit,
        data_channel_message::DataChannelMessage, data_channel_state::RTCDataChannelState,
    },
    ice_transport::{
        ice_candidate::RTCIceCandidate, ice_connection_state::RTCIceConnectionState,
        ice_gatherer_state::RTCIceGathererState, ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    media::Sample,
    peer_connection::{
        RTCPeerConnection, configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription,
    },
    rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType},
    track::track_local::{TrackLocal, track_local_static_sample::TrackLocalStaticSample},
};

/// Label of the data channel carrying protocol events.
pub const CHANNEL_LABEL: &str = "oai-events";

/// Retransmission bound for the reliable-ordered data channel.
pub const MAX_RETRANSMITS: u16 = 3;

/// Settings for [`RtcConnector`].
#[derive(Debug, Clone)]
pub struct RtcSettings {
    /// SDP negotiation endpoint.
    pub realtime_url: String,
    pub model: String,
    pub stun_servers: Vec<String>,
    pub signaling_timeout: Duration,
    pub ice_gather_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for RtcSettings {
    fn default() -> Self {
        Self {
            realtime_url: "https://api.openai.com/v1/realtime".to_string(),
            model: "gpt-4o-realtime-preview-2024-12-17".to_string(),
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
                "stun:stun2.l.google.com:19302".to_string(),
            ],
            signaling_timeout: Duration::from_secs(10),
            ice_gather_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Opens WebRTC connections to the realtime backend.
pub struct RtcConnector {
    settings: RtcSettings,
    source: Arc<dyn AudioSource>,
    http: reqwest::Client,
}

impl RtcConnector {
    pub fn new(settings: RtcSettings, source: Arc<dyn AudioSource>) -> Self {
        Self {
            settings,
            source,
            http: reqwest::Client::new(),
        }
    }

    fn build_api() -> Result<API, ConnectionError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;
        Ok(APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build())
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.settings.stun_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.settings.stun_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }

    async fn negotiate(
        &self,
        pc: &Arc<RTCPeerConnection>,
        link: &Arc<RtcPeerLink>,
        local: LocalAudio,
        request: &OpenRequest,
    ) -> Result<Arc<RtcEventChannel>, ConnectionError> {
        register_diagnostics(pc);

        let track = opus_track();
        let sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        link.attach_local_track(track, local, request.microphone_enabled);
        // RTCP must be drained for the interceptors to make progress.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        let sink = request.sink.clone();
        let speaker_muted = link.speaker_muted.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let sink = sink.clone();
            let speaker_muted = speaker_muted.clone();
            Box::pin(async move {
                if track.kind() != RTPCodecType::Audio {
                    return;
                }
                info!(ssrc = track.ssrc(), "Remote audio track attached.");
                tokio::spawn(async move {
                    while let Ok((packet, _)) = track.read_rtp().await {
                        if !speaker_muted.load(Ordering::Relaxed) {
                            sink.write_packet(&packet);
                        }
                    }
                    sink.close();
                    debug!("Remote audio track ended.");
                });
            })
        }));

        let data_channel = pc
            .create_data_channel(
                CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    max_retransmits: Some(MAX_RETRANSMITS),
                    ..Default::default()
                }),
            )
            .await?;
        let channel = RtcEventChannel::wire(data_channel, self.settings.heartbeat_interval);

        let offer = pc.create_offer(None).await?;
        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await?;
        if tokio::time::timeout(self.settings.ice_gather_timeout, gathered.recv())
            .await
            .is_err()
        {
            warn!(
                timeout = ?self.settings.ice_gather_timeout,
                "ICE gathering incomplete; continuing with the candidates found so far."
            );
        }
        let local_description = pc.local_description().await.ok_or_else(|| {
            ConnectionError::Transport("local description missing after offer".to_string())
        })?;

        let answer_sdp = exchange_sdp(
            &self.http,
            &self.settings.realtime_url,
            &self.settings.model,
            &request.credential,
            local_description.sdp,
            self.settings.signaling_timeout,
        )
        .await?;
        pc.set_remote_description(RTCSessionDescription::answer(answer_sdp)?)
            .await?;

        Ok(channel)
    }
}

#[async_trait]
impl Connector for RtcConnector {
    #[instrument(name = "rtc_open", skip_all)]
    async fn open(&self, request: OpenRequest) -> Result<Connection, ConnectionError> {
        if !request.skip_device_check {
            self.source.check_device().await?;
        }
        let local = self.source.acquire().await?;

        let api = Self::build_api()?;
        let pc = Arc::new(api.new_peer_connection(self.rtc_configuration()).await?);
        let link = Arc::new(RtcPeerLink::new(pc.clone(), request.speaker_muted));
        let guard = CloseOnDrop(Some(link.clone()));

        match self.negotiate(&pc, &link, local, &request).await {
            Ok(channel) => {
                guard.disarm();
                info!("Peer connection negotiated.");
                Ok(Connection {
                    peer: link,
                    channel,
                })
            }
            Err(e) => {
                guard.disarm();
                warn!(error = %e, "Negotiation failed; releasing media.");
                link.close().await;
                Err(e)
            }
        }
    }
}

fn opus_track() -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48_000,
            channels: 2,
            ..Default::default()
        },
        "audio".to_owned(),
        "shopper-assistant".to_owned(),
    ))
}

/// The frame actually sent: captured audio while the microphone is enabled,
/// silence otherwise.
fn gate_frame(frame: Bytes, enabled: bool) -> Bytes {
    if enabled {
        frame
    } else {
        Bytes::from_static(&OPUS_SILENCE_FRAME)
    }
}

fn register_diagnostics(pc: &RTCPeerConnection) {
    pc.on_peer_connection_state_change(Box::new(|state: RTCPeerConnectionState| {
        if state == RTCPeerConnectionState::Failed {
            warn!(?state, "Peer connection failed.");
        } else {
            debug!(?state, "Peer connection state changed.");
        }
        Box::pin(async {})
    }));
    pc.on_ice_connection_state_change(Box::new(|state: RTCIceConnectionState| {
        debug!(?state, "ICE connection state changed.");
        Box::pin(async {})
    }));
    pc.on_ice_gathering_state_change(Box::new(|state: RTCIceGathererState| {
        debug!(?state, "ICE gathering state changed.");
        Box::pin(async {})
    }));
    pc.on_ice_candidate(Box::new(|candidate: Option<RTCIceCandidate>| {
        match candidate {
            Some(c) => debug!(address = %c.address, port = c.port, protocol = ?c.protocol, "Local ICE candidate."),
            None => debug!("ICE candidate gathering finished."),
        }
        Box::pin(async {})
    }));
}

/// Closes a half-built link if the opening future is dropped mid-flight,
/// e.g. when the caller's connect deadline fires.
struct CloseOnDrop(Option<Arc<RtcPeerLink>>);

impl CloseOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if let Some(link) = self.0.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { link.close().await });
            }
        }
    }
}

struct LocalTrack {
    enabled: Arc<AtomicBool>,
    stopped: AtomicBool,
    pump: JoinHandle<()>,
}

impl LocalTrack {
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.pump.abort();
    }
}

/// The WebRTC peer connection plus its local media.
pub struct RtcPeerLink {
    pc: Arc<RTCPeerConnection>,
    tracks: Mutex<Vec<LocalTrack>>,
    speaker_muted: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl RtcPeerLink {
    fn new(pc: Arc<RTCPeerConnection>, speaker_muted: bool) -> Self {
        Self {
            pc,
            tracks: Mutex::new(Vec::new()),
            speaker_muted: Arc::new(AtomicBool::new(speaker_muted)),
            closed: AtomicBool::new(false),
        }
    }

    fn attach_local_track(
        &self,
        track: Arc<TrackLocalStaticSample>,
        mut local: LocalAudio,
        enabled: bool,
    ) {
        let enabled = Arc::new(AtomicBool::new(enabled));
        let flag = enabled.clone();
        let pump = tokio::spawn(async move {
            while let Some(frame) = local.frames.recv().await {
                let sample = Sample {
                    data: gate_frame(frame, flag.load(Ordering::Relaxed)),
                    duration: local.frame_duration,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    debug!(error = %e, "Dropped local audio frame.");
                }
            }
        });
        self.lock_tracks().push(LocalTrack {
            enabled,
            stopped: AtomicBool::new(false),
            pump,
        });
    }

    fn lock_tracks(&self) -> std::sync::MutexGuard<'_, Vec<LocalTrack>> {
        self.tracks.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for track in self.lock_tracks().iter() {
            track.stop();
        }
        for sender in self.pc.get_senders().await {
            if let Err(e) = sender.stop().await {
                debug!(error = %e, "Sender already stopped.");
            }
        }
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "Error while closing peer connection.");
        }
        info!("Peer connection closed.");
    }

    fn set_microphone_enabled(&self, enabled: bool) {
        for track in self.lock_tracks().iter() {
            track.enabled.store(enabled, Ordering::Relaxed);
        }
    }

    fn set_speaker_muted(&self, muted: bool) {
        self.speaker_muted.store(muted, Ordering::Relaxed);
    }

    fn live_tracks(&self) -> usize {
        self.lock_tracks()
            .iter()
            .filter(|t| !t.stopped.load(Ordering::SeqCst))
            .count()
    }
}

/// The data channel, fanning its callbacks out to subscribers.
pub struct RtcEventChannel {
    dc: Arc<RTCDataChannel>,
    listeners: Listeners<ChannelEvent>,
    heartbeat: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RtcEventChannel {
    fn wire(dc: Arc<RTCDataChannel>, heartbeat_interval: Duration) -> Arc<Self> {
        let listeners = Listeners::new();
        let heartbeat: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::new(Mutex::new(None));

        let on_open = listeners.clone();
        let slot = heartbeat.clone();
        let weak_dc = Arc::downgrade(&dc);
        dc.on_open(Box::new(move || {
            let on_open = on_open.clone();
            let slot = slot.clone();
            let weak_dc = weak_dc.clone();
            Box::pin(async move {
                info!(label = CHANNEL_LABEL, "Data channel open.");
                let task = tokio::spawn(run_heartbeat(weak_dc, heartbeat_interval));
                if let Some(previous) = lock_slot(&slot).replace(task) {
                    previous.abort();
                }
                on_open.emit(ChannelEvent::Open);
            })
        }));

        let on_message = listeners.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let listeners = on_message.clone();
            Box::pin(async move {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => {
                        listeners.emit(ChannelEvent::Message(text));
                    }
                    Err(e) => warn!(error = %e, "Ignoring non UTF-8 data channel frame."),
                }
            })
        }));

        let on_close = listeners.clone();
        let slot = heartbeat.clone();
        dc.on_close(Box::new(move || {
            let listeners = on_close.clone();
            let slot = slot.clone();
            Box::pin(async move {
                info!(label = CHANNEL_LABEL, "Data channel closed.");
                if let Some(task) = lock_slot(&slot).take() {
                    task.abort();
                }
                listeners.emit(ChannelEvent::Closed);
            })
        }));

        let on_error = listeners.clone();
        dc.on_error(Box::new(move |err: webrtc::Error| {
            let listeners = on_error.clone();
            Box::pin(async move {
                warn!(error = %err, "Data channel error.");
                listeners.emit(ChannelEvent::Error(err.to_string()));
            })
        }));

        Arc::new(Self {
            dc,
            listeners,
            heartbeat,
        })
    }
}

fn lock_slot(
    slot: &Mutex<Option<JoinHandle<()>>>,
) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
    slot.lock().unwrap_or_else(|p| p.into_inner())
}

async fn run_heartbeat(dc: Weak<RTCDataChannel>, period: Duration) {
    let frame = match serde_json::to_string(&ClientEvent::Heartbeat) {
        Ok(frame) => frame,
        Err(_) => return,
    };
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(dc) = dc.upgrade() else { break };
        if let Err(e) = dc.send_text(frame.clone()).await {
            debug!(error = %e, "Heartbeat stopped.");
            break;
        }
    }
}

#[async_trait]
impl EventChannel for RtcEventChannel {
    async fn send_text(&self, text: String) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Channel(
                "data channel is not open".to_string(),
            ));
        }
        self.dc
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| ConnectionError::Channel(e.to_string()))
    }

    fn subscribe(&self) -> (Subscription, tokio::sync::mpsc::UnboundedReceiver<ChannelEvent>) {
        self.listeners.subscribe()
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn close(&self) {
        if let Some(task) = lock_slot(&self.heartbeat).take() {
            task.abort();
        }
        if let Err(e) = self.dc.close().await {
            debug!(error = %e, "Data channel already closed.");
        }
    }
}
