//! The session controller: one actor task owning the connection lifecycle.
//!
//! Callers talk to the actor through [`SessionController`]; every state change
//! is published as a [`SessionSnapshot`] on a watch channel. Connect attempts
//! run on their own tasks and report back tagged with a generation number, so
//! an attempt superseded by a disconnect or a newer attempt is discarded and
//! its connection released.

use super::{
    Conversation, SessionError,
    handler::{EventHandler, ToolCallRequest},
};
use crate::bootstrap::SessionBootstrap;
use chrono::Utc;
use realtime_rtc::{
    AudioSink, ChannelEvent, Connection, ConnectionError, Connector, OpenRequest, Subscription,
    cleanup,
};
use realtime_types::{ClientEvent, Item, SessionConfig, ToolDefinition};
use serde::Serialize;
use shopper_core::{
    event_log::Direction,
    tools::ToolRegistry,
    transcript::{ItemStatus, Role, new_item_id},
};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{Mutex, mpsc, oneshot, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{Instrument, debug, error, info, info_span, warn};
use utoipa::ToSchema;

/// Shown once automatic retries are exhausted.
pub const MAX_ATTEMPTS_MESSAGE: &str = "Maximum connection attempts reached. Please try again.";

#[derive(Debug, Clone, Copy, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Observable state of the assistant session.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    /// Backend-assigned id of the live session.
    pub session_id: Option<String>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub microphone_enabled: bool,
    pub speaker_muted: bool,
}

impl SessionSnapshot {
    fn new(microphone_enabled: bool, speaker_muted: bool) -> Self {
        Self {
            status: SessionStatus::Disconnected,
            session_id: None,
            retry_count: 0,
            last_error: None,
            microphone_enabled,
            speaker_muted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Budget for bootstrap, negotiation and channel opening together.
    pub connect_timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub voice: String,
    pub skip_device_check: bool,
    pub microphone_enabled: bool,
    pub speaker_muted: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            max_attempts: 3,
            retry_delay: Duration::from_millis(2000),
            voice: "alloy".to_string(),
            skip_device_check: false,
            microphone_enabled: false,
            speaker_muted: false,
        }
    }
}

/// Collaborators the controller drives.
pub struct SessionDeps {
    pub bootstrap: Arc<dyn SessionBootstrap>,
    pub connector: Arc<dyn Connector>,
    pub sink: Arc<dyn AudioSink>,
    pub tools: ToolRegistry,
}

type Reply = oneshot::Sender<Result<(), SessionError>>;

enum Command {
    Connect(Reply),
    Disconnect(Reply),
    Toggle(Reply),
    SendText(String, Reply),
    Interrupt(Reply),
    SetMicrophone(bool, Reply),
    SetSpeakerMuted(bool, Reply),
}

enum Internal {
    AttemptFinished {
        generation: u64,
        outcome: Result<Established, SessionError>,
    },
    RetryDue {
        generation: u64,
    },
    ToolAnswered {
        generation: u64,
        outbound: Vec<ClientEvent>,
    },
}

/// Handle to the session actor. Cheap to clone.
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    conversation: Arc<Mutex<Conversation>>,
}

impl SessionController {
    /// Spawns the actor on the current runtime.
    pub fn spawn(deps: SessionDeps, settings: ControllerSettings) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::new(
            settings.microphone_enabled,
            settings.speaker_muted,
        ));
        let conversation = Arc::new(Mutex::new(Conversation::default()));

        let actor = SessionActor {
            handler: EventHandler::new(deps.tools.clone()),
            deps: Arc::new(deps),
            settings,
            conversation: conversation.clone(),
            snapshot: snapshot_tx,
            generation: 0,
            terminal: false,
            retry_timer: None,
            live: None,
            internal_tx,
        };
        tokio::spawn(
            actor
                .run(commands_rx, internal_rx)
                .instrument(info_span!("assistant_session")),
        );

        Self {
            commands: commands_tx,
            snapshot: snapshot_rx,
            conversation,
        }
    }

    /// Starts connecting. A no-op while connecting or connected.
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.request(Command::Connect).await
    }

    /// Tears the session down. Safe to call in any state.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(Command::Disconnect).await
    }

    /// Connects when disconnected, disconnects otherwise.
    pub async fn toggle(&self) -> Result<(), SessionError> {
        self.request(Command::Toggle).await
    }

    /// Sends a typed user message and asks the backend to respond.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        self.request(|reply| Command::SendText(text, reply)).await
    }

    /// Cancels the response in progress, truncating its audio.
    pub async fn interrupt(&self) -> Result<(), SessionError> {
        self.request(Command::Interrupt).await
    }

    pub async fn set_microphone(&self, enabled: bool) -> Result<(), SessionError> {
        self.request(|reply| Command::SetMicrophone(enabled, reply))
            .await
    }

    pub async fn set_speaker_muted(&self, muted: bool) -> Result<(), SessionError> {
        self.request(|reply| Command::SetSpeakerMuted(muted, reply))
            .await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn conversation(&self) -> Arc<Mutex<Conversation>> {
        self.conversation.clone()
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SessionError::Stopped)?;
        response.await.map_err(|_| SessionError::Stopped)?
    }
}

/// Output of a successful connect attempt: a negotiated connection whose
/// channel is open.
struct Established {
    connection: Connection,
    subscription: Subscription,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    instructions: Option<String>,
    tools: Vec<ToolDefinition>,
}

struct LiveSession {
    connection: Connection,
    subscription: Subscription,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    instructions: Option<String>,
    tools: Vec<ToolDefinition>,
}

impl LiveSession {
    async fn close(self) {
        self.subscription.dispose();
        cleanup(Some(&self.connection)).await;
    }
}

enum Step {
    Command(Option<Command>),
    Internal(Internal),
    Channel(Option<ChannelEvent>),
}

struct SessionActor {
    deps: Arc<SessionDeps>,
    settings: ControllerSettings,
    handler: EventHandler,
    conversation: Arc<Mutex<Conversation>>,
    snapshot: watch::Sender<SessionSnapshot>,
    /// Incremented whenever in-flight attempts must be disregarded.
    generation: u64,
    /// Set after a failure that automatic retries will not recover from.
    terminal: bool,
    retry_timer: Option<JoinHandle<()>>,
    live: Option<LiveSession>,
    internal_tx: mpsc::UnboundedSender<Internal>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                Some(event) = internal.recv() => Step::Internal(event),
                event = next_channel_event(&mut self.live) => Step::Channel(event),
            };
            match step {
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Command(None) => break,
                Step::Internal(event) => self.handle_internal(event).await,
                Step::Channel(event) => self.handle_channel_event(event).await,
            }
        }
        info!("All controller handles dropped; shutting the session down.");
        self.disconnect().await;
    }

    fn status(&self) -> SessionStatus {
        self.snapshot.borrow().status
    }

    fn update(&self, change: impl FnOnce(&mut SessionSnapshot)) {
        self.snapshot.send_modify(change);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => {
                self.connect();
                let _ = reply.send(Ok(()));
            }
            Command::Disconnect(reply) => {
                self.disconnect().await;
                let _ = reply.send(Ok(()));
            }
            Command::Toggle(reply) => {
                if self.status() == SessionStatus::Disconnected {
                    self.connect();
                } else {
                    self.disconnect().await;
                }
                let _ = reply.send(Ok(()));
            }
            Command::SendText(text, reply) => {
                let _ = reply.send(self.send_text(&text).await);
            }
            Command::Interrupt(reply) => {
                let _ = reply.send(self.interrupt().await);
            }
            Command::SetMicrophone(enabled, reply) => {
                let _ = reply.send(self.set_microphone(enabled).await);
            }
            Command::SetSpeakerMuted(muted, reply) => {
                self.update(|s| s.speaker_muted = muted);
                if let Some(live) = &self.live {
                    live.connection.peer.set_speaker_muted(muted);
                }
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn connect(&mut self) {
        let status = self.status();
        if status != SessionStatus::Disconnected {
            debug!(?status, "Connect ignored.");
            return;
        }
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        if self.terminal {
            self.terminal = false;
            self.update(|s| s.retry_count = 0);
        }
        self.start_attempt();
    }

    fn start_attempt(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let (attempt, microphone_enabled, speaker_muted) = {
            let s = self.snapshot.borrow();
            (s.retry_count + 1, s.microphone_enabled, s.speaker_muted)
        };
        self.update(|s| {
            s.status = SessionStatus::Connecting;
            s.last_error = None;
        });
        info!(attempt, "Connecting to the realtime backend.");

        let deps = self.deps.clone();
        let timeout = self.settings.connect_timeout;
        let skip_device_check = self.settings.skip_device_check;
        let tx = self.internal_tx.clone();
        tokio::spawn(
            async move {
                let outcome = establish(
                    &deps,
                    timeout,
                    OpenOptions {
                        microphone_enabled,
                        speaker_muted,
                        skip_device_check,
                    },
                )
                .await;
                let _ = tx.send(Internal::AttemptFinished {
                    generation,
                    outcome,
                });
            }
            .instrument(info_span!("connect_attempt", attempt)),
        );
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::AttemptFinished {
                generation,
                outcome,
            } => {
                if generation != self.generation || self.status() != SessionStatus::Connecting {
                    if let Ok(stale) = outcome {
                        debug!(generation, "Releasing connection from a superseded attempt.");
                        stale.subscription.dispose();
                        cleanup(Some(&stale.connection)).await;
                    }
                    return;
                }
                match outcome {
                    Ok(established) => self.on_connected(established).await,
                    Err(e) => self.on_attempt_failed(e),
                }
            }
            Internal::RetryDue { generation } => {
                if generation == self.generation && self.status() == SessionStatus::Disconnected {
                    self.retry_timer = None;
                    self.start_attempt();
                }
            }
            Internal::ToolAnswered {
                generation,
                outbound,
            } => {
                if generation != self.generation || self.live.is_none() {
                    debug!(generation, "Dropping tool result for a closed session.");
                    return;
                }
                for event in outbound {
                    let _ = self.send(event).await;
                }
            }
        }
    }

    async fn on_connected(&mut self, established: Established) {
        for tool in &established.tools {
            if !self.deps.tools.supports(tool.name()) {
                warn!(tool = tool.name(), "Backend advertises a tool without a local handler.");
            }
        }
        let microphone_enabled = self.snapshot.borrow().microphone_enabled;
        established
            .connection
            .peer
            .set_microphone_enabled(microphone_enabled);

        self.live = Some(LiveSession {
            connection: established.connection,
            subscription: established.subscription,
            events: established.events,
            instructions: established.instructions,
            tools: established.tools,
        });
        self.terminal = false;
        // Configure the session before anyone observes it as connected.
        self.send_session_update().await;
        self.update(|s| {
            s.status = SessionStatus::Connected;
            s.retry_count = 0;
            s.last_error = None;
        });
        info!("Assistant connected.");
    }

    fn on_attempt_failed(&mut self, err: SessionError) {
        let retry_count = self.snapshot.borrow().retry_count + 1;
        let retryable = err.is_retryable();
        let will_retry = retryable && retry_count < self.settings.max_attempts;
        let message = if retryable && !will_retry {
            MAX_ATTEMPTS_MESSAGE.to_string()
        } else {
            err.to_string()
        };
        self.update(|s| {
            s.status = SessionStatus::Disconnected;
            s.session_id = None;
            s.retry_count = retry_count;
            s.last_error = Some(message);
        });

        if will_retry {
            warn!(error = %err, retry_count, delay = ?self.settings.retry_delay, "Connect attempt failed; retry scheduled.");
            let tx = self.internal_tx.clone();
            let generation = self.generation;
            let delay = self.settings.retry_delay;
            self.retry_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(Internal::RetryDue { generation });
            }));
        } else {
            self.terminal = true;
            error!(error = %err, retry_count, "Connect attempt failed; giving up.");
        }
    }

    async fn disconnect(&mut self) {
        self.generation += 1;
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        if let Some(live) = self.live.take() {
            live.close().await;
            info!("Assistant disconnected.");
        }
        self.terminal = false;
        self.update(|s| {
            s.status = SessionStatus::Disconnected;
            s.session_id = None;
            s.retry_count = 0;
            s.last_error = None;
        });
    }

    async fn handle_channel_event(&mut self, event: Option<ChannelEvent>) {
        match event {
            Some(ChannelEvent::Message(text)) => self.handle_message(&text).await,
            Some(ChannelEvent::Open) => debug!("Channel reported open."),
            Some(ChannelEvent::Error(reason)) => {
                self.on_channel_lost(ConnectionError::Channel(reason)).await
            }
            Some(ChannelEvent::Closed) | None => {
                self.on_channel_lost(ConnectionError::Channel("the channel closed".to_string()))
                    .await
            }
        }
    }

    async fn handle_message(&mut self, text: &str) {
        let session_id = self.snapshot.borrow().session_id.clone();
        let outcome = self
            .handler
            .handle(text, session_id.as_deref(), &self.conversation)
            .await;
        if let Some(id) = outcome.session_id {
            self.update(|s| {
                s.session_id = Some(id);
                s.status = SessionStatus::Connected;
            });
        }
        if let Some(call) = outcome.tool_call {
            self.spawn_tool_call(call);
        }
    }

    /// Runs a tool call on its own task so the session keeps serving
    /// commands. The answer is dropped if the session ended meanwhile.
    fn spawn_tool_call(&self, call: ToolCallRequest) {
        let handler = self.handler.clone();
        let conversation = self.conversation.clone();
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        let name = call.name.clone();
        tokio::spawn(
            async move {
                let outbound = handler.answer_tool_call(call, &conversation).await;
                let _ = tx.send(Internal::ToolAnswered {
                    generation,
                    outbound,
                });
            }
            .instrument(info_span!("tool_call", tool = %name)),
        );
    }

    async fn on_channel_lost(&mut self, reason: ConnectionError) {
        let Some(live) = self.live.take() else {
            return;
        };
        warn!(error = %reason, "Assistant channel lost.");
        live.close().await;
        self.generation += 1;
        self.update(|s| {
            s.status = SessionStatus::Disconnected;
            s.session_id = None;
            s.last_error = Some(reason.to_string());
        });
    }

    fn live_connected(&self) -> Result<&LiveSession, SessionError> {
        match &self.live {
            Some(live) if self.status() == SessionStatus::Connected => Ok(live),
            _ => Err(SessionError::NotConnected),
        }
    }

    async fn send(&self, event: ClientEvent) -> Result<(), SessionError> {
        let Some(live) = &self.live else {
            return Err(SessionError::NotConnected);
        };
        match serde_json::to_value(&event) {
            Ok(payload) => {
                self.conversation
                    .lock()
                    .await
                    .events
                    .record(Direction::Client, payload);
            }
            Err(e) => warn!(error = %e, "Could not log client event."),
        }
        live.connection.send(&event).await.map_err(|e| {
            warn!(event_type = event.kind(), error = %e, "Failed to send client event.");
            SessionError::from(e)
        })
    }

    async fn send_session_update(&self) {
        let Some(live) = &self.live else {
            return;
        };
        let microphone_enabled = self.snapshot.borrow().microphone_enabled;
        let session = SessionConfig::new(
            live.instructions.clone(),
            live.tools.clone(),
            self.settings.voice.clone(),
            microphone_enabled,
        );
        let _ = self.send(ClientEvent::SessionUpdate { session }).await;
    }

    async fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        self.live_connected()?;

        let id = new_item_id();
        {
            let mut conversation = self.conversation.lock().await;
            conversation
                .transcript
                .add_message(&id, Role::User, text, false);
            conversation.transcript.set_status(&id, ItemStatus::Done);
        }
        self.send(ClientEvent::ConversationItemCreate {
            item: Item::user_text(id, text),
        })
        .await?;
        self.send(ClientEvent::ResponseCreate).await
    }

    async fn interrupt(&mut self) -> Result<(), SessionError> {
        self.live_connected()?;
        self.send(ClientEvent::ResponseCancel).await?;

        let streaming = self
            .conversation
            .lock()
            .await
            .transcript
            .streaming_assistant_message()
            .map(|m| (m.id.clone(), m.created_at));
        if let Some((item_id, created_at)) = streaming {
            let audio_end_ms = (Utc::now() - created_at).num_milliseconds().max(0) as u64;
            self.send(ClientEvent::ConversationItemTruncate {
                item_id: item_id.clone(),
                content_index: 0,
                audio_end_ms,
            })
            .await?;
            self.conversation
                .lock()
                .await
                .transcript
                .set_status(&item_id, ItemStatus::Done);
        }
        Ok(())
    }

    async fn set_microphone(&mut self, enabled: bool) -> Result<(), SessionError> {
        self.update(|s| s.microphone_enabled = enabled);
        if let Some(live) = &self.live {
            live.connection.peer.set_microphone_enabled(enabled);
            if self.status() == SessionStatus::Connected {
                self.send_session_update().await;
            }
        }
        Ok(())
    }
}

async fn next_channel_event(live: &mut Option<LiveSession>) -> Option<ChannelEvent> {
    match live {
        Some(live) => live.events.recv().await,
        None => std::future::pending().await,
    }
}

struct OpenOptions {
    microphone_enabled: bool,
    speaker_muted: bool,
    skip_device_check: bool,
}

/// Bootstraps, negotiates and waits for the channel to open, all within
/// `timeout`.
async fn establish(
    deps: &SessionDeps,
    timeout: Duration,
    options: OpenOptions,
) -> Result<Established, SessionError> {
    let deadline = Instant::now() + timeout;

    let negotiate = async {
        let grant = deps.bootstrap.fetch().await?;
        let connection = deps
            .connector
            .open(OpenRequest {
                credential: grant.credential,
                sink: deps.sink.clone(),
                microphone_enabled: options.microphone_enabled,
                speaker_muted: options.speaker_muted,
                skip_device_check: options.skip_device_check,
            })
            .await?;
        Ok::<_, SessionError>((connection, grant.instructions, grant.tools))
    };
    let (connection, instructions, tools) = tokio::time::timeout_at(deadline, negotiate)
        .await
        .map_err(|_| SessionError::Timeout)??;

    let (subscription, mut events) = connection.channel.subscribe();
    if !connection.channel.is_open() {
        let opened = match tokio::time::timeout_at(deadline, wait_for_open(&mut events)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::timeout("opening the assistant channel").into()),
        };
        if let Err(e) = opened {
            subscription.dispose();
            cleanup(Some(&connection)).await;
            return Err(e);
        }
    }

    Ok(Established {
        connection,
        subscription,
        events,
        instructions,
        tools,
    })
}

async fn wait_for_open(
    events: &mut mpsc::UnboundedReceiver<ChannelEvent>,
) -> Result<(), SessionError> {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Open => return Ok(()),
            ChannelEvent::Error(reason) => return Err(ConnectionError::Channel(reason).into()),
            ChannelEvent::Closed => break,
            ChannelEvent::Message(_) => {}
        }
    }
    Err(ConnectionError::Channel("the channel closed before opening".to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bootstrap::BootstrapError,
        realtime::testing::{
            ScriptedBootstrap, ScriptedConnector, SlowWeatherCatalog, registry, registry_with,
        },
    };
    use realtime_rtc::{NullSink, PeerLink};
    use serde_json::json;
    use shopper_core::transcript::TranscriptItem;
    use std::sync::atomic::Ordering;

    struct Harness {
        controller: SessionController,
        bootstrap: Arc<ScriptedBootstrap>,
        connector: Arc<ScriptedConnector>,
    }

    fn start(bootstrap: ScriptedBootstrap, connector: ScriptedConnector) -> Harness {
        start_with_tools(bootstrap, connector, registry())
    }

    fn start_with_tools(
        bootstrap: ScriptedBootstrap,
        connector: ScriptedConnector,
        tools: ToolRegistry,
    ) -> Harness {
        let bootstrap = Arc::new(bootstrap);
        let connector = Arc::new(connector);
        let controller = SessionController::spawn(
            SessionDeps {
                bootstrap: bootstrap.clone(),
                connector: connector.clone(),
                sink: Arc::new(NullSink),
                tools,
            },
            ControllerSettings::default(),
        );
        Harness {
            controller,
            bootstrap,
            connector,
        }
    }

    async fn wait_for(
        controller: &SessionController,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut rx = controller.watch();
        let snapshot = tokio::time::timeout(Duration::from_secs(120), rx.wait_for(predicate))
            .await
            .expect("state not reached")
            .expect("controller stopped");
        snapshot.clone()
    }

    async fn until(mut condition: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never held");
    }

    async fn connected(harness: &Harness) {
        harness.controller.connect().await.unwrap();
        wait_for(&harness.controller, |s| s.status == SessionStatus::Connected).await;
    }

    fn event_count(controller: &SessionController) -> usize {
        controller
            .conversation()
            .try_lock()
            .map(|c| c.events.len())
            .unwrap_or(0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_configures_session() {
        let harness = start(ScriptedBootstrap::default(), ScriptedConnector::default());
        assert_eq!(harness.controller.snapshot().status, SessionStatus::Disconnected);

        harness.controller.connect().await.unwrap();
        assert_eq!(harness.controller.snapshot().status, SessionStatus::Connecting);
        connected(&harness).await;

        let (_, channel) = harness.connector.last();
        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], json!("session.update"));
        assert_eq!(sent[0]["session"]["instructions"], json!("Help the shopper."));
        assert_eq!(sent[0]["session"]["tools"][0]["name"], json!("add_to_cart"));

        let snapshot = harness.controller.snapshot();
        assert_eq!(snapshot.retry_count, 0);
        assert_eq!(snapshot.last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_connect_is_a_noop() {
        let connector = ScriptedConnector::deferred();
        let harness = start(ScriptedBootstrap::default(), connector);

        harness.controller.connect().await.unwrap();
        harness.controller.connect().await.unwrap();
        let connector = harness.connector.clone();
        until(|| connector.opens() == 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(harness.bootstrap.calls.load(Ordering::SeqCst), 1);
        assert_eq!(harness.connector.opens(), 1);
        assert_eq!(harness.controller.snapshot().status, SessionStatus::Connecting);

        harness.connector.last().1.emit(ChannelEvent::Open);
        wait_for(&harness.controller, |s| s.status == SessionStatus::Connected).await;
        harness.controller.connect().await.unwrap();
        assert_eq!(harness.bootstrap.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_failure_schedules_retry() {
        let connector = ScriptedConnector::deferred();
        let harness = start(
            ScriptedBootstrap::failing(1, BootstrapError::Status(500)),
            connector,
        );

        harness.controller.connect().await.unwrap();
        let failed = wait_for(&harness.controller, |s| s.retry_count == 1).await;
        assert_eq!(failed.status, SessionStatus::Disconnected);
        assert_eq!(
            failed.last_error.as_deref(),
            Some("Could not start an assistant session: Session bootstrap failed with status 500")
        );

        let failed_at = Instant::now();
        let retrying = wait_for(&harness.controller, |s| s.status == SessionStatus::Connecting).await;
        assert!(failed_at.elapsed() >= Duration::from_millis(2000));
        assert_eq!(retrying.retry_count, 1);
        assert_eq!(retrying.last_error, None);

        let connector = harness.connector.clone();
        until(|| connector.opens() == 1).await;
        harness.connector.last().1.emit(ChannelEvent::Open);
        let snapshot = wait_for(&harness.controller, |s| s.status == SessionStatus::Connected).await;
        assert_eq!(snapshot.retry_count, 0);
        assert_eq!(harness.bootstrap.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_are_terminal() {
        let harness = start(
            ScriptedBootstrap::failing(3, BootstrapError::Status(500)),
            ScriptedConnector::default(),
        );

        harness.controller.connect().await.unwrap();
        let snapshot = wait_for(&harness.controller, |s| s.retry_count == 3).await;
        assert_eq!(snapshot.status, SessionStatus::Disconnected);
        assert_eq!(snapshot.last_error.as_deref(), Some(MAX_ATTEMPTS_MESSAGE));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(harness.bootstrap.calls.load(Ordering::SeqCst), 3);
        assert_eq!(harness.controller.snapshot().status, SessionStatus::Disconnected);

        connected(&harness).await;
        assert_eq!(harness.controller.snapshot().retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_errors_are_not_retried() {
        let harness = start(
            ScriptedBootstrap::default(),
            ScriptedConnector::failing_with(ConnectionError::PermissionDenied),
        );

        harness.controller.connect().await.unwrap();
        let snapshot = wait_for(&harness.controller, |s| s.retry_count == 1).await;
        assert_eq!(
            snapshot.last_error,
            Some(ConnectionError::PermissionDenied.to_string())
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(harness.bootstrap.calls.load(Ordering::SeqCst), 1);
        assert_eq!(harness.controller.snapshot().status, SessionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_that_never_opens_times_out() {
        let connector = ScriptedConnector::deferred();
        let harness = start(ScriptedBootstrap::default(), connector);

        harness.controller.connect().await.unwrap();
        let snapshot = wait_for(&harness.controller, |s| s.retry_count == 1).await;
        let expected =
            SessionError::from(ConnectionError::timeout("opening the assistant channel"));
        assert_eq!(snapshot.last_error, Some(expected.to_string()));

        let (peer, _) = harness.connector.opened.lock().unwrap()[0].clone();
        assert_eq!(peer.live_tracks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_discards_attempt_in_flight() {
        let connector = ScriptedConnector::deferred();
        let harness = start(ScriptedBootstrap::default(), connector);

        harness.controller.connect().await.unwrap();
        let connector = harness.connector.clone();
        until(|| connector.opens() == 1).await;
        harness.controller.disconnect().await.unwrap();

        let (peer, channel) = harness.connector.last();
        channel.emit(ChannelEvent::Open);
        until(|| peer.closed.load(Ordering::SeqCst)).await;
        assert_eq!(harness.controller.snapshot().status, SessionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_text_creates_item_and_response() {
        let harness = start(ScriptedBootstrap::default(), ScriptedConnector::default());
        assert_eq!(
            harness.controller.send_text("hello").await,
            Err(SessionError::NotConnected)
        );
        connected(&harness).await;
        assert_eq!(
            harness.controller.send_text("   ").await,
            Err(SessionError::EmptyMessage)
        );

        harness.controller.send_text("  do you have linen shirts? ").await.unwrap();
        let (_, channel) = harness.connector.last();
        assert_eq!(
            channel.sent_types(),
            ["session.update", "conversation.item.create", "response.create"]
        );
        let create = &channel.sent()[1];
        let item_id = create["item"]["id"].as_str().unwrap().to_string();
        assert_eq!(item_id.len(), 32);
        assert_eq!(
            create["item"]["content"][0],
            json!({ "type": "input_text", "text": "do you have linen shirts?" })
        );

        // The backend echoes the item back.
        channel.emit(ChannelEvent::Message(
            json!({
                "type": "conversation.item.created",
                "item": create["item"].clone()
            })
            .to_string(),
        ));
        let controller = harness.controller.clone();
        until(|| event_count(&controller) == 4).await;

        let conversation = harness.controller.conversation();
        let conversation = conversation.lock().await;
        assert_eq!(conversation.transcript.len(), 1);
        let message = conversation
            .transcript
            .get(&item_id)
            .and_then(TranscriptItem::as_message)
            .unwrap();
        assert_eq!(message.role, Role::User);
        assert_eq!(message.status, ItemStatus::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_call_is_answered_with_session_id() {
        let harness = start(ScriptedBootstrap::default(), ScriptedConnector::default());
        connected(&harness).await;
        let (_, channel) = harness.connector.last();

        channel.emit(ChannelEvent::Message(
            json!({ "type": "session.created", "session": { "id": "sess_42" } }).to_string(),
        ));
        wait_for(&harness.controller, |s| s.session_id.as_deref() == Some("sess_42")).await;

        channel.emit(ChannelEvent::Message(
            json!({
                "type": "response.function_call_arguments.done",
                "call_id": "call_7",
                "name": "get_weather",
                "arguments": "{\"city\":\"Oslo\"}"
            })
            .to_string(),
        ));
        let sender = channel.clone();
        until(|| sender.sent().len() == 3).await;

        let sent = channel.sent();
        assert_eq!(sent[1]["type"], json!("conversation.item.create"));
        assert_eq!(sent[1]["item"]["type"], json!("function_call_output"));
        assert_eq!(sent[1]["item"]["call_id"], json!("call_7"));
        let output: serde_json::Value =
            serde_json::from_str(sent[1]["item"]["output"].as_str().unwrap()).unwrap();
        assert_eq!(output["success"], json!(true));
        assert_eq!(sent[2]["type"], json!("response.create"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tool_call_does_not_block_the_session() {
        let harness = start_with_tools(
            ScriptedBootstrap::default(),
            ScriptedConnector::default(),
            registry_with(Arc::new(SlowWeatherCatalog(Duration::from_secs(25)))),
        );
        connected(&harness).await;
        let (peer, channel) = harness.connector.last();

        channel.emit(ChannelEvent::Message(
            json!({
                "type": "response.function_call_arguments.done",
                "call_id": "call_slow",
                "name": "get_weather",
                "arguments": "{}"
            })
            .to_string(),
        ));
        let conversation = harness.controller.conversation();
        until(|| {
            conversation
                .try_lock()
                .map(|c| c.transcript.len() == 1)
                .unwrap_or(false)
        })
        .await;

        let started = Instant::now();
        tokio::time::timeout(Duration::from_secs(5), harness.controller.send_text("still there?"))
            .await
            .expect("send_text queued behind the tool call")
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), harness.controller.disconnect())
            .await
            .expect("disconnect queued behind the tool call")
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(peer.closed.load(Ordering::SeqCst));

        // The late answer belongs to a closed session and is dropped.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(
            channel.sent_types(),
            ["session.update", "conversation.item.create", "response.create"]
        );
        assert_eq!(harness.controller.snapshot().status, SessionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_error_forces_disconnect_without_retry() {
        let harness = start(ScriptedBootstrap::default(), ScriptedConnector::default());
        connected(&harness).await;
        let (peer, channel) = harness.connector.last();

        channel.emit(ChannelEvent::Error("ice failed".into()));
        let snapshot =
            wait_for(&harness.controller, |s| s.status == SessionStatus::Disconnected).await;
        assert_eq!(
            snapshot.last_error,
            Some(ConnectionError::Channel("ice failed".into()).to_string())
        );
        assert!(peer.closed.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(harness.connector.opens(), 1);
        assert_eq!(harness.controller.snapshot().status, SessionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let harness = start(ScriptedBootstrap::default(), ScriptedConnector::default());
        harness.controller.disconnect().await.unwrap();
        connected(&harness).await;
        harness.controller.send_text("hi").await.unwrap();

        harness.controller.disconnect().await.unwrap();
        harness.controller.disconnect().await.unwrap();

        let (peer, _) = harness.connector.last();
        assert_eq!(peer.live_tracks(), 0);
        let snapshot = harness.controller.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Disconnected);
        assert_eq!(snapshot.session_id, None);
        assert_eq!(
            harness.controller.conversation().lock().await.transcript.len(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_flips_between_states() {
        let harness = start(ScriptedBootstrap::default(), ScriptedConnector::default());
        harness.controller.toggle().await.unwrap();
        wait_for(&harness.controller, |s| s.status == SessionStatus::Connected).await;
        harness.controller.toggle().await.unwrap();
        assert_eq!(harness.controller.snapshot().status, SessionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_truncates_streaming_message() {
        let harness = start(ScriptedBootstrap::default(), ScriptedConnector::default());
        assert_eq!(
            harness.controller.interrupt().await,
            Err(SessionError::NotConnected)
        );
        connected(&harness).await;
        let (_, channel) = harness.connector.last();

        channel.emit(ChannelEvent::Message(
            json!({ "type": "response.audio_transcript.delta", "item_id": "item_r", "delta": "Our linen" })
                .to_string(),
        ));
        let controller = harness.controller.clone();
        until(|| event_count(&controller) == 2).await;

        harness.controller.interrupt().await.unwrap();
        let sent = channel.sent();
        assert_eq!(
            channel.sent_types(),
            ["session.update", "response.cancel", "conversation.item.truncate"]
        );
        assert_eq!(sent[2]["item_id"], json!("item_r"));
        assert_eq!(sent[2]["content_index"], json!(0));

        let conversation = harness.controller.conversation();
        let conversation = conversation.lock().await;
        assert!(conversation.transcript.streaming_assistant_message().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_toggles_reach_the_peer() {
        let harness = start(ScriptedBootstrap::default(), ScriptedConnector::default());
        connected(&harness).await;
        let (peer, channel) = harness.connector.last();
        assert!(!peer.microphone_enabled.load(Ordering::SeqCst));

        harness.controller.set_microphone(true).await.unwrap();
        assert!(peer.microphone_enabled.load(Ordering::SeqCst));
        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        assert!(!sent[1]["session"]["turn_detection"].is_null());

        harness.controller.set_speaker_muted(true).await.unwrap();
        assert!(peer.speaker_muted.load(Ordering::SeqCst));
        let snapshot = harness.controller.snapshot();
        assert!(snapshot.microphone_enabled);
        assert!(snapshot.speaker_muted);
    }
}
