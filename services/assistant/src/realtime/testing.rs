//! In-process fakes for the session layer.

use crate::bootstrap::{BootstrapError, SessionBootstrap, SessionGrant};
use anyhow::Result;
use async_trait::async_trait;
use realtime_rtc::{
    ChannelEvent, Connection, ConnectionError, Connector, EventChannel, Listeners, OpenRequest,
    PeerLink, Subscription,
};
use realtime_types::{ClientEvent, ToolDefinition};
use secrecy::SecretString;
use serde_json::{Value, json};
use shopper_core::{
    catalog::{Catalog, SearchRequest, Variant, VariantRequest},
    storefront::{ChannelUi, MemoryList},
    tools::ToolRegistry,
};
use std::{
    collections::VecDeque,
    time::Duration,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tokio::sync::mpsc;

/// Resolves every product to a single variant and answers proxies with `{}`.
pub struct StubCatalog;

#[async_trait]
impl Catalog for StubCatalog {
    async fn get_variants(&self, _session_id: &str, request: &VariantRequest) -> Result<Vec<Variant>> {
        Ok(request
            .products
            .iter()
            .map(|p| Variant {
                product_id: p.product_id.clone(),
                variant_id: format!("{}-v", p.product_id),
                title: "Stub".into(),
                color: None,
                size: None,
                price: None,
                currency: None,
                image_url: None,
                link: Some(format!("/products/{}", p.product_id)),
            })
            .collect())
    }

    async fn search_products(&self, _session_id: &str, _request: &SearchRequest) -> Result<Value> {
        Ok(json!({}))
    }

    async fn get_similar_products(&self, _session_id: &str, _arguments: &Value) -> Result<Value> {
        Ok(json!({}))
    }

    async fn search_policy(&self, _session_id: &str, _arguments: &Value) -> Result<Value> {
        Ok(json!({}))
    }

    async fn get_weather(&self, _session_id: &str, _arguments: &Value) -> Result<Value> {
        Ok(json!({}))
    }

    async fn get_total_number_of_products(&self, _session_id: &str) -> Result<Value> {
        Ok(json!({}))
    }
}

/// [`StubCatalog`] whose weather lookup sleeps for the given duration.
pub struct SlowWeatherCatalog(pub Duration);

#[async_trait]
impl Catalog for SlowWeatherCatalog {
    async fn get_variants(&self, session_id: &str, request: &VariantRequest) -> Result<Vec<Variant>> {
        StubCatalog.get_variants(session_id, request).await
    }

    async fn search_products(&self, session_id: &str, request: &SearchRequest) -> Result<Value> {
        StubCatalog.search_products(session_id, request).await
    }

    async fn get_similar_products(&self, session_id: &str, arguments: &Value) -> Result<Value> {
        StubCatalog.get_similar_products(session_id, arguments).await
    }

    async fn search_policy(&self, session_id: &str, arguments: &Value) -> Result<Value> {
        StubCatalog.search_policy(session_id, arguments).await
    }

    async fn get_weather(&self, _session_id: &str, _arguments: &Value) -> Result<Value> {
        tokio::time::sleep(self.0).await;
        Ok(json!({ "forecast": "rain" }))
    }

    async fn get_total_number_of_products(&self, session_id: &str) -> Result<Value> {
        StubCatalog.get_total_number_of_products(session_id).await
    }
}

pub fn registry() -> ToolRegistry {
    registry_with(Arc::new(StubCatalog))
}

pub fn registry_with(catalog: Arc<dyn Catalog>) -> ToolRegistry {
    ToolRegistry::new(
        catalog,
        Arc::new(MemoryList::new()),
        Arc::new(MemoryList::new()),
        Arc::new(ChannelUi::new(8)),
    )
}

/// Call id and decoded result of a `function_call_output` frame.
pub fn tool_output(event: &ClientEvent) -> Option<(String, Value)> {
    let ClientEvent::ConversationItemCreate { item } = event else {
        return None;
    };
    let output = serde_json::from_str(item.output.as_deref()?).ok()?;
    Some((item.call_id.clone()?, output))
}

pub fn grant() -> SessionGrant {
    SessionGrant {
        credential: SecretString::from("ek_test".to_string()),
        instructions: Some("Help the shopper.".into()),
        tools: vec![ToolDefinition::Function {
            name: "add_to_cart".into(),
            description: String::new(),
            parameters: Value::Null,
        }],
    }
}

/// Replays queued outcomes, then grants every further request.
#[derive(Default)]
pub struct ScriptedBootstrap {
    script: Mutex<VecDeque<Result<(), BootstrapError>>>,
    pub calls: AtomicUsize,
}

impl ScriptedBootstrap {
    pub fn failing(times: usize, err: BootstrapError) -> Self {
        let script = (0..times).map(|_| Err(err.clone())).collect();
        Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SessionBootstrap for ScriptedBootstrap {
    async fn fetch(&self) -> Result<SessionGrant, BootstrapError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Err(e)) => Err(e),
            _ => Ok(grant()),
        }
    }
}

#[derive(Default)]
pub struct FakePeer {
    pub closed: AtomicBool,
    pub microphone_enabled: AtomicBool,
    pub speaker_muted: AtomicBool,
}

#[async_trait]
impl PeerLink for FakePeer {
    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn set_microphone_enabled(&self, enabled: bool) {
        self.microphone_enabled.store(enabled, Ordering::SeqCst);
    }

    fn set_speaker_muted(&self, muted: bool) {
        self.speaker_muted.store(muted, Ordering::SeqCst);
    }

    fn live_tracks(&self) -> usize {
        if self.closed.load(Ordering::SeqCst) { 0 } else { 1 }
    }
}

pub struct FakeChannel {
    listeners: Listeners<ChannelEvent>,
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl FakeChannel {
    fn new(open: bool) -> Self {
        Self {
            listeners: Listeners::new(),
            open: AtomicBool::new(open),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn emit(&self, event: ChannelEvent) {
        if event == ChannelEvent::Open {
            self.open.store(true, Ordering::SeqCst);
        }
        self.listeners.emit(event);
    }

    /// Frames sent so far, decoded.
    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    /// `type` tags of the frames sent so far.
    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl EventChannel for FakeChannel {
    async fn send_text(&self, text: String) -> Result<(), ConnectionError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(ConnectionError::Channel("not open".into()));
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn subscribe(&self) -> (Subscription, mpsc::UnboundedReceiver<ChannelEvent>) {
        self.listeners.subscribe()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.listeners.emit(ChannelEvent::Closed);
        }
    }
}

/// Hands out fake connections and remembers each one.
#[derive(Default)]
pub struct ScriptedConnector {
    /// Leave channels closed until a test emits `Open`.
    pub defer_open: bool,
    failures: Mutex<VecDeque<ConnectionError>>,
    pub opened: Mutex<Vec<(Arc<FakePeer>, Arc<FakeChannel>)>>,
}

impl ScriptedConnector {
    pub fn deferred() -> Self {
        Self {
            defer_open: true,
            ..Default::default()
        }
    }

    pub fn failing_with(err: ConnectionError) -> Self {
        let connector = Self::default();
        connector.failures.lock().unwrap().push_back(err);
        connector
    }

    pub fn opens(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn last(&self) -> (Arc<FakePeer>, Arc<FakeChannel>) {
        self.opened.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self, request: OpenRequest) -> Result<Connection, ConnectionError> {
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let peer = Arc::new(FakePeer::default());
        peer.set_microphone_enabled(request.microphone_enabled);
        peer.set_speaker_muted(request.speaker_muted);
        let channel = Arc::new(FakeChannel::new(!self.defer_open));
        self.opened
            .lock()
            .unwrap()
            .push((peer.clone(), channel.clone()));
        Ok(Connection { peer, channel })
    }
}
