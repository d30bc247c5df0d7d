//! Stream Deck attached over TCP
//!
//! The network link comes and goes. The proxy owns the connection lifecycle:
//! a fresh inner session is built on every connect and torn down on every
//! disconnect, and the last known feedback per trigger is replayed into each
//! new session before live updates are forwarded to it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::handler::{SessionOptions, StreamDeckDeviceHandler};
use super::DeckTransport;
use crate::device::{Device, DeviceEvents};
use crate::error::GatewayError;
use crate::feedback::{SomeFeedback, StylePreset};
use crate::render::RenderPipeline;

pub const DEFAULT_PORT: u16 = 5343;
pub const DEFAULT_FEEDBACK_CACHE_LIMIT: usize = 1024;

/// Options of a network-attached Stream Deck
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StreamDeckTcpOptions {
    /// Address of the network dock (required)
    pub ip: Option<String>,
    /// Default 5343
    pub port: Option<u16>,
    /// Percent, 0-100 (default 100)
    pub brightness: Option<u8>,
    pub style_presets: Vec<StylePreset>,
    /// Triggers remembered for replay after a reconnect (default 1024)
    pub feedback_cache_limit: Option<usize>,
}

impl From<&StreamDeckTcpOptions> for SessionOptions {
    fn from(options: &StreamDeckTcpOptions) -> Self {
        Self {
            brightness: options.brightness,
            style_presets: options.style_presets.clone(),
        }
    }
}

/// Reported by the connection manager
pub enum ConnectionEvent {
    Connected(Arc<dyn DeckTransport>),
    Disconnected,
    Error(String),
}

/// Reconnecting network transport (black-box hardware library)
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Start (re)connecting to `address:port`; connection changes arrive on the returned channel
    async fn connect_to(&self, address: &str, port: u16) -> anyhow::Result<mpsc::Receiver<ConnectionEvent>>;

    async fn disconnect_from_all(&self);
}

/// Creates a connection manager per proxy
pub type NetworkFactory = Arc<dyn Fn() -> Arc<dyn ConnectionManager> + Send + Sync>;

/// Inner device handler as the proxy sees it
#[async_trait]
pub trait DeckSession: Send + Sync {
    async fn init(&self) -> Result<(), GatewayError>;
    async fn destroy(&self);
    async fn set_feedback(&self, trigger_id: &str, feedback: SomeFeedback);
    async fn clear_feedback_all(&self);
}

#[async_trait]
impl DeckSession for StreamDeckDeviceHandler {
    async fn init(&self) -> Result<(), GatewayError> {
        StreamDeckDeviceHandler::init(self).await
    }

    async fn destroy(&self) {
        StreamDeckDeviceHandler::destroy(self).await
    }

    async fn set_feedback(&self, trigger_id: &str, feedback: SomeFeedback) {
        StreamDeckDeviceHandler::set_feedback(self, trigger_id, feedback).await
    }

    async fn clear_feedback_all(&self) {
        StreamDeckDeviceHandler::clear_feedback_all(self).await
    }
}

/// Builds the inner session for a freshly connected panel
pub type SessionFactory = Arc<dyn Fn(Arc<dyn DeckTransport>) -> Arc<dyn DeckSession> + Send + Sync>;

/// A session exists only while `Connected`; during `Connecting` it is still
/// being initialised and replayed, and is not reachable from the proxy state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Last known feedback per trigger, bounded; the oldest set is evicted first
#[derive(Debug)]
pub struct FeedbackCache {
    limit: usize,
    next_seq: u64,
    entries: HashMap<String, (u64, SomeFeedback)>,
}

impl FeedbackCache {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            next_seq: 0,
            entries: HashMap::new(),
        }
    }

    pub fn set(&mut self, trigger_id: &str, feedback: SomeFeedback) {
        let seq = self.next_seq;
        self.next_seq += 1;

        if !self.entries.contains_key(trigger_id) && self.entries.len() >= self.limit {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (seq, _))| *seq)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                debug!("Stream Deck: feedback cache full, evicting {}", oldest);
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(trigger_id.to_string(), (seq, feedback));
    }

    /// Cached entries in the order they were set
    pub fn entries(&self) -> Vec<(String, SomeFeedback)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(id, (seq, feedback))| (*seq, id.clone(), feedback.clone()))
            .collect();
        entries.sort_by_key(|(seq, _, _)| *seq);
        entries.into_iter().map(|(_, id, feedback)| (id, feedback)).collect()
    }

    pub fn get(&self, trigger_id: &str) -> Option<&SomeFeedback> {
        self.entries.get(trigger_id).map(|(_, feedback)| feedback)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct ProxyState {
    connection: ConnectionState,
    session: Option<Arc<dyn DeckSession>>,
    cache: FeedbackCache,
}

struct ProxyShared {
    state: Mutex<ProxyState>,
    /// Held from session init through replay; live forwards take it too
    forward_lock: tokio::sync::Mutex<()>,
    session_factory: SessionFactory,
}

impl ProxyShared {
    async fn handle_connection_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected(transport) => self.on_connected(transport).await,
            ConnectionEvent::Disconnected => self.on_disconnected(),
            ConnectionEvent::Error(e) => error!("Stream Deck: Connection error: {}", e),
        }
    }

    async fn on_connected(&self, transport: Arc<dyn DeckTransport>) {
        if transport.controls().is_empty() {
            info!("Stream Deck: Connected to device without any controls. Ignoring");
            return;
        }

        let _forward = self.forward_lock.lock().await;
        let replay = {
            let mut state = self.state.lock();
            if state.connection != ConnectionState::Disconnected {
                warn!("Stream Deck: Already connected to a device, ignoring new connection");
                return;
            }
            info!("🔌 Stream Deck: Connected to device");
            state.connection = ConnectionState::Connecting;
            state.cache.entries()
        };

        // Published only once replay is done
        let session = (self.session_factory)(transport);
        if let Err(e) = session.init().await {
            error!("Stream Deck: Error initializing device: {}", e);
            session.destroy().await;
            self.state.lock().connection = ConnectionState::Disconnected;
            return;
        }

        debug!("Stream Deck: replaying {} cached feedbacks", replay.len());
        for (trigger_id, feedback) in replay {
            session.set_feedback(&trigger_id, feedback).await;
        }

        let mut state = self.state.lock();
        state.session = Some(session);
        state.connection = ConnectionState::Connected;
    }

    fn on_disconnected(&self) {
        let session = {
            let mut state = self.state.lock();
            state.connection = ConnectionState::Disconnected;
            state.session.take()
        };
        if let Some(session) = session {
            tokio::spawn(async move { session.destroy().await });
        }
        info!("Stream Deck: Disconnected from device");
    }

    /// Session to forward to, only once it is fully connected
    fn live_session(&self) -> Option<Arc<dyn DeckSession>> {
        let state = self.state.lock();
        match state.connection {
            ConnectionState::Connected => state.session.clone(),
            _ => None,
        }
    }
}

/// Stream Deck attached over TCP
pub struct StreamDeckTcpProxy {
    id: String,
    options: StreamDeckTcpOptions,
    network: Option<NetworkFactory>,
    shared: Arc<ProxyShared>,
    manager: Mutex<Option<Arc<dyn ConnectionManager>>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamDeckTcpProxy {
    pub fn new(
        id: &str,
        options: StreamDeckTcpOptions,
        events: DeviceEvents,
        render: RenderPipeline,
        network: Option<NetworkFactory>,
    ) -> Self {
        let session_options = SessionOptions::from(&options);
        let session_factory: SessionFactory = Arc::new(move |transport| {
            Arc::new(StreamDeckDeviceHandler::new(
                session_options.clone(),
                transport,
                events.clone(),
                render.clone(),
            )) as Arc<dyn DeckSession>
        });
        Self::with_session_factory(id, options, network, session_factory)
    }

    pub fn with_session_factory(
        id: &str,
        options: StreamDeckTcpOptions,
        network: Option<NetworkFactory>,
        session_factory: SessionFactory,
    ) -> Self {
        let limit = options.feedback_cache_limit.unwrap_or(DEFAULT_FEEDBACK_CACHE_LIMIT);
        Self {
            id: id.to_string(),
            options,
            network,
            shared: Arc::new(ProxyShared {
                state: Mutex::new(ProxyState {
                    connection: ConnectionState::Disconnected,
                    session: None,
                    cache: FeedbackCache::new(limit),
                }),
                forward_lock: tokio::sync::Mutex::new(()),
                session_factory,
            }),
            manager: Mutex::new(None),
            event_task: Mutex::new(None),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state.lock().connection
    }

    pub fn cached_feedback(&self) -> Vec<(String, SomeFeedback)> {
        self.shared.state.lock().cache.entries()
    }
}

#[async_trait]
impl Device for StreamDeckTcpProxy {
    fn id(&self) -> &str {
        &self.id
    }

    async fn init(&self) -> Result<(), GatewayError> {
        let ip = self
            .options
            .ip
            .as_deref()
            .filter(|ip| !ip.trim().is_empty())
            .ok_or_else(|| GatewayError::Config("Stream Deck: No IP address provided in config".to_string()))?;
        let port = self.options.port.unwrap_or(DEFAULT_PORT);

        let factory = self
            .network
            .as_ref()
            .ok_or_else(|| GatewayError::Init("no Stream Deck network backend available".to_string()))?;
        let manager = factory();

        info!("🔌 Stream Deck {}: connecting to {}:{}", self.id, ip, port);
        let mut connection_events = manager
            .connect_to(ip, port)
            .await
            .map_err(|e| GatewayError::Init(format!("failed to connect to {}:{}: {:#}", ip, port, e)))?;

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            while let Some(event) = connection_events.recv().await {
                shared.handle_connection_event(event).await;
            }
            debug!("Stream Deck: connection event stream ended");
        });

        if let Some(previous) = self.event_task.lock().replace(task) {
            previous.abort();
        }
        *self.manager.lock() = Some(manager);
        Ok(())
    }

    async fn destroy(&self) {
        let manager = self.manager.lock().take();
        if let Some(manager) = manager {
            manager.disconnect_from_all().await;
        }

        // Lets a connection in progress finish so its session is torn down below
        let _forward = self.shared.forward_lock.lock().await;
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }

        let session = {
            let mut state = self.shared.state.lock();
            state.connection = ConnectionState::Disconnected;
            state.session.take()
        };
        if let Some(session) = session {
            session.destroy().await;
        }
    }

    async fn set_feedback(&self, trigger_id: &str, feedback: SomeFeedback) {
        self.shared.state.lock().cache.set(trigger_id, feedback.clone());

        let _forward = self.shared.forward_lock.lock().await;
        if let Some(session) = self.shared.live_session() {
            session.set_feedback(trigger_id, feedback).await;
        }
    }

    async fn clear_feedback_all(&self) {
        self.shared.state.lock().cache.clear();

        let _forward = self.shared.forward_lock.lock().await;
        if let Some(session) = self.shared.live_session() {
            session.clear_feedback_all().await;
        }
    }

    fn options_manifest(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(StreamDeckTcpOptions)).unwrap_or_default()
    }
}
