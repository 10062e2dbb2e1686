//! Hub Client with Automatic Reconnection
//!
//! Single responsibility: Own the connection lifecycle and turn method calls into frames.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                      HubClient                          │
//! │  - call() / hub().method().call() → Call handle         │
//! │  - Connection state + outgoing queue + call IDs         │
//! └────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌────────────────────────────────────────────────────────┐
//! │                    driver task                          │
//! │  - connect → drain queue → fire open triggers           │
//! │  - reader loop → MessageRouter                          │
//! │  - writer loop ← outbound frames                        │
//! │  - on close: schedule reconnect (or stop)               │
//! └────────────────────────────────────────────────────────┘
//!                            │
//!               ┌────────────┼────────────┐
//!               ▼            ▼            ▼
//!           Connector     Router     PendingCallTable
//! ```
//!
//! # State Machine
//!
//! ```text
//! Closed ──open()──► Connecting ──handshake ok──► Open
//!    ▲                   │                          │
//!    │             handshake failed            link dropped
//!    │                   ▼                          │
//!    └──no reconnect── Closed ◄─────────────────────┘
//!                        │
//!                  reconnect scheduled
//!                        ▼
//!                    Connecting
//! ```
//!
//! Calls made while Open are written immediately, calls made while
//! Connecting are queued and flushed in order when the link opens, and
//! calls made while Closed fail with `CallError::NotConnected` on a later
//! turn of the runtime.

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::call::Call;
use super::hooks::{Hooks, OpenHook};
use super::pending::PendingCallTable;
use super::protocol::{encode_call, CallEnvelope, Codec};
use super::registry::{HubDefinition, HubRegistry};
use super::router::MessageRouter;
use super::transport::{Connector, FrameSink, Link, WsConnector};
use crate::config::{ClientConfig, DisconnectPolicy, ReconnectPolicy};
use crate::error::{CallError, HubError};

/// Connection state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Builder for [`HubClient`].
pub struct HubClientBuilder {
    config: ClientConfig,
    call_timeout: Option<Duration>,
    reconnect: Option<ReconnectPolicy>,
    connector: Option<Arc<dyn Connector>>,
    codec: Option<Arc<dyn Codec>>,
    registry: Option<HubRegistry>,
    hooks: Hooks,
}

impl HubClientBuilder {
    fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            call_timeout: None,
            reconnect: None,
            connector: None,
            codec: None,
            registry: None,
            hooks: Hooks::default(),
        }
    }

    /// Start from a full config (URL, timeouts, policies, codec, hubs).
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// Default timeout for every call (overrides the config).
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Reconnect delay in seconds; -1 disables reconnection.
    pub fn reconnect_timeout_seconds(mut self, seconds: i64) -> Self {
        self.config.reconnect_timeout_seconds = seconds;
        self.reconnect = None;
        self
    }

    /// Full control over the reconnect schedule (overrides the config).
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    pub fn disconnect_policy(mut self, policy: DisconnectPolicy) -> Self {
        self.config.disconnect_policy = policy;
        self
    }

    pub fn connector(mut self, connector: impl Connector) -> Self {
        let connector: Arc<dyn Connector> = Arc::new(connector);
        self.connector = Some(connector);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Use a prebuilt registry instead of the config's `hubs` list.
    pub fn registry(mut self, registry: HubRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Add a hub definition on top of the config's `hubs` list.
    pub fn hub(mut self, definition: HubDefinition) -> Self {
        self.config.hubs.push(crate::config::HubConfig {
            name: definition.name,
            server_methods: definition.server_methods.into_iter().collect(),
            client_methods: definition.client_methods.into_iter().collect(),
        });
        self
    }

    pub fn on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.on_open = Arc::new(f);
        self
    }

    pub fn on_close(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.on_close = Arc::new(f);
        self
    }

    pub fn on_reconnecting(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.on_reconnecting = Arc::new(f);
        self
    }

    pub fn on_message_error(mut self, f: impl Fn(&HubError) + Send + Sync + 'static) -> Self {
        self.hooks.on_message_error = Arc::new(f);
        self
    }

    pub fn on_client_function_not_found(
        mut self,
        f: impl Fn(&str, &str) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_client_function_not_found = Arc::new(f);
        self
    }

    pub fn default_error_handler(mut self, f: impl Fn(&CallError) + Send + Sync + 'static) -> Self {
        self.hooks.default_error_handler = Arc::new(f);
        self
    }

    pub fn build(self) -> Result<HubClient, HubError> {
        let registry = match self.registry {
            Some(registry) => registry,
            None => self.config.registry()?,
        };
        let registry = Arc::new(registry);
        let codec = self.codec.unwrap_or_else(|| self.config.codec.codec());
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WsConnector) as Arc<dyn Connector>);
        let reconnect = self
            .reconnect
            .unwrap_or_else(|| self.config.reconnect_policy());

        let pending = PendingCallTable::new();
        let router = MessageRouter::new(
            Arc::clone(&codec),
            pending.clone(),
            Arc::clone(&registry),
            self.hooks.clone(),
        );
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        let (shutdown_tx, _) = watch::channel(false);

        let inner = Arc::new(Inner {
            client_id: Uuid::new_v4(),
            url: self.config.url.clone(),
            call_timeout: self
                .call_timeout
                .unwrap_or_else(|| self.config.call_timeout()),
            reconnect,
            disconnect_policy: self.config.disconnect_policy,
            connector,
            codec,
            registry,
            hooks: self.hooks,
            pending,
            router,
            link: Mutex::new(LinkState {
                state: ConnectionState::Closed,
                next_id: 0,
                queue: VecDeque::new(),
                outbound: None,
                driver: None,
            }),
            state_tx,
            shutdown_tx,
            open_triggers: Mutex::new(Vec::new()),
        });

        debug!(client_id = %inner.client_id, url = %inner.url, "Hub client built");

        Ok(HubClient {
            lifetime: Arc::new(Lifetime {
                inner: Arc::downgrade(&inner),
            }),
            inner,
        })
    }
}

/// Handle to one hub connection. Cheap to clone; the connection shuts down
/// when the last clone is dropped.
///
/// Open triggers and client handlers are owned by the client, so a
/// `HubClient` captured inside one keeps the connection alive until
/// [`close`](Self::close). Capture a [`WeakHubClient`] there instead.
#[derive(Clone)]
pub struct HubClient {
    inner: Arc<Inner>,
    lifetime: Arc<Lifetime>,
}

struct Inner {
    client_id: Uuid,
    url: String,
    call_timeout: Duration,
    reconnect: ReconnectPolicy,
    disconnect_policy: DisconnectPolicy,
    connector: Arc<dyn Connector>,
    codec: Arc<dyn Codec>,
    registry: Arc<HubRegistry>,
    hooks: Hooks,
    pending: PendingCallTable,
    router: MessageRouter,
    /// State, call IDs and the outgoing queue change together under this lock.
    link: Mutex<LinkState>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    open_triggers: Mutex<Vec<OpenHook>>,
}

struct LinkState {
    state: ConnectionState,
    next_id: u64,
    /// Encoded calls made while Connecting.
    queue: VecDeque<Vec<u8>>,
    /// Writer channel of the open link.
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    driver: Option<JoinHandle<()>>,
}

/// Non-owning handle from [`HubClient::downgrade`]. Does not keep the
/// connection alive.
#[derive(Clone)]
pub struct WeakHubClient {
    inner: Weak<Inner>,
    lifetime: Weak<Lifetime>,
}

impl WeakHubClient {
    /// The client, if at least one `HubClient` is still held.
    pub fn upgrade(&self) -> Option<HubClient> {
        Some(HubClient {
            lifetime: self.lifetime.upgrade()?,
            inner: self.inner.upgrade()?,
        })
    }
}

impl std::fmt::Debug for WeakHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakHubClient")
            .field("alive", &(self.lifetime.strong_count() > 0))
            .finish()
    }
}

/// Signals the driver to stop once every `HubClient` clone is gone.
struct Lifetime {
    inner: Weak<Inner>,
}

impl Drop for Lifetime {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.shutdown_tx.send_replace(true);
        }
    }
}

enum LinkEnd {
    Shutdown,
    Lost(String),
}

impl HubClient {
    pub fn builder() -> HubClientBuilder {
        HubClientBuilder::new()
    }

    pub fn downgrade(&self) -> WeakHubClient {
        WeakHubClient {
            inner: Arc::downgrade(&self.inner),
            lifetime: Arc::downgrade(&self.lifetime),
        }
    }

    pub fn client_id(&self) -> Uuid {
        self.inner.client_id
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock_link().state
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn registry(&self) -> &HubRegistry {
        &self.inner.registry
    }

    /// Every hub with its server and client method names.
    pub fn structure(&self) -> Vec<HubDefinition> {
        self.inner.registry.structure()
    }

    /// Calls registered and not yet settled.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Frames waiting for the link to open.
    pub fn queued_calls(&self) -> usize {
        self.inner.lock_link().queue.len()
    }

    /// Start connecting. Returns immediately; a no-op if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(&self) {
        let mut link = self.inner.lock_link();
        if link.driver.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!(client_id = %self.inner.client_id, "open() ignored, driver already running");
            return;
        }

        self.inner.shutdown_tx.send_replace(false);
        self.inner.set_state(&mut link, ConnectionState::Connecting);

        let inner = Arc::clone(&self.inner);
        let shutdown = self.inner.shutdown_tx.subscribe();
        let span = info_span!("hub_client", client_id = %self.inner.client_id);
        link.driver = Some(tokio::spawn(drive(inner, shutdown).instrument(span)));
    }

    /// Close the connection and stop reconnecting. Waits for the driver to finish.
    pub async fn close(&self) {
        self.inner.shutdown_tx.send_replace(true);
        let task = self.inner.lock_link().driver.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Register a callback fired after every successful (re)connection.
    ///
    /// To call back into the client from the trigger, capture
    /// [`downgrade`](Self::downgrade) rather than a clone.
    pub fn add_open_trigger(&self, trigger: impl Fn() + Send + Sync + 'static) {
        self.inner
            .open_triggers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(trigger));
    }

    /// Call `function` on `hub` without checking the registry.
    ///
    /// Never blocks and never reports failure synchronously; the outcome
    /// arrives through the returned [`Call`]. Must be called from within a
    /// tokio runtime.
    pub fn call(&self, hub: &str, function: &str, args: Vec<Value>) -> Call {
        let inner = &self.inner;
        let mut link = inner.lock_link();

        link.next_id += 1;
        let id = link.next_id;
        let rx = inner.pending.register(id, inner.call_timeout);
        let call = Call::new(
            id,
            rx,
            inner.pending.clone(),
            Arc::clone(&inner.hooks.default_error_handler),
        );

        let envelope = CallEnvelope {
            hub: hub.to_string(),
            function: function.to_string(),
            args,
            id,
        };
        let frame = match encode_call(inner.codec.as_ref(), &envelope) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(id = id, hub = %hub, function = %function, error = %e, "Failed to encode call");
                inner.fail_later(id, CallError::Encode(e.to_string()));
                return call;
            }
        };

        match link.state {
            ConnectionState::Open => {
                let unsent = match link.outbound.as_ref() {
                    Some(tx) => tx.send(frame).err().map(|e| e.0),
                    None => Some(frame),
                };
                match unsent {
                    None => debug!(id = id, hub = %hub, function = %function, "Call sent"),
                    Some(frame) => {
                        // Writer is gone but the reader has not noticed yet; the
                        // link is about to close, so hold the frame for the next one.
                        debug!(id = id, "Writer closed, queueing call");
                        link.queue.push_back(frame);
                    }
                }
            }
            ConnectionState::Connecting => {
                debug!(id = id, hub = %hub, function = %function, "Call queued until open");
                link.queue.push_back(frame);
            }
            ConnectionState::Closed => {
                debug!(id = id, hub = %hub, function = %function, "Call made while closed");
                inner.fail_later(id, CallError::NotConnected);
            }
        }

        call
    }

    /// Checked access to one hub's server methods and client slots.
    pub fn hub(&self, name: &str) -> Result<HubProxy, HubError> {
        if !self.inner.registry.contains_hub(name) {
            return Err(HubError::UnknownHub(name.to_string()));
        }
        Ok(HubProxy {
            client: self.clone(),
            hub: name.to_string(),
        })
    }

    /// Fill a client slot with a typed handler. See [`HubRegistry::on`].
    pub fn on<A, F>(&self, hub: &str, function: &str, handler: F) -> Result<(), HubError>
    where
        A: DeserializeOwned,
        F: Fn(A) + Send + Sync + 'static,
    {
        self.inner.registry.on(hub, function, handler)
    }
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient")
            .field("client_id", &self.inner.client_id)
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish()
    }
}

/// One hub, validated against the registry.
#[derive(Debug, Clone)]
pub struct HubProxy {
    client: HubClient,
    hub: String,
}

impl HubProxy {
    pub fn name(&self) -> &str {
        &self.hub
    }

    /// A server method wrapper. Fails if the hub does not declare `function`.
    pub fn method(&self, function: &str) -> Result<ServerMethod, HubError> {
        self.client
            .inner
            .registry
            .check_server_method(&self.hub, function)?;
        Ok(ServerMethod {
            client: self.client.clone(),
            hub: self.hub.clone(),
            function: function.to_string(),
        })
    }

    /// Shorthand for `method(function)?.call(args)`.
    pub fn call(&self, function: &str, args: Vec<Value>) -> Result<Call, HubError> {
        Ok(self.method(function)?.call(args))
    }

    pub fn on<A, F>(&self, function: &str, handler: F) -> Result<(), HubError>
    where
        A: DeserializeOwned,
        F: Fn(A) + Send + Sync + 'static,
    {
        self.client.on(&self.hub, function, handler)
    }
}

/// A validated `hub.function` pair, ready to be called any number of times.
#[derive(Debug, Clone)]
pub struct ServerMethod {
    client: HubClient,
    hub: String,
    function: String,
}

impl ServerMethod {
    pub fn call(&self, args: Vec<Value>) -> Call {
        self.client.call(&self.hub, &self.function, args)
    }
}

impl Inner {
    fn lock_link(&self) -> MutexGuard<'_, LinkState> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, link: &mut LinkState, state: ConnectionState) {
        if link.state != state {
            debug!(from = ?link.state, to = ?state, "Connection state change");
        }
        link.state = state;
        self.state_tx.send_replace(state);
    }

    /// Resolve a call on a later turn, never inside the caller's frame.
    fn fail_later(&self, id: u64, error: CallError) {
        let pending = self.pending.clone();
        tokio::spawn(async move {
            pending.resolve(id, Err(error));
        });
    }

    /// Transition to Open: flush the queue in order, then publish the writer.
    fn mark_open(&self, outbound: mpsc::UnboundedSender<Vec<u8>>) -> usize {
        let mut link = self.lock_link();
        let mut flushed = 0;
        while let Some(frame) = link.queue.pop_front() {
            if outbound.send(frame).is_err() {
                break;
            }
            flushed += 1;
        }
        link.outbound = Some(outbound);
        self.set_state(&mut link, ConnectionState::Open);
        flushed
    }

    /// Transition to Closed, and straight on to Connecting if a reconnect follows.
    fn mark_closed(&self, reconnecting: bool) {
        let mut link = self.lock_link();
        link.outbound = None;
        self.set_state(&mut link, ConnectionState::Closed);
        if reconnecting {
            self.set_state(&mut link, ConnectionState::Connecting);
        } else if !link.queue.is_empty() {
            warn!(dropped = link.queue.len(), "Discarding queued calls, not reconnecting");
            link.queue.clear();
        }
    }

    fn apply_disconnect_policy(&self, cause: &str) {
        if self.disconnect_policy == DisconnectPolicy::FailFast {
            let failed = self
                .pending
                .fail_all(CallError::Disconnected(cause.to_string()));
            if failed > 0 {
                info!(failed = failed, "Failed in-flight calls on disconnect");
            }
        }
    }

    fn fire_open_triggers(&self) {
        let triggers: Vec<OpenHook> = self
            .open_triggers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for trigger in triggers {
            trigger();
        }
    }

    /// Run one open link until it drops or shutdown is requested.
    async fn run_link(&self, link: Link, shutdown: &mut watch::Receiver<bool>) -> LinkEnd {
        let Link {
            mut sink,
            mut stream,
        } = link;
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let flushed = self.mark_open(outbound_tx);
        info!(url = %self.url, flushed = flushed, "Link established");
        (self.hooks.on_open)();
        self.fire_open_triggers();

        let end = {
            let writer = write_frames(&mut sink, &mut outbound_rx);
            tokio::pin!(writer);

            loop {
                tokio::select! {
                    _ = shutdown_requested(shutdown) => break LinkEnd::Shutdown,
                    result = &mut writer => {
                        break LinkEnd::Lost(match result {
                            Err(e) => e.to_string(),
                            Ok(()) => "outbound channel closed".to_string(),
                        });
                    }
                    frame = stream.next() => match frame {
                        Some(Ok(bytes)) => self.router.route(&bytes),
                        Some(Err(e)) => break LinkEnd::Lost(e.to_string()),
                        None => break LinkEnd::Lost("connection closed by server".to_string()),
                    },
                }
            }
        };

        if matches!(end, LinkEnd::Shutdown) {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "Error closing link");
            }
        }
        end
    }
}

/// Reconnection controller. One per `open()`.
async fn drive(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut attempt: u32 = 0;

    loop {
        debug!(url = %inner.url, attempt = attempt, "Connecting to hub server");

        let connected = tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            result = inner.connector.connect(&inner.url) => result,
        };

        let cause = match connected {
            Ok(link) => {
                attempt = 0;
                match inner.run_link(link, &mut shutdown).await {
                    LinkEnd::Shutdown => {
                        inner.mark_closed(false);
                        (inner.hooks.on_close)("closed by client");
                        inner.apply_disconnect_policy("closed by client");
                        info!("Hub client closed");
                        return;
                    }
                    LinkEnd::Lost(cause) => cause,
                }
            }
            Err(e) => e.to_string(),
        };

        attempt = attempt.saturating_add(1);
        let delay = inner.reconnect.delay(attempt);

        inner.mark_closed(delay.is_some());
        (inner.hooks.on_close)(&cause);
        inner.apply_disconnect_policy(&cause);

        let Some(delay) = delay else {
            warn!(cause = %cause, "Hub connection closed, reconnection disabled");
            return;
        };

        warn!(cause = %cause, delay_ms = delay.as_millis() as u64, "Hub connection closed, reconnecting");
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            _ = tokio::time::sleep(delay) => {}
        }
        (inner.hooks.on_reconnecting)(&cause);
    }

    // Shutdown while not open
    inner.mark_closed(false);
    info!("Hub client closed");
}

async fn write_frames(
    sink: &mut FrameSink,
    outbound: &mut mpsc::UnboundedReceiver<Vec<u8>>,
) -> Result<(), HubError> {
    while let Some(frame) = outbound.recv().await {
        sink.send(frame).await?;
    }
    Ok(())
}

/// Resolves once shutdown is requested (or the client is gone).
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
