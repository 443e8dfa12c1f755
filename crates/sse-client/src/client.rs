//! Event stream client and connection supervisor
//!
//! [`ServerEventsClient`] owns the background reader task for one connection
//! attempt at a time. Any failure reaching the supervisor bumps the
//! continuous error count, is reported to the exception callback and leads to
//! a restart after a jittered backoff, until [`ServerEventsClient::stop`] is
//! called.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::backoff::backoff_delay;
use crate::config::ClientConfig;
use crate::decoder::decode_stream;
use crate::error::{ClientError, Result};
use crate::handlers::{Callbacks, HandlerTable, RequestFilter};
use crate::heartbeat::{HeartbeatScheduler, HeartbeatState};
use crate::message::{ConnectionInfo, ServerCommand, ServerEventMessage};
use crate::selector::parse_message;

/// Connection supervisor state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// Not started, or stopped by the application
    Stopped,
    /// Reader launched, waiting for `cmd.onConnect`
    Starting,
    /// `cmd.onConnect` received
    Connected,
    /// Torn down after a failure, waiting out the backoff
    Restarting,
}

/// Reader task of the current connection attempt
#[derive(Default)]
struct Lifecycle {
    reader: Option<JoinHandle<()>>,
}

struct ClientInner {
    http: Client,
    config: RwLock<ClientConfig>,
    event_stream_uri: RwLock<Url>,

    /// Named-target handlers, consulted for non-reserved `cmd.*` targets
    handlers: HandlerTable,
    /// Op-name receivers
    receivers: HandlerTable,
    callbacks: Callbacks,

    connection_info: RwLock<Option<Arc<ConnectionInfo>>>,
    state: RwLock<ConnectionState>,
    last_pulse_at: Mutex<Instant>,
    heartbeat: HeartbeatScheduler,

    continuous_errors: AtomicU32,
    stopped: AtomicBool,
    stop_notify: Notify,
    /// Identifies the current connection attempt
    generation: AtomicU64,
    /// Serializes start, stop and restart
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

/// Client for a server event stream
///
/// Cloning is cheap; all clones share one connection. Background tasks keep
/// a clone alive, so call [`stop`](Self::stop) to shut the client down.
///
/// # Example
///
/// ```no_run
/// use sse_client::ServerEventsClient;
///
/// # async fn example() -> sse_client::Result<()> {
/// let client = ServerEventsClient::new("http://localhost:5000", &["home"])?;
///
/// client
///     .on_connect(|info| println!("connected as {:?}", info.display_name))
///     .on_message(|msg| println!("{} {}", msg.selector, msg.json));
///
/// client.named_receivers().register("chat", |_client, msg| {
///     println!("chat {}: {}", msg.target, msg.json);
/// });
///
/// client.start().await;
/// // ...
/// client.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ServerEventsClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for ServerEventsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerEventsClient")
            .field("event_stream_uri", &self.inner.event_stream_uri.read().as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl ServerEventsClient {
    /// Create a client for `base_uri` subscribed to `channels`
    pub fn new<S: AsRef<str>>(base_uri: &str, channels: &[S]) -> Result<Self> {
        Self::with_config(ClientConfig::new(base_uri, channels))
    }

    /// Create a client from a full configuration
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let event_stream_uri = config.event_stream_uri()?;

        let http = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                config: RwLock::new(config),
                event_stream_uri: RwLock::new(event_stream_uri),
                handlers: HandlerTable::new(),
                receivers: HandlerTable::new(),
                callbacks: Callbacks::default(),
                connection_info: RwLock::new(None),
                state: RwLock::new(ConnectionState::Stopped),
                last_pulse_at: Mutex::new(Instant::now()),
                heartbeat: HeartbeatScheduler::default(),
                continuous_errors: AtomicU32::new(0),
                stopped: AtomicBool::new(false),
                stop_notify: Notify::new(),
                generation: AtomicU64::new(1),
                lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
            }),
        })
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    pub fn base_uri(&self) -> String {
        self.inner.config.read().base_uri.clone()
    }

    pub fn channels(&self) -> Vec<String> {
        self.inner.config.read().channels.clone()
    }

    /// Replace the subscribed channels; takes effect on the next (re)start
    pub fn set_channels<S: AsRef<str>>(&self, channels: &[S]) -> Result<()> {
        let mut config = self.inner.config.read().clone();
        config.channels = channels.iter().map(|c| c.as_ref().to_string()).collect();
        config.validate()?;
        let uri = config.event_stream_uri()?;

        *self.inner.config.write() = config;
        *self.inner.event_stream_uri.write() = uri;
        Ok(())
    }

    /// Point the client at another server; takes effect on the next (re)start
    pub fn set_base_uri(&self, base_uri: &str) -> Result<()> {
        let mut config = self.inner.config.read().clone();
        config.base_uri = base_uri.to_string();
        config.validate()?;
        let uri = config.event_stream_uri()?;

        *self.inner.config.write() = config;
        *self.inner.event_stream_uri.write() = uri;
        Ok(())
    }

    /// The URL the reader connects to
    pub fn event_stream_uri(&self) -> Url {
        self.inner.event_stream_uri.read().clone()
    }

    /// Get a reference to the underlying HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.inner.http
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.config.read().request_timeout_ms)
    }

    // =========================================================================
    // Handlers and callbacks
    // =========================================================================

    /// Handlers keyed by `cmd.<target>` target name
    pub fn handlers(&self) -> &HandlerTable {
        &self.inner.handlers
    }

    /// Receivers keyed by selector op
    pub fn named_receivers(&self) -> &HandlerTable {
        &self.inner.receivers
    }

    pub fn on_connect<F>(&self, callback: F) -> &Self
    where
        F: Fn(&ConnectionInfo) + Send + Sync + 'static,
    {
        self.inner.callbacks.on_connect.set(Arc::new(callback));
        self
    }

    /// Called for every message that is not a lifecycle command
    pub fn on_message<F>(&self, callback: F) -> &Self
    where
        F: Fn(&ServerEventMessage) + Send + Sync + 'static,
    {
        self.inner.callbacks.on_message.set(Arc::new(callback));
        self
    }

    /// Called for join, leave, update and heartbeat commands
    pub fn on_command<F>(&self, callback: F) -> &Self
    where
        F: Fn(&ServerCommand) + Send + Sync + 'static,
    {
        self.inner.callbacks.on_command.set(Arc::new(callback));
        self
    }

    pub fn on_heartbeat<F>(&self, callback: F) -> &Self
    where
        F: Fn(&ServerCommand) + Send + Sync + 'static,
    {
        self.inner.callbacks.on_heartbeat.set(Arc::new(callback));
        self
    }

    pub fn on_exception<F>(&self, callback: F) -> &Self
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.inner.callbacks.on_exception.set(Arc::new(callback));
        self
    }

    /// Customize heartbeat requests before they are sent (e.g., auth headers)
    pub fn set_heartbeat_request_filter<F>(&self, filter: F) -> &Self
    where
        F: Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send + Sync + 'static,
    {
        self.inner.callbacks.heartbeat_request_filter.set(Arc::new(filter));
        self
    }

    pub(crate) fn heartbeat_request_filter(&self) -> Option<Arc<RequestFilter>> {
        self.inner.callbacks.heartbeat_request_filter.get()
    }

    // =========================================================================
    // State
    // =========================================================================

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    pub fn heartbeat_state(&self) -> HeartbeatState {
        self.inner.heartbeat.state()
    }

    /// Connection details from the last `cmd.onConnect`, if connected
    pub fn connection_info(&self) -> Option<Arc<ConnectionInfo>> {
        self.inner.connection_info.read().clone()
    }

    pub fn connection_display_name(&self) -> String {
        self.connection_info()
            .and_then(|info| info.display_name.clone())
            .unwrap_or_else(|| "(not connected)".to_string())
    }

    /// Failures since the client was created or last stopped.
    /// A successful reconnect does not reset it.
    pub fn error_count(&self) -> u32 {
        self.inner.continuous_errors.load(Ordering::SeqCst)
    }

    /// Time since the stream was started or the last heartbeat message
    pub fn last_pulse_elapsed(&self) -> Duration {
        self.inner.last_pulse_at.lock().elapsed()
    }

    pub(crate) fn mark_pulse(&self) {
        *self.inner.last_pulse_at.lock() = Instant::now();
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.inner.state.write() = state;
    }

    /// Install new connection details and arm the heartbeat for them.
    ///
    /// Returns false if attempt `generation` was torn down in the meantime;
    /// the check and the install happen under the lock `internal_stop` clears
    /// the details under.
    pub(crate) fn set_connection_info(
        &self,
        info: Arc<ConnectionInfo>,
        generation: u64,
    ) -> bool {
        let mut current = self.inner.connection_info.write();
        if !self.is_current(generation) {
            return false;
        }
        if !self.inner.heartbeat.arm(self, info.clone(), generation) {
            return false;
        }
        *current = Some(info);
        self.set_state(ConnectionState::Connected);
        true
    }

    pub(crate) fn current_generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Whether `generation` is the live connection attempt
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        !self.is_stopped() && generation == self.current_generation()
    }

    pub(crate) fn callbacks(&self) -> &Callbacks {
        &self.inner.callbacks
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connect to the event stream in the background.
    ///
    /// Any previous connection attempt is torn down first. Stopping is
    /// terminal: once [`stop`](Self::stop) has been called, `start` does
    /// nothing and a new client is needed.
    #[instrument(skip(self))]
    pub async fn start(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if self.is_stopped() {
            warn!("start() called on a stopped client");
            return;
        }
        self.internal_stop(&mut lifecycle);
        self.start_locked(&mut lifecycle);
    }

    /// Stop the client: cancel the reader and heartbeat, unregister from the
    /// server (best effort) and disable automatic restarts.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.stop_notify.notify_waiters();

        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.internal_stop(&mut lifecycle);
        self.inner.continuous_errors.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Stopped);

        info!(channels = ?self.channels(), "Event stream client stopped");
    }

    /// Tear down the current connection and reconnect after the backoff.
    /// No-op once stopped.
    #[instrument(skip(self))]
    pub async fn restart(&self) {
        self.restart_inner(None).await;
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    fn start_locked(&self, lifecycle: &mut Lifecycle) {
        if let Some(reader) = lifecycle.reader.take() {
            reader.abort();
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let client = self.clone();
        lifecycle.reader = Some(tokio::spawn(async move {
            client.run_reader(generation).await;
        }));

        self.mark_pulse();
        self.set_state(ConnectionState::Starting);
        debug!(generation, uri = %self.event_stream_uri(), "Event stream reader started");
    }

    /// Retire the current attempt: frames still buffered in its reader and
    /// failures it reports from now on are ignored.
    fn internal_stop(&self, lifecycle: &mut Lifecycle) {
        debug!("Stop()");

        let info = {
            let mut current = self.inner.connection_info.write();
            let retired = self.inner.generation.fetch_add(1, Ordering::SeqCst);
            self.inner.heartbeat.cancel(retired);
            current.take()
        };
        if let Some(url) = info.and_then(|info| info.unregister_url.clone()) {
            self.spawn_unregister(url);
        }

        if let Some(reader) = lifecycle.reader.take() {
            reader.abort();
        }
    }

    /// Fire-and-forget GET to the unregister URL; failures are only logged
    fn spawn_unregister(&self, url: String) {
        let client = self.clone();
        tokio::spawn(async move {
            let result = async {
                let url = client.resolve_url(&url)?;
                client
                    .http_client()
                    .get(url)
                    .timeout(client.request_timeout())
                    .send()
                    .await?
                    .error_for_status()?;
                Ok::<_, ClientError>(())
            }
            .await;

            match result {
                Ok(()) => debug!("Unregistered from event stream"),
                Err(e) => warn!(error = %e, "Failed to unregister from event stream"),
            }
        });
    }

    /// `expected`: restart only if this attempt is still the current one.
    /// Failure signals from an attempt that was already replaced are dropped.
    async fn restart_inner(&self, expected: Option<u64>) {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        if let Some(generation) = expected {
            let current = self.inner.generation.load(Ordering::SeqCst);
            if generation != current {
                debug!(generation, current, "Ignoring restart for a replaced connection");
                return;
            }
        }

        self.internal_stop(&mut lifecycle);
        if self.is_stopped() {
            return;
        }
        self.set_state(ConnectionState::Restarting);

        let errors = self.error_count();
        let delay = backoff_delay(errors);
        if !delay.is_zero() {
            debug!(
                delay_ms = delay.as_millis() as u64,
                continuous_errors = errors,
                "Sleeping before reconnect"
            );

            let stopped = self.inner.stop_notify.notified();
            tokio::pin!(stopped);
            if self.is_stopped() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut stopped => {
                    debug!("Stopped during reconnect backoff");
                    return;
                }
            }
        }

        if self.is_stopped() {
            return;
        }
        self.start_locked(&mut lifecycle);
    }

    fn spawn_restart(&self, generation: u64) {
        if self.is_stopped() {
            return;
        }
        let client = self.clone();
        tokio::spawn(async move {
            client.restart_inner(Some(generation)).await;
        });
    }

    /// Funnel for every connection failure: count it, report it, restart
    pub(crate) fn handle_failure(&self, err: ClientError, generation: u64) {
        if !self.is_current(generation) {
            debug!(error = %err, generation, "Ignoring failure of a retired connection");
            return;
        }

        let errors = self.inner.continuous_errors.fetch_add(1, Ordering::SeqCst) + 1;
        error!(
            error = %err,
            continuous_errors = errors,
            "OnExceptionReceived on #{}",
            self.connection_display_name()
        );

        if let Some(callback) = self.inner.callbacks.on_exception.get() {
            callback(&err);
        }

        self.spawn_restart(generation);
    }

    /// A malformed frame: report it and carry on with the stream
    fn report_protocol_error(&self, err: &ClientError) {
        warn!(error = %err, "Dropping malformed event");
        if let Some(callback) = self.inner.callbacks.on_exception.get() {
            callback(err);
        }
    }

    // =========================================================================
    // Reader
    // =========================================================================

    async fn run_reader(&self, generation: u64) {
        match self.read_event_stream(generation).await {
            Ok(()) => {
                debug!(
                    generation,
                    "Connection ended on {}",
                    self.connection_display_name()
                );
                self.spawn_restart(generation);
            }
            Err(e) => self.handle_failure(e, generation),
        }
    }

    async fn read_event_stream(&self, generation: u64) -> Result<()> {
        let url = self.event_stream_uri();
        debug!(%url, "Connecting to event stream");

        let response = self
            .inner
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::server_error(status, message));
        }

        let frames = decode_stream(response.bytes_stream());
        futures::pin_mut!(frames);

        while let Some(frame) = frames.next().await {
            let result = frame
                .and_then(parse_message)
                .and_then(|msg| self.dispatch(msg, generation));

            match result {
                Ok(()) => {}
                Err(e) if e.is_protocol() => self.report_protocol_error(&e),
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}
