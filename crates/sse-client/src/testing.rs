//! Test utilities for sse-client
//!
//! Provides an in-process HTTP server and a scripted event-stream endpoint
//! for integration tests.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{Result, ServerEventsClient};

/// A test server that automatically shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Create a new test server from an axum Router
    pub async fn start<S>(router: axum::Router<S>) -> Result<Self>
    where
        S: Clone + Send + Sync + 'static,
        axum::Router<S>: Into<axum::Router>,
    {
        // Bind to any available port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let router: axum::Router = router.into();

        // Spawn the server
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the base URL of the test server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Create an event stream client pointed at this server
    pub fn client<S: AsRef<str>>(&self, channels: &[S]) -> Result<ServerEventsClient> {
        ServerEventsClient::new(&self.base_url(), channels)
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Send shutdown signal if not already done
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Abort the task if still running
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Render one wire frame
pub fn frame(id: Option<i64>, data: &str) -> String {
    match id {
        Some(id) => format!("id: {}\ndata: {}\n\n", id, data),
        None => format!("data: {}\n\n", data),
    }
}

enum ScriptedBody {
    Chunks { chunks: Vec<Bytes>, keep_open: bool },
    Channel(mpsc::Receiver<Bytes>),
}

/// The response served for one `/event-stream` request
pub struct ScriptedConnection {
    status: StatusCode,
    body: ScriptedBody,
}

impl Default for ScriptedConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedConnection {
    /// An empty stream that ends immediately
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            body: ScriptedBody::Chunks {
                chunks: Vec::new(),
                keep_open: false,
            },
        }
    }

    /// A stream fed from a channel; it ends when the sender is dropped
    pub fn live() -> (Self, mpsc::Sender<Bytes>) {
        let (tx, rx) = mpsc::channel(64);
        let connection = Self {
            status: StatusCode::OK,
            body: ScriptedBody::Channel(rx),
        };
        (connection, tx)
    }

    /// Append raw bytes, sent as their own chunk
    pub fn chunk(mut self, bytes: impl Into<Bytes>) -> Self {
        if let ScriptedBody::Chunks { chunks, .. } = &mut self.body {
            chunks.push(bytes.into());
        }
        self
    }

    /// Append one frame
    pub fn frame(self, id: Option<i64>, data: &str) -> Self {
        self.chunk(frame(id, data))
    }

    /// Keep the connection open after the last chunk
    pub fn keep_open(mut self) -> Self {
        if let ScriptedBody::Chunks { keep_open, .. } = &mut self.body {
            *keep_open = true;
        }
        self
    }

    /// Answer with a non-success status and no stream
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

#[derive(Default)]
struct ScriptState {
    connections: Mutex<VecDeque<ScriptedConnection>>,
    stream_requests: AtomicUsize,
    heartbeat_requests: AtomicUsize,
    unregister_requests: AtomicUsize,
    heartbeat_status: AtomicU16,
    channels: Mutex<Vec<String>>,
    heartbeat_headers: Mutex<Vec<HeaderMap>>,
}

/// A server with `/event-stream`, `/event-heartbeat` and `/event-unregister`
/// endpoints that replays queued [`ScriptedConnection`]s.
///
/// Once the queue is empty, new stream requests are held open without data.
pub struct EventStreamServer {
    server: TestServer,
    state: Arc<ScriptState>,
}

impl EventStreamServer {
    pub async fn start() -> Result<Self> {
        let state = Arc::new(ScriptState {
            heartbeat_status: AtomicU16::new(200),
            ..Default::default()
        });

        let router = Router::new()
            .route("/event-stream", get(event_stream))
            .route("/event-heartbeat", get(heartbeat))
            .route("/event-unregister", get(unregister))
            .with_state(state.clone());

        let server = TestServer::start(router).await?;
        Ok(Self { server, state })
    }

    pub fn base_url(&self) -> String {
        self.server.base_url()
    }

    pub fn client<S: AsRef<str>>(&self, channels: &[S]) -> Result<ServerEventsClient> {
        self.server.client(channels)
    }

    /// Queue the response for the next stream request
    pub fn push(&self, connection: ScriptedConnection) {
        self.state.connections.lock().push_back(connection);
    }

    /// `cmd.onConnect` data pointing heartbeat and unregister back here
    pub fn connect_data(&self, heartbeat_interval_ms: u64, idle_timeout_ms: u64) -> String {
        let base = self.base_url();
        let payload = serde_json::json!({
            "id": "sub-1",
            "heartbeatUrl": format!("{}/event-heartbeat", base),
            "heartbeatIntervalMs": heartbeat_interval_ms,
            "idleTimeoutMs": idle_timeout_ms,
            "unRegisterUrl": format!("{}/event-unregister", base),
            "userId": "-1",
            "displayName": "user1",
            "isAuthenticated": "false",
        });
        format!("cmd.onConnect {}", payload)
    }

    pub fn set_heartbeat_status(&self, status: u16) {
        self.state.heartbeat_status.store(status, Ordering::SeqCst);
    }

    pub fn stream_requests(&self) -> usize {
        self.state.stream_requests.load(Ordering::SeqCst)
    }

    pub fn heartbeat_requests(&self) -> usize {
        self.state.heartbeat_requests.load(Ordering::SeqCst)
    }

    pub fn unregister_requests(&self) -> usize {
        self.state.unregister_requests.load(Ordering::SeqCst)
    }

    /// `channels` query value of the last stream request
    pub fn last_channels(&self) -> Vec<String> {
        self.state.channels.lock().clone()
    }

    /// Headers of every heartbeat request so far
    pub fn heartbeat_headers(&self) -> Vec<HeaderMap> {
        self.state.heartbeat_headers.lock().clone()
    }

    pub async fn shutdown(self) {
        self.server.shutdown().await;
    }
}

async fn event_stream(
    State(state): State<Arc<ScriptState>>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    state.stream_requests.fetch_add(1, Ordering::SeqCst);
    *state.channels.lock() = query
        .get("channels")
        .map(|c| c.split(',').map(String::from).collect())
        .unwrap_or_default();

    let connection = state
        .connections
        .lock()
        .pop_front()
        .unwrap_or_else(|| ScriptedConnection::new().keep_open());

    if !connection.status.is_success() {
        return (connection.status, Body::empty()).into_response();
    }

    let body: BoxStream<'static, std::result::Result<Bytes, Infallible>> = match connection.body {
        ScriptedBody::Chunks { chunks, keep_open } => {
            let chunks = stream::iter(chunks.into_iter().map(Ok));
            if keep_open {
                chunks.chain(stream::pending()).boxed()
            } else {
                chunks.boxed()
            }
        }
        ScriptedBody::Channel(rx) => ReceiverStream::new(rx).map(Ok).boxed(),
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(body),
    )
        .into_response()
}

async fn heartbeat(State(state): State<Arc<ScriptState>>, headers: HeaderMap) -> StatusCode {
    state.heartbeat_requests.fetch_add(1, Ordering::SeqCst);
    state.heartbeat_headers.lock().push(headers);
    StatusCode::from_u16(state.heartbeat_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn unregister(State(state): State<Arc<ScriptState>>) -> StatusCode {
    state.unregister_requests.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}
