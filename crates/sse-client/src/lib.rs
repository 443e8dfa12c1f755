//! Server Event Stream Client
//!
//! Keeps a long-lived connection to an `event-stream` endpoint, decodes the
//! line-oriented frame protocol, routes each message by its selector and
//! reconnects with a jittered backoff when the connection fails.
//!
//! # Example
//!
//! ```rust,no_run
//! use sse_client::ServerEventsClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ServerEventsClient::new("http://localhost:5000", &["home"])?;
//!
//!     client
//!         .on_connect(|info| println!("connected: {:?}", info.id))
//!         .on_message(|msg| println!("{}: {}", msg.selector, msg.json))
//!         .on_exception(|err| eprintln!("stream error: {err}"));
//!
//!     client.start().await;
//!     tokio::signal::ctrl_c().await?;
//!     client.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Wire format
//!
//! Frames are blocks of `label: value` lines separated by a blank line. The
//! `id` label carries an integer event id and `data` carries
//! `[channel@]op.target[$cssSelector] <json>`.
//!
//! # Testing
//!
//! The `testing` module provides an in-process server for integration tests:
//!
//! ```rust,ignore
//! use sse_client::testing::TestServer;
//!
//! let server = TestServer::start(router).await?;
//! let client = server.client(&["home"])?;
//! ```

pub mod backoff;
mod client;
pub mod config;
pub mod decoder;
mod error;
pub mod handlers;
mod heartbeat;
pub mod message;
mod router;
pub mod selector;
pub mod testing;

pub use client::{ConnectionState, ServerEventsClient};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use handlers::{Handler, HandlerTable};
pub use heartbeat::HeartbeatState;
pub use message::{
    CommandKind, ConnectionInfo, JsonFields, RawEvent, ServerCommand, ServerEventMessage,
};
pub use router::{COMMAND_OP, CONNECT_TARGET};
