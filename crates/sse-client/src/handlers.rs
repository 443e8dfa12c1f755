//! Handler tables and user callbacks
//!
//! Registration is safe at any time, including from inside a callback: the
//! dispatch path clones the handler out of the table before invoking it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::client::ServerEventsClient;
use crate::error::ClientError;
use crate::message::{ConnectionInfo, ServerCommand, ServerEventMessage};

/// Handler invoked for a named target or an op
pub type Handler = Arc<dyn Fn(&ServerEventsClient, &ServerEventMessage) + Send + Sync>;

pub type ConnectCallback = dyn Fn(&ConnectionInfo) + Send + Sync;
pub type MessageCallback = dyn Fn(&ServerEventMessage) + Send + Sync;
pub type CommandCallback = dyn Fn(&ServerCommand) + Send + Sync;
pub type ExceptionCallback = dyn Fn(&ClientError) + Send + Sync;
/// Customizes a heartbeat request before it is sent
pub type RequestFilter = dyn Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send + Sync;

/// Thread-safe map from a key (target or op name) to its handler.
///
/// Keys are matched exactly; registering an existing key replaces it.
#[derive(Clone, Default)]
pub struct HandlerTable {
    entries: Arc<RwLock<HashMap<String, Handler>>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for `key`
    pub fn register<F>(&self, key: impl Into<String>, handler: F)
    where
        F: Fn(&ServerEventsClient, &ServerEventMessage) + Send + Sync + 'static,
    {
        self.entries.write().insert(key.into(), Arc::new(handler));
    }

    /// Remove a handler; returns whether one was registered
    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<Handler> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        f.debug_struct("HandlerTable").field("keys", &keys).finish()
    }
}

/// A single replaceable callback
pub struct CallbackSlot<T: ?Sized> {
    inner: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> Default for CallbackSlot<T> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }
}

impl<T: ?Sized> CallbackSlot<T> {
    pub fn set(&self, callback: Arc<T>) {
        *self.inner.write() = Some(callback);
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.inner.read().clone()
    }
}

/// Application callbacks, all optional
#[derive(Default)]
pub(crate) struct Callbacks {
    pub on_connect: CallbackSlot<ConnectCallback>,
    pub on_message: CallbackSlot<MessageCallback>,
    pub on_command: CallbackSlot<CommandCallback>,
    pub on_heartbeat: CallbackSlot<CommandCallback>,
    pub on_exception: CallbackSlot<ExceptionCallback>,
    pub heartbeat_request_filter: CallbackSlot<RequestFilter>,
}
