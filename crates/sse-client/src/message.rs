//! Message types produced by the event stream

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Default heartbeat interval when the server does not announce one
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 10 * 1000;
/// Default idle timeout when the server does not announce one
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30 * 1000;

/// One frame as read off the wire, before selector parsing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    /// Value of the `id` line, if one was seen
    pub event_id: Option<i64>,
    /// Value of the `data` line(s)
    pub data: String,
}

/// A frame with its selector broken out into routing parts
///
/// `data` has the form `[channel@]op.target[$cssSelector] <json>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEventMessage {
    pub event_id: Option<i64>,
    pub data: String,
    pub channel: Option<String>,
    pub selector: String,
    pub op: String,
    pub target: String,
    pub css_selector: Option<String>,
    pub json: String,
}

impl ServerEventMessage {
    /// Parse the JSON payload into a field accessor
    pub fn fields(&self) -> Result<JsonFields> {
        JsonFields::parse(&self.json)
    }
}

/// Connection details announced by the server in `cmd.onConnect`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub event_id: Option<i64>,
    pub id: Option<String>,
    pub heartbeat_url: Option<String>,
    pub heartbeat_interval_ms: u64,
    pub idle_timeout_ms: u64,
    pub unregister_url: Option<String>,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub is_authenticated: bool,
    pub profile_url: Option<String>,
}

impl ConnectionInfo {
    /// Build connection info from an `onConnect` message.
    ///
    /// Every field is optional in the payload and falls back to its default.
    pub fn from_message(msg: &ServerEventMessage) -> Result<Self> {
        let fields = msg.fields()?;
        Ok(Self {
            event_id: msg.event_id,
            id: fields.get_str("id"),
            heartbeat_url: fields.get_str("heartbeatUrl"),
            heartbeat_interval_ms: fields
                .get_u64_or("heartbeatIntervalMs", DEFAULT_HEARTBEAT_INTERVAL_MS),
            idle_timeout_ms: fields.get_u64_or("idleTimeoutMs", DEFAULT_IDLE_TIMEOUT_MS),
            unregister_url: fields.get_str("unRegisterUrl"),
            user_id: fields.get_str("userId"),
            display_name: fields.get_str("displayName"),
            is_authenticated: fields.get_str("isAuthenticated").as_deref() == Some("true"),
            profile_url: fields.get_str("profileUrl"),
        })
    }
}

/// Kind of a channel membership / liveness command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandKind {
    Join,
    Leave,
    Update,
    Heartbeat,
}

impl CommandKind {
    /// Map a reserved `cmd.*` target to its command kind.
    ///
    /// `onConnect` is not a command; it is handled by the supervisor.
    pub fn from_target(target: &str) -> Option<Self> {
        match target {
            "onJoin" => Some(Self::Join),
            "onLeave" => Some(Self::Leave),
            "onUpdate" => Some(Self::Update),
            "onHeartbeat" => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

/// A lifecycle command delivered over the stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCommand {
    pub kind: CommandKind,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub channels: Vec<String>,
    pub profile_url: Option<String>,
    pub message: ServerEventMessage,
}

impl ServerCommand {
    pub fn from_message(kind: CommandKind, message: ServerEventMessage) -> Result<Self> {
        let fields = message.fields()?;
        let channels = fields
            .get_str("channels")
            .map(|c| {
                c.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            kind,
            user_id: fields.get_str("userId"),
            display_name: fields.get_str("displayName"),
            channels,
            profile_url: fields.get_str("profileUrl"),
            message,
        })
    }
}

/// Name-based accessors over a JSON object payload
#[derive(Debug, Clone, Default)]
pub struct JsonFields {
    map: Map<String, Value>,
}

impl JsonFields {
    /// Parse a payload. A blank payload or a non-object value yields no fields.
    pub fn parse(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        let map = match serde_json::from_str::<Value>(json)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(Self { map })
    }

    /// Get a field as text; scalars are rendered, `null` counts as absent
    pub fn get_str(&self, name: &str) -> Option<String> {
        match self.map.get(name)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Get a non-negative integer field, accepting numbers and numeric strings
    pub fn get_u64_or(&self, name: &str, default: u64) -> u64 {
        match self.map.get(name) {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }
}
