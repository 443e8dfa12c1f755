//! Error types for event stream client operations

use std::num::ParseIntError;

use thiserror::Error;

/// Result type alias for event stream client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while connecting to, reading from, or routing an event stream
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to decode a JSON payload
    #[error("Invalid JSON payload: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Server returned an error response
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// Client configuration rejected
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// A `data` value without the space separating selector and payload
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A selector without an `op.target` pair
    #[error("Invalid Selector '{0}'")]
    InvalidSelector(String),

    /// An `id` line whose value is not an integer
    #[error("Invalid event id '{value}': {source}")]
    InvalidEventId {
        value: String,
        #[source]
        source: ParseIntError,
    },

    /// No heartbeat pulse arrived within the idle timeout
    #[error("Last Heartbeat Pulse was {elapsed_ms}ms ago")]
    HeartbeatTimeout { elapsed_ms: u64 },
}

impl ClientError {
    /// Create a server error from status code and message
    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status,
            message: message.into(),
        }
    }

    /// Whether this error only invalidates the current frame.
    ///
    /// Protocol errors drop the offending message; every other error is a
    /// connection failure that leads to a restart.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::MalformedMessage(_)
                | Self::InvalidSelector(_)
                | Self::InvalidEventId { .. }
                | Self::JsonError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_classification() {
        assert!(ClientError::InvalidSelector("cmd".into()).is_protocol());
        assert!(ClientError::MalformedMessage("cmd.onConnect".into()).is_protocol());
        let source = "abc".parse::<i64>().unwrap_err();
        assert!(ClientError::InvalidEventId {
            value: "abc".into(),
            source
        }
        .is_protocol());
        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(ClientError::JsonError(json).is_protocol());

        assert!(!ClientError::HeartbeatTimeout { elapsed_ms: 31_000 }.is_protocol());
        assert!(!ClientError::server_error(503, "unavailable").is_protocol());
    }

    #[test]
    fn test_heartbeat_timeout_message() {
        let err = ClientError::HeartbeatTimeout { elapsed_ms: 30_001 };
        assert_eq!(err.to_string(), "Last Heartbeat Pulse was 30001ms ago");
    }
}
