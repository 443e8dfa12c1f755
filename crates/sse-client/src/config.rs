//! Client configuration

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ClientError, Result};

/// Default connection timeout
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10 * 1000;
/// Default timeout for heartbeat and unregister requests
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30 * 1000;

/// Configuration for a [`ServerEventsClient`](crate::ServerEventsClient)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the server (e.g., "http://localhost:5000")
    pub base_uri: String,
    /// Channels to subscribe to
    pub channels: Vec<String>,
    /// TCP connect timeout for every request
    pub connect_timeout_ms: u64,
    /// Total timeout for heartbeat and unregister requests.
    /// The event stream itself is never subject to a total timeout.
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_uri: String::new(),
            channels: Vec::new(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    pub fn new<S: AsRef<str>>(base_uri: &str, channels: &[S]) -> Self {
        Self {
            base_uri: base_uri.to_string(),
            channels: channels.iter().map(|c| c.as_ref().to_string()).collect(),
            ..Default::default()
        }
    }

    /// Check the configuration can produce an event stream URL
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() || self.channels.iter().all(|c| c.trim().is_empty()) {
            return Err(ClientError::ConfigError("channels is empty".to_string()));
        }
        Url::parse(&self.base_uri)?;
        Ok(())
    }

    /// `<base_uri>/event-stream?channels=<comma-joined channels>`
    pub fn event_stream_uri(&self) -> Result<Url> {
        let base = self.base_uri.trim_end_matches('/');
        let mut url = Url::parse(&format!("{}/event-stream", base))?;
        url.query_pairs_mut()
            .append_pair("channels", &self.channels.join(","));
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_stream_uri() {
        let config = ClientConfig::new("http://localhost:5000/api/", &["home", "work"]);
        let url = config.event_stream_uri().unwrap();

        assert_eq!(url.path(), "/api/event-stream");
        let channels: Vec<_> = url.query_pairs().collect();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].0, "channels");
        assert_eq!(channels[0].1, "home,work");
    }

    #[test]
    fn test_validate() {
        assert!(ClientConfig::new("http://localhost", &["home"]).validate().is_ok());

        let empty: &[&str] = &[];
        assert!(matches!(
            ClientConfig::new("http://localhost", empty).validate(),
            Err(ClientError::ConfigError(_))
        ));
        assert!(matches!(
            ClientConfig::new("not a url", &["home"]).validate(),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"base_uri":"http://h","channels":["a"]}"#).unwrap();
        assert_eq!(config.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
        assert_eq!(config.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
    }
}
