//! Configuration file handling for sse-listen

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_SERVER: &str = "http://localhost:5000";
pub const DEFAULT_CHANNEL: &str = "home";

/// Configuration for the listener
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Default server URL
    pub server: Option<String>,
    /// Channels to subscribe to
    pub channels: Option<Vec<String>>,
    /// Default output format
    pub output: Option<String>,
    /// Disable colored output
    pub no_color: Option<bool>,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("sse-listen");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(
        &self,
        server: Option<&str>,
        channels: Option<&[String]>,
        output: Option<&str>,
        no_color: bool,
    ) -> MergedConfig {
        let channels = channels
            .filter(|c| !c.is_empty())
            .map(<[String]>::to_vec)
            .or_else(|| self.channels.clone().filter(|c| !c.is_empty()))
            .unwrap_or_else(|| vec![DEFAULT_CHANNEL.to_string()]);

        MergedConfig {
            server: server
                .map(String::from)
                .or_else(|| self.server.clone())
                .unwrap_or_else(|| DEFAULT_SERVER.to_string()),
            channels,
            output: output
                .map(String::from)
                .or_else(|| self.output.clone())
                .unwrap_or_else(|| "text".to_string()),
            no_color: no_color || self.no_color.unwrap_or(false),
        }
    }
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedConfig {
    pub server: String,
    pub channels: Vec<String>,
    pub output: String,
    pub no_color: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
server = "http://events.local:8080"
channels = ["home", "work"]
output = "json"
no_color = true
"#,
        );

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.server.as_deref(), Some("http://events.local:8080"));
        assert_eq!(
            config.channels,
            Some(vec!["home".to_string(), "work".to_string()])
        );
        assert_eq!(config.output.as_deref(), Some("json"));
        assert_eq!(config.no_color, Some(true));
    }

    #[test]
    fn test_load_partial_file() {
        let file = write_config(r#"server = "http://other:5000""#);

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.server.as_deref(), Some("http://other:5000"));
        assert!(config.channels.is_none());
    }

    #[test]
    fn test_load_invalid_file() {
        let file = write_config("server = [not toml");
        let err = Config::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_merge_defaults() {
        let merged = Config::default().merge_with_args(None, None, None, false);
        assert_eq!(merged.server, DEFAULT_SERVER);
        assert_eq!(merged.channels, vec![DEFAULT_CHANNEL.to_string()]);
        assert_eq!(merged.output, "text");
        assert!(!merged.no_color);
    }

    #[test]
    fn test_merge_args_override_file() {
        let config = Config {
            server: Some("http://file:1".into()),
            channels: Some(vec!["file".into()]),
            output: Some("json".into()),
            no_color: Some(true),
        };
        let channels = vec!["cli".to_string()];

        let merged = config.merge_with_args(
            Some("http://cli:2"),
            Some(channels.as_slice()),
            Some("text"),
            false,
        );
        assert_eq!(merged.server, "http://cli:2");
        assert_eq!(merged.channels, channels);
        assert_eq!(merged.output, "text");
        // Either source can disable color
        assert!(merged.no_color);
    }

    #[test]
    fn test_merge_empty_channels_fall_back() {
        let config = Config {
            channels: Some(vec!["work".into()]),
            ..Default::default()
        };

        let merged = config.merge_with_args(None, Some(&[][..]), None, false);
        assert_eq!(merged.channels, vec!["work".to_string()]);
    }
}
