//! Configuration loading for the Parley client.
//!
//! Configuration is loaded from a TOML file. Every field has a default,
//! so an empty file (or [`ClientConfig::default`]) is a working setup
//! against a local development server.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for a chat session.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Coordination server endpoints.
    #[serde(default)]
    pub server: ServerConfig,
    /// History pagination.
    #[serde(default)]
    pub history: HistoryConfig,
    /// Typing indicators.
    #[serde(default)]
    pub typing: TypingConfig,
    /// Message send and delete policy.
    #[serde(default)]
    pub messages: MessagesConfig,
    /// Call negotiation.
    #[serde(default)]
    pub calls: CallsConfig,
}

/// Coordination server endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// WebSocket URL of the event channel.
    #[serde(default = "default_event_endpoint")]
    pub event_endpoint: String,
    /// Base URL of the HTTP API (no trailing slash).
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

/// History pagination.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Messages per page (default: 20).
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

/// Typing indicators.
#[derive(Debug, Clone, Deserialize)]
pub struct TypingConfig {
    /// Quiet period before an indicator lapses, in milliseconds (default: 2000).
    #[serde(default = "default_typing_timeout_ms")]
    pub timeout_ms: u64,
}

/// Message send and delete policy.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesConfig {
    /// Age below which a message may be deleted for everyone (default: 120).
    #[serde(default = "default_delete_for_everyone_secs")]
    pub delete_for_everyone_secs: u64,
    /// Maximum unconfirmed sends (default: 64).
    #[serde(default = "default_max_pending_sends")]
    pub max_pending_sends: usize,
}

/// Call negotiation.
#[derive(Debug, Clone, Deserialize)]
pub struct CallsConfig {
    /// ICE server URLs handed to every peer connection.
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,
}

// Default value functions
fn default_event_endpoint() -> String {
    "ws://localhost:5001/events".to_string()
}

fn default_api_base() -> String {
    "http://localhost:5001/api".to_string()
}

fn default_page_size() -> usize {
    20
}

fn default_typing_timeout_ms() -> u64 {
    2000
}

fn default_delete_for_everyone_secs() -> u64 {
    120 // 2 minutes
}

fn default_max_pending_sends() -> usize {
    64
}

fn default_ice_servers() -> Vec<String> {
    vec![
        "stun:stun.l.google.com:19302".to_string(),
        "stun:stun1.l.google.com:19302".to_string(),
    ]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            event_endpoint: default_event_endpoint(),
            api_base: default_api_base(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_typing_timeout_ms(),
        }
    }
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            delete_for_everyone_secs: default_delete_for_everyone_secs(),
            max_pending_sends: default_max_pending_sends(),
        }
    }
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            history: HistoryConfig::default(),
            typing: TypingConfig::default(),
            messages: MessagesConfig::default(),
            calls: CallsConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the session relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history.page_size == 0 {
            return Err(ConfigError::Invalid(
                "history.page_size must be greater than zero".into(),
            ));
        }
        if !self.calls.ice_servers.iter().any(|url| url.starts_with("stun:")) {
            return Err(ConfigError::Invalid(
                "calls.ice_servers must contain at least one stun: URL".into(),
            ));
        }
        Ok(())
    }

    /// Typing quiet period.
    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing.timeout_ms)
    }

    /// Delete-for-everyone window.
    pub fn delete_for_everyone_window(&self) -> Duration {
        Duration::from_secs(self.messages.delete_for_everyone_secs)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Parsed but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ClientConfig::default();
        assert_eq!(config.history.page_size, 20);
        assert_eq!(config.typing_timeout(), Duration::from_secs(2));
        assert_eq!(config.delete_for_everyone_window(), Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
event_endpoint = "wss://chat.example.com/events"
api_base = "https://chat.example.com/api"

[history]
page_size = 50

[typing]
timeout_ms = 3000

[messages]
delete_for_everyone_secs = 300
max_pending_sends = 16

[calls]
ice_servers = ["stun:stun.example.com:3478", "turn:turn.example.com:3478"]
"#;

        let config: ClientConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.event_endpoint, "wss://chat.example.com/events");
        assert_eq!(config.server.api_base, "https://chat.example.com/api");
        assert_eq!(config.history.page_size, 50);
        assert_eq!(config.typing.timeout_ms, 3000);
        assert_eq!(config.messages.delete_for_everyone_secs, 300);
        assert_eq!(config.messages.max_pending_sends, 16);
        assert_eq!(config.calls.ice_servers.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.event_endpoint, "ws://localhost:5001/events");
        assert_eq!(config.messages.max_pending_sends, 64);
        assert_eq!(config.calls.ice_servers.len(), 2);
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let config: ClientConfig = toml::from_str("[history]\npage_size = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ice_servers_require_stun() {
        let toml = r#"
[calls]
ice_servers = ["turn:turn.example.com:3478"]
"#;
        let config: ClientConfig = toml::from_str(toml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ClientConfig::from_file(std::path::Path::new("/nonexistent/parley.toml"))
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/parley.toml"));
    }
}
