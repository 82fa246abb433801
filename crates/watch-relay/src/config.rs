//! Relay configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (`RELAY_HOST`, `RELAY_PORT` or `PORT`,
//!   `RELAY_ALLOWED_ORIGINS`)
//! - TOML configuration file

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use watch_protocol::codec::MAX_MESSAGE_SIZE;

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path of the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Origins allowed to connect. Empty allows every origin.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of rooms.
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Frames queued per member before it is dropped.
    #[serde(default = "default_send_queue")]
    pub send_queue: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between protocol pings in milliseconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    /// Silence after which a member is dropped, in milliseconds.
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_ms: u64,

    /// Time allowed for the room request, in milliseconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("RELAY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("RELAY_PORT")
        .or_else(|_| std::env::var("PORT"))
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    std::env::var("RELAY_ALLOWED_ORIGINS")
        .map(|origins| parse_origins(&origins))
        .unwrap_or_default()
}

fn default_max_rooms() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    MAX_MESSAGE_SIZE
}

fn default_send_queue() -> usize {
    256
}

fn default_ping_interval() -> u64 {
    24_000 // 24 seconds
}

fn default_pong_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_handshake_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

/// Split a comma-separated origin list.
fn parse_origins(origins: &str) -> Vec<String> {
    origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(String::from)
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            websocket_path: default_ws_path(),
            allowed_origins: default_allowed_origins(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_rooms: default_max_rooms(),
            max_message_size: default_max_message_size(),
            send_queue: default_send_queue(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval(),
            pong_timeout_ms: default_pong_timeout(),
            handshake_timeout_ms: default_handshake_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl HeartbeatConfig {
    /// Interval between protocol pings.
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Silence after which a member is dropped.
    #[must_use]
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    /// Time allowed for the room request.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        // Try to load from default paths
        let config_paths = [
            "relay.toml",
            "/etc/watch-relay/relay.toml",
            "~/.config/watch-relay/relay.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Check the heartbeat timings.
    ///
    /// # Errors
    ///
    /// Returns an error if the ping interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.ping_interval_ms == 0 {
            bail!("heartbeat.ping_interval_ms must be greater than zero");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Whether a connection from `origin` is accepted.
    #[must_use]
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        origin.is_some_and(|origin| self.allowed_origins.iter().any(|o| o == origin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let config = Config::default();
        assert_eq!(config.websocket_path, "/ws");
        assert_eq!(config.limits.max_message_size, 512);
        assert_eq!(config.limits.send_queue, 256);
        assert_eq!(config.heartbeat.ping_interval(), Duration::from_secs(24));
        assert_eq!(config.heartbeat.pong_timeout(), Duration::from_secs(30));
        assert_eq!(config.heartbeat.handshake_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_config_bind_addr() {
        let config: Config = toml::from_str("host = \"127.0.0.1\"\nport = 8080").unwrap();
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        let config: Config = toml::from_str("host = \"not a host\"").unwrap();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000
            allowed_origins = ["chrome-extension://abc"]

            [limits]
            max_rooms = 50

            [heartbeat]
            pong_timeout_ms = 5000
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_rooms, 50);
        assert_eq!(config.limits.send_queue, 256);
        assert_eq!(config.heartbeat.pong_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_ping_interval_is_rejected() {
        let path = std::env::temp_dir().join(format!(
            "watch-relay-zero-ping-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[heartbeat]\nping_interval_ms = 0\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(format!("{err:#}").contains("ping_interval_ms must be greater than zero"));

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_origin_allow_list() {
        let mut config: Config = toml::from_str("allowed_origins = []").unwrap();
        assert!(config.origin_allowed(None));
        assert!(config.origin_allowed(Some("http://anything")));

        config.allowed_origins = parse_origins("http://localhost:8080, chrome-extension://abc,");
        assert_eq!(config.allowed_origins.len(), 2);
        assert!(config.origin_allowed(Some("chrome-extension://abc")));
        assert!(!config.origin_allowed(Some("http://evil.example")));
        assert!(!config.origin_allowed(None));
    }
}
