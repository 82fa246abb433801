//! Client configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration. The relay URL can also be set with `WATCH_RELAY_URL`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use watch_transport::link::{LinkConfig, DEFAULT_RELAY_URL};

use crate::engine::EngineConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid configuration.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// An interval that must be positive was zero.
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay endpoint.
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// Keep-alive interval in milliseconds.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_ms: u64,

    /// Reconciliation timing.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Player discovery.
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// Reconciliation timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Drift in seconds tolerated before seeking to a remote position.
    #[serde(default = "default_seek_tolerance")]
    pub seek_tolerance_secs: f64,

    /// How long local events are not re-broadcast after applying a remote state.
    #[serde(default = "default_suppression_window")]
    pub suppression_window_ms: u64,

    /// Delay between the end of an ad and resuming playback.
    #[serde(default = "default_ad_finish_debounce")]
    pub ad_finish_debounce_ms: u64,

    /// Delay between attaching to the video and the first broadcast.
    #[serde(default = "default_initial_sync_delay")]
    pub initial_sync_delay_ms: u64,
}

/// Player discovery and ad detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Interval between attempts to find a ready video.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Attempts before giving up on finding the video.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Interval between ad checks once attached.
    #[serde(default = "default_ad_poll_interval")]
    pub ad_poll_interval_ms: u64,
}

// Default value functions
fn default_relay_url() -> String {
    std::env::var("WATCH_RELAY_URL").unwrap_or_else(|_| DEFAULT_RELAY_URL.to_string())
}

fn default_keepalive_interval() -> u64 {
    20_000 // 20 seconds
}

fn default_seek_tolerance() -> f64 {
    1.5
}

fn default_suppression_window() -> u64 {
    200
}

fn default_ad_finish_debounce() -> u64 {
    1_000
}

fn default_initial_sync_delay() -> u64 {
    500
}

fn default_poll_interval() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    20
}

fn default_ad_poll_interval() -> u64 {
    250
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            keepalive_interval_ms: default_keepalive_interval(),
            sync: SyncConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            seek_tolerance_secs: default_seek_tolerance(),
            suppression_window_ms: default_suppression_window(),
            ad_finish_debounce_ms: default_ad_finish_debounce(),
            initial_sync_delay_ms: default_initial_sync_delay(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
            ad_poll_interval_ms: default_ad_poll_interval(),
        }
    }
}

impl ClientConfig {
    /// Parse configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be parsed or fails
    /// [`validate`](Self::validate).
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every periodic interval is positive.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroInterval`] naming the first zero interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("keepalive_interval_ms", self.keepalive_interval_ms),
            ("discovery.poll_interval_ms", self.discovery.poll_interval_ms),
            ("discovery.ad_poll_interval_ms", self.discovery.ad_poll_interval_ms),
        ];
        match intervals.into_iter().find(|(_, ms)| *ms == 0) {
            Some((field, _)) => Err(ConfigError::ZeroInterval(field)),
            None => Ok(()),
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml_str(&contents)
    }

    /// Settings for the relay link.
    #[must_use]
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            url: self.relay_url.clone(),
            keepalive_interval: Duration::from_millis(self.keepalive_interval_ms),
        }
    }

    /// Settings for the reconciliation engine.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            seek_tolerance: self.sync.seek_tolerance_secs,
            suppression_window: Duration::from_millis(self.sync.suppression_window_ms),
            ad_finish_debounce: Duration::from_millis(self.sync.ad_finish_debounce_ms),
            initial_sync_delay: Duration::from_millis(self.sync.initial_sync_delay_ms),
        }
    }

    /// Interval between attempts to find the video.
    #[must_use]
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery.poll_interval_ms)
    }

    /// Interval between ad checks.
    #[must_use]
    pub fn ad_poll_interval(&self) -> Duration {
        Duration::from_millis(self.discovery.ad_poll_interval_ms)
    }
}
