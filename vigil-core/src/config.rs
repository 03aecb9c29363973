//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/vigil/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/vigil/` (~/.config/vigil/)
//! - Data: `$XDG_DATA_HOME/vigil/` (~/.local/share/vigil/)
//! - State/Logs: `$XDG_STATE_HOME/vigil/` (~/.local/state/vigil/)
//!
//! Configuration is assumed valid: malformed values degrade behavior
//! (a zero batch size flushes every event immediately) rather than failing.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Delivery batcher and ingestion API configuration
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Offline durable queue configuration
    #[serde(default)]
    pub offline: OfflineConfig,

    /// In-memory pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the delivery batcher and the ingestion API client.
///
/// `batch_size`, `flush_interval_ms`, `retry_attempts` and `retry_delay_ms`
/// deliberately share names with [`OfflineConfig`] but are configured
/// independently: the batcher targets low-latency submission, the offline
/// queue targets resilient bulk sync.
#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// Ingestion server URL (e.g., `https://proctor.example.com`)
    pub server_url: Option<String>,

    /// API key for bearer authentication
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Buffer length that triggers an immediate flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Periodic flush interval in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Total delivery attempts per event
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base retry delay in milliseconds (linear backoff: delay * attempt)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_key: None,
            timeout_secs: default_timeout_secs(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl DeliveryConfig {
    /// Check if the delivery collaborator can be constructed
    pub fn is_ready(&self) -> bool {
        self.server_url.is_some()
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    10
}

fn default_flush_interval_ms() -> u64 {
    2000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

/// Offline durable queue configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OfflineConfig {
    /// Maximum number of queued entries; oldest are evicted first
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Periodic sync interval in milliseconds
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// Sync attempts per entry before it is marked failed
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Minimum delay between sync attempts covering the same entry
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            sync_interval_ms: default_sync_interval_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_sync_interval_ms() -> u64 {
    5000
}

/// In-memory pipeline configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Maximum accepted events retained in memory for aggregation reads
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
        }
    }
}

fn default_max_events() -> usize {
    1000
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/vigil/config.toml` (~/.config/vigil/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("vigil").join("config.toml")
    }

    /// Returns the data directory path (for the offline queue store)
    ///
    /// `$XDG_DATA_HOME/vigil/` (~/.local/share/vigil/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("vigil")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/vigil/` (~/.local/state/vigil/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("vigil")
    }

    /// Returns the offline queue database path
    ///
    /// `$XDG_DATA_HOME/vigil/queue.db` (~/.local/share/vigil/queue.db)
    pub fn queue_db_path() -> PathBuf {
        Self::data_dir().join("queue.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/vigil/vigil.log` (~/.local/state/vigil/vigil.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("vigil.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.delivery.server_url.is_none());
        assert!(!config.delivery.is_ready());
        assert_eq!(config.delivery.batch_size, 10);
        assert_eq!(config.delivery.flush_interval_ms, 2000);
        assert_eq!(config.delivery.retry_attempts, 3);
        assert_eq!(config.offline.max_queue_size, 1000);
        assert_eq!(config.offline.sync_interval_ms, 5000);
        assert_eq!(config.pipeline.max_events, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[delivery]
server_url = "https://proctor.example.com"
api_key = "pk_live_xxxxxxxx"
batch_size = 25
flush_interval_ms = 500

[offline]
max_queue_size = 50
sync_interval_ms = 1000

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert!(config.delivery.is_ready());
        assert_eq!(
            config.delivery.server_url.as_deref(),
            Some("https://proctor.example.com")
        );
        assert_eq!(config.delivery.batch_size, 25);
        assert_eq!(config.delivery.flush_interval_ms, 500);
        // Unset fields fall back to defaults
        assert_eq!(config.delivery.retry_attempts, 3);
        assert_eq!(config.offline.max_queue_size, 50);
        assert_eq!(config.offline.sync_interval_ms, 1000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_independent_retry_settings() {
        let toml = r#"
[delivery]
retry_attempts = 5
retry_delay_ms = 100

[offline]
retry_attempts = 2
retry_delay_ms = 60000
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.delivery.retry_attempts, 5);
        assert_eq!(config.offline.retry_attempts, 2);
        assert_eq!(config.delivery.retry_delay_ms, 100);
        assert_eq!(config.offline.retry_delay_ms, 60000);
    }
}
