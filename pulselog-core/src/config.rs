//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/pulselog/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/pulselog/` (~/.config/pulselog/)
//! - Data: `$XDG_DATA_HOME/pulselog/` (~/.local/share/pulselog/)
//! - State/Logs: `$XDG_STATE_HOME/pulselog/` (~/.local/state/pulselog/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

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
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Pending-event buffer limits
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Session id renewal
    #[serde(default)]
    pub session: SessionConfig,

    /// Flush trigger and delivery retry
    #[serde(default)]
    pub sync: SyncConfig,

    /// Remote collector endpoint (optional)
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Buffer capacity and flush threshold
#[derive(Debug, Deserialize, Clone)]
pub struct BufferConfig {
    /// Maximum number of pending events; exceeding it clears the buffer
    #[serde(default = "default_buffer_capacity")]
    pub capacity: usize,

    /// Every multiple of this many pending events raises a flush signal
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_buffer_capacity(),
            flush_threshold: default_flush_threshold(),
        }
    }
}

fn default_buffer_capacity() -> usize {
    120
}

fn default_flush_threshold() -> usize {
    40
}

/// Session configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Minutes after session start before a fresh session id is minted
    #[serde(default = "default_session_timeout_minutes")]
    pub timeout_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: default_session_timeout_minutes(),
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.timeout_minutes as i64)
    }
}

fn default_session_timeout_minutes() -> u64 {
    30
}

/// Flush trigger and delivery configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Quiet period after the last flush signal before a flush is requested
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Total delivery attempts per flush (including the first)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base retry delay; attempt `n` waits `n * retry_delay_ms`
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Source tag stamped on every delivered event
    #[serde(default = "default_source")]
    pub source: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            source: default_source(),
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_source() -> String {
    "RUST_SDK".to_string()
}

/// Remote collector configuration
///
/// When enabled, pending events are posted in batches to
/// `{server_url}/analytics/action-log/v1/batch-write/`.
#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    /// Enable/disable delivery
    #[serde(default)]
    pub enabled: bool,

    /// Collector base URL (e.g., `https://collector.example.com`)
    pub server_url: Option<String>,

    /// Bearer token sent with every request (optional)
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_collector_timeout")]
    pub timeout_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: None,
            api_key: None,
            timeout_secs: default_collector_timeout(),
        }
    }
}

impl CollectorConfig {
    /// Check if collector is properly configured and enabled
    pub fn is_ready(&self) -> bool {
        self.enabled && self.server_url.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        match self.server_url.as_deref() {
            None => {
                return Err(Error::Config(
                    "collector.server_url is required when collector is enabled".to_string(),
                ))
            }
            Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                return Err(Error::Config(format!(
                    "collector.server_url must be an http(s) URL, got {:?}",
                    url
                )))
            }
            Some(_) => {}
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "collector.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_collector_timeout() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
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
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.buffer.capacity == 0 {
            return Err(Error::Config(
                "buffer.capacity must be greater than 0".to_string(),
            ));
        }
        if self.buffer.flush_threshold == 0 || self.buffer.flush_threshold > self.buffer.capacity
        {
            return Err(Error::Config(format!(
                "buffer.flush_threshold must be between 1 and capacity ({})",
                self.buffer.capacity
            )));
        }
        if self.sync.max_attempts == 0 {
            return Err(Error::Config(
                "sync.max_attempts must be at least 1".to_string(),
            ));
        }
        self.collector.validate()
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/pulselog/config.toml` (~/.config/pulselog/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("pulselog").join("config.toml")
    }

    /// Returns the data directory path (for the persisted device id)
    ///
    /// `$XDG_DATA_HOME/pulselog/` (~/.local/share/pulselog/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("pulselog")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/pulselog/` (~/.local/state/pulselog/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("pulselog")
    }

    /// Returns the device id file path
    pub fn device_id_path() -> PathBuf {
        Self::data_dir().join("device_id")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/pulselog/pulselog.log` (~/.local/state/pulselog/pulselog.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("pulselog.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.buffer.capacity, 120);
        assert_eq!(config.buffer.flush_threshold, 40);
        assert_eq!(config.session.timeout_minutes, 30);
        assert_eq!(config.sync.debounce_ms, 1000);
        assert_eq!(config.sync.max_attempts, 3);
        assert_eq!(config.sync.source, "RUST_SDK");
        assert!(!config.collector.is_ready());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[buffer]
capacity = 60
flush_threshold = 20

[sync]
debounce_ms = 250
source = "DESKTOP"

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.buffer.capacity, 60);
        assert_eq!(config.buffer.flush_threshold, 20);
        assert_eq!(config.sync.debounce(), Duration::from_millis(250));
        assert_eq!(config.sync.max_attempts, 3);
        assert_eq!(config.sync.source, "DESKTOP");
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_above_capacity_is_rejected() {
        let mut config = Config::default();
        config.buffer.flush_threshold = 200;
        assert!(config.validate().is_err());

        config.buffer.flush_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_attempts_is_rejected() {
        let mut config = Config::default();
        config.sync.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_collector_config_validation() {
        // Disabled config is always valid
        let config = CollectorConfig::default();
        assert!(config.validate().is_ok());

        let config = CollectorConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CollectorConfig {
            enabled: true,
            server_url: Some("collector.example.com".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CollectorConfig {
            enabled: true,
            server_url: Some("https://collector.example.com".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(config.is_ready());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[collector]
enabled = true
server_url = "https://collector.example.com"
api_key = "pk_test"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert!(config.collector.is_ready());
        assert_eq!(config.collector.api_key.as_deref(), Some("pk_test"));
        assert_eq!(config.collector.timeout_secs, 30);
    }

    #[test]
    fn test_load_from_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[buffer]\ncapacity = 0\n").unwrap();

        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }
}
