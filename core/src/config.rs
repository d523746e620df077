//! Configuration for the data layer
//!
//! This module provides configuration for the backend connection, the
//! change feeds and user-facing notifications.

use std::time::Duration;
use log::LevelFilter;
use serde::{Serialize, Deserialize};

use crate::error::{CoreError, Result};
use crate::memory::DEFAULT_FEED_BUFFER;
use crate::utils::timer::DEFAULT_SLOW_THRESHOLD;

/// Backend connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the hosted backend, e.g. `https://project.example.co`
    pub url: String,

    /// Public API key sent with every request
    pub api_key: String,

    /// Timeout for one REST request
    pub request_timeout: Duration,

    /// Delay before a dropped change feed reconnects
    pub reconnect_delay: Duration,

    /// Buffered change events per subscriber
    pub feed_buffer: usize,

    /// Requests slower than this are logged as slow
    pub slow_request_threshold: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            url: "http://127.0.0.1:54321".to_string(),
            api_key: String::new(),
            request_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            feed_buffer: DEFAULT_FEED_BUFFER,
            slow_request_threshold: DEFAULT_SLOW_THRESHOLD,
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Whether successful mutations raise a notification
    pub success_messages: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        NotificationConfig {
            success_messages: true,
        }
    }
}

/// Core configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Backend configuration
    pub backend: BackendConfig,

    /// Notification configuration
    pub notifications: NotificationConfig,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to enable debug mode
    #[serde(default)]
    pub debug_mode: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl CoreConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        CoreConfig {
            log_level: default_log_level(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &str) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let config: CoreConfig = serde_json::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file(&self, path: &str) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Check the values a client cannot work without
    pub fn validate(&self) -> Result<()> {
        let url = self.backend.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(CoreError::ConfigError(format!(
                "backend url must be http(s), got '{}'",
                self.backend.url
            )));
        }
        if self.backend.feed_buffer == 0 {
            return Err(CoreError::ConfigError("feed_buffer must be positive".to_string()));
        }
        self.log_level_filter()?;
        Ok(())
    }

    /// Maximum log level; debug mode raises it to at least `debug`
    pub fn log_level_filter(&self) -> Result<LevelFilter> {
        let level: LevelFilter = self
            .log_level
            .trim()
            .parse()
            .map_err(|_| CoreError::ConfigError(format!("unknown log level '{}'", self.log_level)))?;
        if self.debug_mode {
            return Ok(level.max(LevelFilter::Debug));
        }
        Ok(level)
    }

    /// Create a development configuration
    pub fn development() -> Self {
        let mut config = Self::new();
        config.debug_mode = true;
        config.log_level = "debug".to_string();
        config.backend.reconnect_delay = Duration::from_secs(1);
        config
    }

    /// Create a production configuration
    pub fn production() -> Self {
        let mut config = Self::new();
        config.debug_mode = false;
        config.log_level = "info".to_string();
        config.backend.request_timeout = Duration::from_secs(15);
        config
    }

    /// Create a testing configuration
    pub fn testing() -> Self {
        let mut config = Self::new();
        config.debug_mode = true;
        config.log_level = "debug".to_string();
        config.backend.request_timeout = Duration::from_secs(5);
        config.backend.reconnect_delay = Duration::from_millis(50);
        config.notifications.success_messages = false;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = CoreConfig::new();

        assert_eq!(config.backend.request_timeout, Duration::from_secs(30));
        assert_eq!(config.backend.feed_buffer, DEFAULT_FEED_BUFFER);
        assert!(config.notifications.success_messages);
        assert_eq!(config.log_level, "info");
        assert!(!config.debug_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        let config = CoreConfig::development();
        assert!(config.debug_mode);
        assert_eq!(config.log_level, "debug");

        let config = CoreConfig::production();
        assert!(!config.debug_mode);
        assert_eq!(config.backend.request_timeout, Duration::from_secs(15));

        let config = CoreConfig::testing();
        assert_eq!(config.backend.reconnect_delay, Duration::from_millis(50));
        assert!(!config.notifications.success_messages);
    }

    #[test]
    fn test_log_level_filter() {
        assert_eq!(CoreConfig::new().log_level_filter().unwrap(), LevelFilter::Info);
        assert_eq!(CoreConfig::development().log_level_filter().unwrap(), LevelFilter::Debug);

        let mut config = CoreConfig::production();
        config.log_level = "warn".to_string();
        assert_eq!(config.log_level_filter().unwrap(), LevelFilter::Warn);
        config.debug_mode = true;
        assert_eq!(config.log_level_filter().unwrap(), LevelFilter::Debug);

        config.log_level = "chatty".to_string();
        assert!(matches!(config.validate(), Err(CoreError::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = CoreConfig::new();
        config.backend.url = "ftp://example".to_string();
        assert!(matches!(config.validate(), Err(CoreError::ConfigError(_))));
    }

    #[test]
    fn test_config_file_io() {
        let mut config = CoreConfig::development();
        config.backend.url = "https://onemedi.example.co".to_string();
        config.backend.api_key = "anon-key".to_string();

        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        config.to_file(path).unwrap();
        let loaded = CoreConfig::from_file(path).unwrap();

        assert_eq!(loaded.backend.url, config.backend.url);
        assert_eq!(loaded.backend.api_key, "anon-key");
        assert_eq!(loaded.backend.reconnect_delay, config.backend.reconnect_delay);
        assert_eq!(loaded.log_level, "debug");
    }
}
