//! Development server settings
//!
//! Layered from built-in defaults, an optional settings file and
//! `ONEMEDI_*` environment variables (nested keys use `__`). Command-line
//! flags override the result in `main`.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ONEMEDI";

/// Development server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Interface to bind
    pub host: String,

    /// TCP port to listen on
    pub port: u16,

    /// API key clients must send; any key is accepted when unset
    #[serde(default)]
    pub api_key: Option<String>,

    /// JSON file mapping table names to seed rows
    #[serde(default)]
    pub seed_file: Option<String>,

    /// Buffered change events per subscriber
    pub feed_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            host: "127.0.0.1".to_string(),
            port: 54321,
            api_key: None,
            seed_file: None,
            feed_buffer: onemedi_core::memory::DEFAULT_FEED_BUFFER,
        }
    }
}

impl Settings {
    /// Load settings, reading `path` when given
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let mut builder = Config::builder()
            .set_default("host", defaults.host)?
            .set_default("port", i64::from(defaults.port))?
            .set_default("feed_buffer", defaults.feed_buffer as i64)?;

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }

    /// Socket address to bind
    pub fn addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.port, 54321);
        assert_eq!(settings.addr().unwrap().to_string(), "127.0.0.1:54321");
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"port": 8055, "api_key": "local-anon-key", "seed_file": "seed.json"}}"#
        )
        .unwrap();

        let settings = Settings::load(file.path().to_str()).unwrap();
        assert_eq!(settings.port, 8055);
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.api_key.as_deref(), Some("local-anon-key"));
        assert_eq!(settings.seed_file.as_deref(), Some("seed.json"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Settings::load(Some("/nonexistent/onemedi-devserver.json")).is_err());
    }
}
