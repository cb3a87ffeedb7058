//! Configuration types for inhook

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::recording::DEFAULT_OBSERVER_BUFFER;
use crate::{InhookError, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener and public addressing
    #[serde(default)]
    pub server: ServerConfig,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Base URL advertised in session capture URLs
    ///
    /// Derived from `listen_addr` when absent.
    #[serde(default)]
    pub public_url: Option<String>,
    /// Create one session at startup so the service is usable immediately
    #[serde(default = "default_true")]
    pub bootstrap_session: bool,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            public_url: None,
            bootstrap_session: true,
        }
    }
}

/// Resource limits
///
/// Inbound requests are never capped; only observer fan-out is bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Events buffered per observer before forwards are dropped
    #[serde(default = "default_observer_buffer")]
    pub observer_buffer: usize,
}

fn default_observer_buffer() -> usize {
    DEFAULT_OBSERVER_BUFFER
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            observer_buffer: default_observer_buffer(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| InhookError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| InhookError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.server.public_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(InhookError::ConfigError(format!(
                    "public_url must start with http:// or https://: {url}"
                )));
            }
        }

        if self.limits.observer_buffer == 0 {
            return Err(InhookError::ConfigError(
                "observer_buffer must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Base URL that session capture URLs are built from, without a trailing slash
    #[must_use]
    pub fn public_url(&self) -> String {
        match &self.server.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let addr = self.server.listen_addr;
                // An unspecified bind address is not reachable as a URL host
                let host = if addr.ip().is_unspecified() {
                    "localhost".to_string()
                } else if addr.is_ipv6() {
                    format!("[{}]", addr.ip())
                } else {
                    addr.ip().to_string()
                };
                format!("http://{host}:{}", addr.port())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_parse() {
        let config_toml = r#"
            [server]
            listen_addr = "127.0.0.1:9000"
            public_url = "https://hooks.example.com/"

            [limits]
            observer_buffer = 8
        "#;

        let config: Config = toml::from_str(config_toml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert!(config.server.bootstrap_session);
        assert_eq!(config.limits.observer_buffer, 8);
        assert_eq!(config.public_url(), "https://hooks.example.com");
    }

    #[test]
    fn test_config_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.listen_addr, default_listen_addr());
        assert_eq!(config.limits.observer_buffer, DEFAULT_OBSERVER_BUFFER);
        assert_eq!(config.public_url(), "http://localhost:8080");
    }

    #[test]
    fn test_public_url_from_listen_addr() {
        let mut config = Config::default();
        config.server.listen_addr = "127.0.0.1:3000".parse().unwrap();
        assert_eq!(config.public_url(), "http://127.0.0.1:3000");

        config.server.listen_addr = "[::1]:3000".parse().unwrap();
        assert_eq!(config.public_url(), "http://[::1]:3000");
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        let config_toml = r#"
            [server]
            bootstrap_session = false
        "#;
        file.write_all(config_toml.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert!(!config.server.bootstrap_session);
    }

    #[test]
    fn test_invalid_public_url() {
        let config_toml = r#"
            [server]
            public_url = "ftp://example.com"
        "#;

        let config: Config = toml::from_str(config_toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_zero_observer_buffer() {
        let mut config = Config::default();
        config.limits.observer_buffer = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_connection_cap_is_not_configurable() {
        let config_toml = r#"
            [limits]
            max_connections = 1
        "#;

        // Unknown keys are ignored; nothing limits inbound connections
        let config: Config = toml::from_str(config_toml).unwrap();
        assert_eq!(config.limits.observer_buffer, DEFAULT_OBSERVER_BUFFER);
    }
}
