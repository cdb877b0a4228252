use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::mcp::types::{ClientInfo, Implementation, PROTOCOL_VERSION};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration for a client connection
///
/// Every section has defaults, so an empty file (or no file) is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub timeouts: TimeoutConfig,
}

/// Where the server's event stream lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Subscription URL of the SSE stream (e.g. `http://127.0.0.1:8881/sse`)
    pub url: String,
    /// Extra headers sent with the subscription and every POST
    pub headers: BTreeMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8881/sse".to_string(),
            headers: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Parse the subscription URL, accepting only http and https.
    pub fn parsed_url(&self) -> Result<Url> {
        let url = Url::parse(&self.url)
            .map_err(|e| ConfigError::Invalid(format!("server url {:?}: {}", self.url, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(ConfigError::Invalid(format!(
                "unsupported url scheme {:?}, expected http or https",
                scheme
            ))),
        }
    }
}

/// How this client introduces itself during the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "relay".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// Time limits, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long a single request waits for its reply
    pub request_ms: u64,
    /// How long application calls wait for the handshake to finish
    pub ready_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: 30_000,
            ready_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn ready(&self) -> Duration {
        Duration::from_millis(self.ready_ms)
    }
}

impl Config {
    /// Defaults pointed at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            server: ServerConfig {
                url: url.into(),
                ..ServerConfig::default()
            },
            ..Self::default()
        }
    }

    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `relay.yaml` if it exists, otherwise use defaults.
    pub fn load_or_default() -> Self {
        Self::load("relay.yaml").unwrap_or_default()
    }

    /// Check the values that cannot be caught by deserialization alone.
    pub fn validate(&self) -> Result<()> {
        self.server.parsed_url()?;
        if self.timeouts.request_ms == 0 {
            return Err(ConfigError::Invalid("timeouts.request_ms must be positive".to_string()));
        }
        if self.client.name.trim().is_empty() {
            return Err(ConfigError::Invalid("client.name must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn client_info(&self) -> ClientInfo {
        Implementation::new(&self.client.name, &self.client.version)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.request_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.ready_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client.name = name.into();
        self.client.version = version.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.server.headers.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.url, "http://127.0.0.1:8881/sse");
        assert_eq!(config.client.name, "relay");
        assert_eq!(config.client.protocol_version, "2025-03-26");
        assert_eq!(config.timeouts.request(), Duration::from_secs(30));
        assert_eq!(config.timeouts.ready(), Duration::from_secs(30));
        config.validate().unwrap();
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  url: https://mcp.example.com/sse\n  headers:\n    Authorization: Bearer abc\ntimeouts:\n  request_ms: 500"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.url, "https://mcp.example.com/sse");
        assert_eq!(config.server.headers["Authorization"], "Bearer abc");
        assert_eq!(config.timeouts.request(), Duration::from_millis(500));
        assert_eq!(config.timeouts.ready_ms, 30_000);
        assert_eq!(config.client.name, "relay");
    }

    #[test]
    fn test_rejects_non_http_url() {
        let config = Config::new("ftp://host/sse");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_zero_request_timeout() {
        let config = Config::default().with_request_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/relay.yaml"),
            Err(ConfigError::FileRead(_))
        ));
    }

    #[test]
    fn test_builders() {
        let config = Config::new("http://host/sse")
            .with_client_info("inspector", "2.0.0")
            .with_ready_timeout(Duration::from_millis(250));
        assert_eq!(config.client_info(), Implementation::new("inspector", "2.0.0"));
        assert_eq!(config.timeouts.ready_ms, 250);
    }

    #[test]
    fn test_oversized_timeouts_saturate() {
        let config = Config::default()
            .with_request_timeout(Duration::MAX)
            .with_ready_timeout(Duration::MAX);
        assert_eq!(config.timeouts.request_ms, u64::MAX);
        assert_eq!(config.timeouts.ready_ms, u64::MAX);
        config.validate().unwrap();
    }
}
