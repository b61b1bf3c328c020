//! Configuration management for DocGate

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Main configuration structure for DocGate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Binary wire protocol listener
    #[serde(default)]
    pub wire: WireConfig,

    /// JSON-over-HTTP listener
    #[serde(default)]
    pub data_api: DataApiConfig,

    /// Server-side cursor settings
    #[serde(default)]
    pub cursor: CursorConfig,

    /// Command execution settings
    #[serde(default)]
    pub query: QueryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a TOML, YAML or JSON file, chosen by extension
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config = Self::parse(&content, path)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(content)
                .map_err(|e| Error::Config(format!("Failed to parse TOML config: {}", e))),
            Some("yaml" | "yml") => serde_yaml::from_str(content)
                .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e))),
            _ => serde_json::from_str(content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e))),
        }
    }

    /// Reject combinations that would make the server unusable
    pub fn validate(&self) -> Result<()> {
        if !self.wire.enabled && !self.data_api.enabled {
            return Err(Error::Config(
                "at least one of wire or data_api must be enabled".to_string(),
            ));
        }
        if self.cursor.default_batch_size == 0 {
            return Err(Error::Config("cursor.default_batch_size must be > 0".to_string()));
        }
        if self.cursor.default_batch_size > self.cursor.max_batch_size {
            return Err(Error::Config(format!(
                "cursor.default_batch_size ({}) exceeds cursor.max_batch_size ({})",
                self.cursor.default_batch_size, self.cursor.max_batch_size
            )));
        }
        if self.wire.max_message_size < 16 + 5 {
            return Err(Error::Config("wire.max_message_size is too small".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    /// Enable the wire protocol listener
    pub enabled: bool,
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Largest accepted message, header included
    pub max_message_size: usize,
    /// Largest document reported to clients in the handshake
    pub max_bson_object_size: usize,
    /// Largest write batch reported to clients in the handshake
    pub max_write_batch_size: usize,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 27017,
            max_message_size: 48_000_000,
            max_bson_object_size: 16 * 1024 * 1024,
            max_write_batch_size: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataApiConfig {
    /// Enable the Data API listener
    pub enabled: bool,
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Number of worker threads
    pub workers: usize,
    /// CORS allowed origins
    pub cors_origins: Vec<String>,
}

impl Default for DataApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: 4,
            cors_origins: vec!["*".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorConfig {
    /// First batch size when the client does not ask for one
    pub default_batch_size: usize,
    /// Upper bound on any single batch
    pub max_batch_size: usize,
    /// Cursors idle for longer than this are closed
    pub idle_timeout_secs: u64,
    /// How often idle cursors are looked for
    pub reap_interval_secs: u64,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 101,
            max_batch_size: 100_000,
            idle_timeout_secs: 600,
            reap_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Deadline applied to commands without maxTimeMS (0 = none)
    pub max_execution_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    /// "text" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder and serve /metrics
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.wire.port, 27017);
        assert_eq!(config.cursor.default_batch_size, 101);
    }

    #[test]
    fn test_validate_rejects_batch_sizes() {
        let mut config = Config::default();
        config.cursor.default_batch_size = 10;
        config.cursor.max_batch_size = 5;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_requires_a_listener() {
        let mut config = Config::default();
        config.wire.enabled = false;
        config.data_api.enabled = false;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[wire]\nport = 27018\n\n[cursor]\ndefault_batch_size = 5").unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.wire.port, 27018);
        assert_eq!(config.wire.host, "127.0.0.1");
        assert_eq!(config.cursor.default_batch_size, 5);
        assert_eq!(config.cursor.max_batch_size, 100_000);
    }

    #[tokio::test]
    async fn test_load_yaml_and_json() {
        let mut yaml = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(yaml, "data_api:\n  port: 9090\n").unwrap();
        let config = Config::load(yaml.path()).await.unwrap();
        assert_eq!(config.data_api.port, 9090);

        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(json, r#"{{"query": {{"max_execution_time_ms": 250}}}}"#).unwrap();
        let config = Config::load(json.path()).await.unwrap();
        assert_eq!(config.query.max_execution_time_ms, 250);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = Config::load("/nonexistent/docgate.toml").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
