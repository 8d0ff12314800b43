//! Configuration structures.
//!
//! Configuration is loaded from environment variables and config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::Result;

/// Global substrate configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Monitoring subsystem configuration.
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Default resource connector configuration.
    #[serde(default)]
    pub connector: ConnectorConfig,
}

impl Config {
    /// Parse a configuration document from a JSON string.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load a configuration document from a JSON file on disk.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Monitoring subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Period after which live counters are snapshotted and cleared.
    #[serde(with = "humantime_serde")]
    pub counters_reset_period: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            counters_reset_period: Duration::from_secs(60),
        }
    }
}

/// Resource connector configuration (one pool-backed service).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Database host.
    pub host: String,

    /// Database port.
    pub port: u16,

    /// Login user.
    pub user: String,

    /// Login password. Redacted from all log output.
    pub password: String,

    /// Database name.
    pub database: String,

    /// Maximum live connections held by the pool.
    pub max_connections: usize,

    /// Idle connections older than this are pruned at acquire time.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            max_connections: 10,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectorConfig {
    /// Reject configurations that cannot possibly connect.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(crate::types::Error::validation("connector host is empty"));
        }
        if self.user.is_empty() {
            return Err(crate::types::Error::validation("connector user is empty"));
        }
        if self.database.is_empty() {
            return Err(crate::types::Error::validation(
                "connector database is empty",
            ));
        }
        if self.max_connections == 0 {
            return Err(crate::types::Error::validation(
                "connector max_connections must be positive",
            ));
        }
        Ok(())
    }
}
