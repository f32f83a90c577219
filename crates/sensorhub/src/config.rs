// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hub configuration.
//!
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! log_level = "info"
//!
//! [server]
//! bind = "0.0.0.0"
//! port = 8000
//!
//! [store]
//! backend = "redis"
//! redis_url = "redis://127.0.0.1:6379"
//! retention_ms = 600000
//!
//! [broadcast]
//! period_ms = 1000
//! keys = ["sensor:8:device:2:distance"]
//!
//! [[topology.devices]]
//! device_id = 2
//! sensors = [{ sensor_id = 8, metrics = ["distance"] }]
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keyspace::{key_for, DeviceTopology, TimeseriesKey};
use crate::store::DEFAULT_RETENTION_MS;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level hub configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub broadcast: BroadcastConfig,

    #[serde(default)]
    pub query: QueryConfig,

    /// Series created at startup.
    #[serde(default)]
    pub topology: DeviceTopology,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            broadcast: BroadcastConfig::default(),
            query: QueryConfig::default(),
            topology: DeviceTopology::default(),
            log_level: default_log_level(),
        }
    }
}

impl HubConfig {
    /// Load and validate a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_clients == 0 {
            return Err(ConfigError::Invalid("server.max_clients must be > 0".into()));
        }

        if self.store.backend == StoreBackend::Redis
            && !(self.store.redis_url.starts_with("redis://")
                || self.store.redis_url.starts_with("rediss://"))
        {
            return Err(ConfigError::Invalid(format!(
                "store.redis_url `{}` is not a redis:// URL",
                self.store.redis_url
            )));
        }
        if self.store.pool_size == 0 {
            return Err(ConfigError::Invalid("store.pool_size must be > 0".into()));
        }
        if self.store.op_timeout_ms == 0 {
            return Err(ConfigError::Invalid("store.op_timeout_ms must be > 0".into()));
        }

        if self.broadcast.period_ms == 0 {
            return Err(ConfigError::Invalid("broadcast.period_ms must be > 0".into()));
        }
        if self.broadcast.send_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "broadcast.send_timeout_ms must be > 0".into(),
            ));
        }
        if self.broadcast.queue_depth == 0 {
            return Err(ConfigError::Invalid("broadcast.queue_depth must be > 0".into()));
        }
        if self.broadcast.keys.is_empty() {
            return Err(ConfigError::Invalid("No broadcast keys configured".into()));
        }

        if self.query.range_window_ms == 0 {
            return Err(ConfigError::Invalid("query.range_window_ms must be > 0".into()));
        }

        Ok(())
    }

    /// `bind:port` listen address.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}

/// HTTP / WebSocket listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// 0 picks an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Concurrent ingestion connections.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_clients() -> usize {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_clients: default_max_clients(),
        }
    }
}

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Redis => f.write_str("redis"),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(ConfigError::Invalid(format!(
                "unknown store backend `{other}` (expected memory or redis)"
            ))),
        }
    }
}

/// Time-series store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Retention of every series (ms, 0 = unlimited).
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,

    /// Upper bound of a single store call (ms).
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_pool_size() -> usize {
    8
}

fn default_retention_ms() -> u64 {
    DEFAULT_RETENTION_MS
}

fn default_op_timeout_ms() -> u64 {
    2_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            pool_size: default_pool_size(),
            retention_ms: default_retention_ms(),
            op_timeout_ms: default_op_timeout_ms(),
        }
    }
}

/// Dashboard fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    /// Longest wait on a full observer queue before dropping the observer.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Outbound messages buffered per observer. Kept small so a slow
    /// dashboard is pruned instead of falling periods behind.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Keys observers may follow; the first one is the default.
    #[serde(default = "default_broadcast_keys")]
    pub keys: Vec<TimeseriesKey>,
}

fn default_period_ms() -> u64 {
    1_000
}

fn default_send_timeout_ms() -> u64 {
    500
}

pub(crate) fn default_queue_depth() -> usize {
    2
}

fn default_broadcast_keys() -> Vec<TimeseriesKey> {
    vec![key_for(8, 2, "distance")]
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            queue_depth: default_queue_depth(),
            keys: default_broadcast_keys(),
        }
    }
}

impl BroadcastConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Range endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Look-back of `GET /data/...` (ms).
    #[serde(default = "default_range_window_ms")]
    pub range_window_ms: u64,
}

fn default_range_window_ms() -> u64 {
    600_000
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            range_window_ms: default_range_window_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.retention_ms, 600_000);
        assert_eq!(config.broadcast.period(), Duration::from_secs(1));
        assert_eq!(config.broadcast.queue_depth, 2);
        assert_eq!(
            config.broadcast.keys,
            vec![key_for(8, 2, "distance")]
        );
        assert_eq!(config.listen_addr(), "0.0.0.0:8000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(HubConfig::from_toml_str("").unwrap(), HubConfig::default());
    }

    #[test]
    fn test_config_from_toml() {
        let config = HubConfig::from_toml_str(
            r#"
            log_level = "debug"

            [server]
            port = 9100

            [store]
            backend = "redis"
            redis_url = "redis://cache:6379/0"
            retention_ms = 60000

            [broadcast]
            period_ms = 250
            keys = ["sensor:1:device:1:position", "sensor:7:device:2:grip_force"]

            [[topology.devices]]
            device_id = 2
            sensors = [{ sensor_id = 6, metrics = ["distance"] }]
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.retention_ms, 60_000);
        assert_eq!(config.store.pool_size, 8);
        assert_eq!(config.broadcast.period(), Duration::from_millis(250));
        assert_eq!(config.broadcast.keys[1], key_for(7, 2, "grip_force"));
        assert_eq!(config.topology.devices[0].sensors[0].sensor_id, 6);
    }

    #[test]
    fn test_malformed_broadcast_key() {
        let err = HubConfig::from_toml_str(
            r#"
            [broadcast]
            keys = ["sensor:1:device"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = HubConfig::default();
        config.broadcast.keys.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = HubConfig::default();
        config.broadcast.period_ms = 0;
        assert!(config.validate().is_err());

        let mut config = HubConfig::default();
        config.store.backend = StoreBackend::Redis;
        config.store.redis_url = "http://localhost".into();
        assert!(config.validate().is_err());

        let mut config = HubConfig::default();
        config.server.max_clients = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("Redis".parse::<StoreBackend>().unwrap(), StoreBackend::Redis);
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("sqlite".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 0\nmax_clients = 4").unwrap();

        let config = HubConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 0);
        assert_eq!(config.server.max_clients, 4);
    }

    #[test]
    fn test_missing_file() {
        let err = HubConfig::from_file("/nonexistent/sensorhub.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
