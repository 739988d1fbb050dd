//! YAML Configuration
//!
//! Every option has a default, so an absent file or an empty document yields
//! a fully usable configuration. Unknown keys are ignored.
//!
//! ```yaml
//! snapshot:
//!   path: .data/snapshot.db
//!   interval: 3600        # seconds
//!   threshold: 1048576    # bytes
//! wal:
//!   path: .data/wal.log
//! redis:
//!   host: localhost
//!   port: 6379
//!   timeout: 30           # seconds, 0 disables
//!   max_connections: 100
//!   max_pending: 1000
//!   max_message_size: 10485760
//!   base_workers: 10
//!   worker_ttl: 10        # seconds
//!   idle_connections_per_worker: 3
//! logger:
//!   level: INFO
//! ```

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("unknown log level: {0}")]
    UnknownLogLevel(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub snapshot: SnapshotConfig,
    pub wal: WalConfig,
    pub redis: RedisConfig,
    pub logger: LoggerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            snapshot: SnapshotConfig::default(),
            wal: WalConfig::default(),
            redis: RedisConfig::default(),
            logger: LoggerConfig::default(),
        }
    }
}

/// Identity and peer list, reserved for future replication. Nothing in the
/// current core reads it beyond configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub id: String,
    pub address: String,
    pub peers: Vec<PeerConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            id: "self".to_string(),
            address: "localhost:5000".to_string(),
            peers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub id: String,
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub path: String,
    /// Snapshot at least this often, in seconds.
    pub interval: u64,
    /// Snapshot once the WAL reaches this many bytes.
    pub threshold: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: ".data/snapshot.db".to_string(),
            interval: 3600,
            threshold: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    pub path: String,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            path: ".data/wal.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    /// Per-connection idle timeout in seconds; 0 disables timeouts.
    pub timeout: u64,
    /// Upper bound on concurrently working connections (pool workers).
    pub max_connections: usize,
    /// Capacity of the pending-connection queue.
    pub max_pending: usize,
    /// Maximum accepted bulk string size in bytes; 0 disables the cap.
    pub max_message_size: usize,
    /// Permanent workers kept alive for the life of the pool.
    pub base_workers: usize,
    /// Idle seconds before a transient worker retires.
    pub worker_ttl: u64,
    /// Queue-pressure ratio that triggers spawning a transient worker.
    pub idle_connections_per_worker: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            timeout: 30,
            max_connections: 100,
            max_pending: 1000,
            max_message_size: 10 * 1024 * 1024,
            base_workers: 10,
            worker_ttl: 10,
            idle_connections_per_worker: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub level: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
        }
    }
}

impl LoggerConfig {
    /// Maps the configured level name onto a tracing level.
    pub fn tracing_level(&self) -> Result<tracing::Level, ConfigError> {
        match self.level.to_uppercase().as_str() {
            "TRACE" => Ok(tracing::Level::TRACE),
            "DEBUG" => Ok(tracing::Level::DEBUG),
            "INFO" => Ok(tracing::Level::INFO),
            "WARN" => Ok(tracing::Level::WARN),
            "ERROR" => Ok(tracing::Level::ERROR),
            other => Err(ConfigError::UnknownLogLevel(other.to_string())),
        }
    }
}

impl Config {
    /// Loads configuration from a YAML file. A missing file yields the
    /// defaults; a malformed file is a startup error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// The address the server binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.redis.host, self.redis.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.snapshot.path, ".data/snapshot.db");
        assert_eq!(cfg.snapshot.interval, 3600);
        assert_eq!(cfg.snapshot.threshold, 1024 * 1024);
        assert_eq!(cfg.wal.path, ".data/wal.log");
        assert_eq!(cfg.redis.port, 6379);
        assert_eq!(cfg.redis.timeout, 30);
        assert_eq!(cfg.redis.max_pending, 1000);
        assert_eq!(cfg.redis.base_workers, 10);
        assert_eq!(cfg.logger.level, "INFO");
        assert_eq!(cfg.network.id, "self");
        assert_eq!(cfg.bind_address(), "localhost:6379");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let cfg = Config::load("/nonexistent/config.yaml").unwrap();
        assert_eq!(cfg.redis.port, 6379);
    }

    #[test]
    fn test_partial_file_overrides_only_named_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "redis:\n  port: 7000\n  base_workers: 2\nsnapshot:\n  threshold: 4096\n",
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.redis.port, 7000);
        assert_eq!(cfg.redis.base_workers, 2);
        assert_eq!(cfg.snapshot.threshold, 4096);
        // Everything else stays at the default.
        assert_eq!(cfg.redis.host, "localhost");
        assert_eq!(cfg.snapshot.interval, 3600);
    }

    #[test]
    fn test_peers_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "network:\n  id: node-1\n  address: 10.0.0.1:5000\n  peers:\n    - id: node-2\n      address: 10.0.0.2:5000\n",
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.network.id, "node-1");
        assert_eq!(cfg.network.peers.len(), 1);
        assert_eq!(cfg.network.peers[0].id, "node-2");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "redis: [not, a, map]").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_log_levels() {
        let mut cfg = LoggerConfig::default();
        assert_eq!(cfg.tracing_level().unwrap(), tracing::Level::INFO);
        cfg.level = "trace".to_string();
        assert_eq!(cfg.tracing_level().unwrap(), tracing::Level::TRACE);
        cfg.level = "VERBOSE".to_string();
        assert!(matches!(
            cfg.tracing_level(),
            Err(ConfigError::UnknownLogLevel(_))
        ));
    }
}
