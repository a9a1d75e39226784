// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Hive Mind Configuration
//!
//! YAML configuration shared by the CLI and the coordination engine.
//!
//! ## Discovery Order
//!
//! 1. `--config <path>` (fails if missing or invalid)
//! 2. `HIVE_MIND_CONFIG_PATH`
//! 3. `./.hive-mind/config.yaml`
//! 4. `~/.hive-mind/config.yaml`
//! 5. built-in defaults
//!
//! `HIVE_MIND_*` environment variables are applied on top of whichever source
//! won, then command-line flags, then [`HiveMindConfig::validate`].
//!
//! ## Example
//!
//! ```yaml
//! database:
//!   backend: sqlite
//!   url: sqlite://.hive-mind/hive.db
//! swarm:
//!   queen_type: strategic
//!   topology: hierarchical
//!   max_workers: 8
//!   consensus: majority
//!   heartbeat_timeout: 30s
//!   checkpoint_interval: 30s
//! consensus:
//!   voting_timeout: 30s
//!   quorum_fraction: 0.6
//! executor:
//!   command: ./scripts/run-task.sh
//!   timeout: 5m
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::consensus::ConsensusAlgorithm;
use crate::domain::memory::DEFAULT_NAMESPACE;
use crate::domain::repository::{SqliteConfig, StorageBackend};
use crate::domain::swarm::{QueenType, Topology};

/// Directory holding the config file and the default database.
pub const CONFIG_DIR: &str = ".hive-mind";
pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveMindConfig {
    pub database: DatabaseConfig,
    pub swarm: SwarmDefaults,
    pub memory: MemoryConfig,
    pub consensus: ConsensusConfig,
    pub executor: ExecutorConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Sqlite,
            url: format!("sqlite://{CONFIG_DIR}/hive.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmDefaults {
    pub queen_type: QueenType,
    pub topology: Topology,
    pub max_workers: u32,
    pub consensus: ConsensusAlgorithm,
    pub auto_scale: bool,
    pub encryption: bool,
    pub task_max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    /// Silence after which a busy worker is declared failed.
    #[serde(with = "humantime_serde")]
    pub heartbeat_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub dispatch_interval: Duration,
    /// How often a running swarm is checkpointed for crash recovery.
    #[serde(with = "humantime_serde")]
    pub checkpoint_interval: Duration,
}

impl Default for SwarmDefaults {
    fn default() -> Self {
        Self {
            queen_type: QueenType::Strategic,
            topology: Topology::Hierarchical,
            max_workers: 8,
            consensus: ConsensusAlgorithm::Majority,
            auto_scale: false,
            encryption: false,
            task_max_retries: 2,
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(30),
            dispatch_interval: Duration::from_millis(500),
            checkpoint_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Entry budget per swarm enforced by the eviction pass.
    pub memory_size: usize,
    /// Values larger than this many bytes are compressed by the maintenance pass.
    pub compression_threshold: usize,
    pub namespace: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            memory_size: 10_000,
            compression_threshold: 10 * 1024,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    #[serde(with = "humantime_serde")]
    pub voting_timeout: Duration,
    pub quorum_fraction: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            voting_timeout: Duration::from_secs(30),
            quorum_fraction: 0.6,
        }
    }
}

/// External program that performs task work.
///
/// The task is written to the program's stdin as JSON; its stdout is the
/// task result. Without a command, tasks complete with an echo of their input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// `compact` or `json`
    pub log_format: String,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
            metrics_port: 9091,
        }
    }
}

impl HiveMindConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Searches the standard locations for a config file.
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("HIVE_MIND_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            tracing::warn!("HIVE_MIND_CONFIG_PATH points to {:?} which does not exist", path);
        }

        let local = Path::new(CONFIG_DIR).join(CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }

        if let Some(home) = dirs::home_dir() {
            let user = home.join(CONFIG_DIR).join(CONFIG_FILE);
            if user.exists() {
                return Some(user);
            }
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(&path)?
        } else if let Some(path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", path);
            Self::from_yaml_file(&path)?
        } else {
            tracing::debug!("No configuration file found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `HIVE_MIND_*` overrides from `lookup`. Unparseable values are
    /// logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("HIVE_MIND_DATABASE_URL") {
            tracing::info!("Environment override: HIVE_MIND_DATABASE_URL");
            self.database.url = url;
        }
        if let Some(val) = lookup("HIVE_MIND_DATABASE_BACKEND") {
            match val.to_lowercase().as_str() {
                "sqlite" => self.database.backend = DatabaseBackend::Sqlite,
                "memory" => self.database.backend = DatabaseBackend::Memory,
                _ => tracing::warn!("Invalid value for HIVE_MIND_DATABASE_BACKEND: '{}'. Ignoring.", val),
            }
        }

        override_parsed(&lookup, "HIVE_MIND_QUEEN_TYPE", &mut self.swarm.queen_type);
        override_parsed(&lookup, "HIVE_MIND_TOPOLOGY", &mut self.swarm.topology);
        override_parsed(&lookup, "HIVE_MIND_MAX_WORKERS", &mut self.swarm.max_workers);
        override_parsed(&lookup, "HIVE_MIND_CONSENSUS", &mut self.swarm.consensus);
        override_parsed(&lookup, "HIVE_MIND_MEMORY_SIZE", &mut self.memory.memory_size);
        override_parsed(&lookup, "HIVE_MIND_METRICS_PORT", &mut self.observability.metrics_port);
        override_bool(&lookup, "HIVE_MIND_AUTO_SCALE", &mut self.swarm.auto_scale);
        override_bool(&lookup, "HIVE_MIND_ENCRYPTION", &mut self.swarm.encryption);

        if let Some(level) = lookup("HIVE_MIND_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("HIVE_MIND_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Some(command) = lookup("HIVE_MIND_EXECUTOR") {
            self.executor.command = Some(command).filter(|c| !c.trim().is_empty());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.swarm.max_workers == 0 {
            return Err(ConfigError::Invalid("swarm.max_workers must be at least 1".into()));
        }
        if self.database.backend == DatabaseBackend::Sqlite && self.database.url.trim().is_empty() {
            return Err(ConfigError::Invalid("database.url cannot be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.consensus.quorum_fraction) || self.consensus.quorum_fraction == 0.0 {
            return Err(ConfigError::Invalid(format!(
                "consensus.quorum_fraction must be in (0, 1], got {}",
                self.consensus.quorum_fraction
            )));
        }
        if self.consensus.voting_timeout.is_zero() {
            return Err(ConfigError::Invalid("consensus.voting_timeout must be positive".into()));
        }
        if self.swarm.heartbeat_timeout <= self.swarm.heartbeat_interval {
            return Err(ConfigError::Invalid(
                "swarm.heartbeat_timeout must exceed swarm.heartbeat_interval".into(),
            ));
        }
        if self.swarm.checkpoint_interval.is_zero() {
            return Err(ConfigError::Invalid("swarm.checkpoint_interval must be positive".into()));
        }
        if self.memory.memory_size == 0 {
            return Err(ConfigError::Invalid("memory.memory_size must be at least 1".into()));
        }
        if self.memory.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("memory.namespace cannot be empty".into()));
        }
        if !matches!(self.observability.log_format.as_str(), "compact" | "json") {
            return Err(ConfigError::Invalid(format!(
                "observability.log_format must be 'compact' or 'json', got '{}'",
                self.observability.log_format
            )));
        }
        Ok(())
    }

    pub fn storage_backend(&self) -> StorageBackend {
        match self.database.backend {
            DatabaseBackend::Memory => StorageBackend::InMemory,
            DatabaseBackend::Sqlite => StorageBackend::Sqlite(SqliteConfig {
                url: self.database.url.clone(),
            }),
        }
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(val) = lookup(key) {
        match val.trim().parse::<T>() {
            Ok(parsed) => {
                tracing::info!("Environment override: {}={}", key, val);
                *target = parsed;
            }
            Err(_) => tracing::warn!("Invalid value for {}: '{}'. Ignoring.", key, val),
        }
    }
}

fn override_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut bool) {
    if let Some(val) = lookup(key) {
        match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => *target = true,
            "false" | "0" | "no" | "off" => *target = false,
            _ => tracing::warn!("Invalid value for {}: '{}'. Expected true/false. Ignoring.", key, val),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_validate() {
        let config = HiveMindConfig::default();
        config.validate().unwrap();
        assert_eq!(config.swarm.max_workers, 8);
        assert_eq!(config.memory.namespace, "default");
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
swarm:
  queen_type: tactical
  max_workers: 3
  heartbeat_timeout: 45s
  checkpoint_interval: 10s
consensus:
  voting_timeout: 2m
executor:
  command: ./run.sh
  args: ["--fast"]
"#;
        let config = HiveMindConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.swarm.queen_type, QueenType::Tactical);
        assert_eq!(config.swarm.max_workers, 3);
        assert_eq!(config.swarm.heartbeat_timeout, Duration::from_secs(45));
        assert_eq!(config.swarm.checkpoint_interval, Duration::from_secs(10));
        assert_eq!(config.swarm.dispatch_interval, Duration::from_millis(500));
        assert_eq!(config.consensus.voting_timeout, Duration::from_secs(120));
        assert_eq!(config.consensus.quorum_fraction, 0.6);
        assert_eq!(config.executor.command.as_deref(), Some("./run.sh"));
        assert_eq!(config.database.backend, DatabaseBackend::Sqlite);
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut config = HiveMindConfig::default();
        config.swarm.consensus = ConsensusAlgorithm::Byzantine;
        config.memory.compression_threshold = 512;
        config.to_yaml_file(&path).unwrap();

        let loaded = HiveMindConfig::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.swarm.consensus, ConsensusAlgorithm::Byzantine);
        assert_eq!(loaded.memory.compression_threshold, 512);
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let err = HiveMindConfig::load_or_default(Some(PathBuf::from("/nonexistent/hive.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_overrides_apply_and_ignore_garbage() {
        let vars: HashMap<&str, &str> = [
            ("HIVE_MIND_MAX_WORKERS", "12"),
            ("HIVE_MIND_CONSENSUS", "weighted"),
            ("HIVE_MIND_AUTO_SCALE", "yes"),
            ("HIVE_MIND_QUEEN_TYPE", "emperor"),
            ("HIVE_MIND_DATABASE_BACKEND", "memory"),
        ]
        .into_iter()
        .collect();

        let mut config = HiveMindConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.swarm.max_workers, 12);
        assert_eq!(config.swarm.consensus, ConsensusAlgorithm::Weighted);
        assert!(config.swarm.auto_scale);
        assert_eq!(config.swarm.queen_type, QueenType::Strategic);
        assert_eq!(config.storage_backend(), StorageBackend::InMemory);
    }

    #[test]
    fn test_validation() {
        let mut config = HiveMindConfig::default();
        config.consensus.quorum_fraction = 1.5;
        assert!(config.validate().is_err());

        let mut config = HiveMindConfig::default();
        config.swarm.heartbeat_timeout = Duration::from_secs(1);
        assert!(config.validate().is_err());

        let mut config = HiveMindConfig::default();
        config.observability.log_format = "xml".into();
        assert!(config.validate().is_err());

        let mut config = HiveMindConfig::default();
        config.swarm.checkpoint_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
