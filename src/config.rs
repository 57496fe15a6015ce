//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub grid: GridConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Index engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    /// Serialized size at which a partition's bitmap stops taking writes
    #[serde(default = "default_partition_max_bytes")]
    pub partition_max_bytes: u64,

    /// How long a delete waits for its day lock before giving up
    #[serde(default = "default_delete_lock_timeout")]
    pub delete_lock_timeout_ms: u64,

    /// Deadline for each day of a query
    #[serde(default = "default_day_query_timeout")]
    pub day_query_timeout_ms: u64,
}

fn default_partition_max_bytes() -> u64 {
    10_000_000 // 10 MB
}

fn default_delete_lock_timeout() -> u64 {
    200
}

fn default_day_query_timeout() -> u64 {
    100
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            partition_max_bytes: default_partition_max_bytes(),
            delete_lock_timeout_ms: default_delete_lock_timeout(),
            day_query_timeout_ms: default_day_query_timeout(),
        }
    }
}

/// In-process grid configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GridConfig {
    /// Number of simulated nodes
    #[serde(default = "default_nodes")]
    pub nodes: usize,

    /// Backup copies per shard
    #[serde(default)]
    pub replicas: usize,

    /// Serve reads from backup owners as well as the primary
    #[serde(default)]
    pub read_from_backup: bool,
}

fn default_nodes() -> usize {
    1
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            replicas: 0,
            read_from_backup: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("prism").join("config.toml")),
            Some(PathBuf::from("/etc/prism/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Index overrides
        if let Ok(max_bytes) = std::env::var("PRISM_PARTITION_MAX_BYTES") {
            if let Ok(v) = max_bytes.parse() {
                self.index.partition_max_bytes = v;
            }
        }
        if let Ok(timeout) = std::env::var("PRISM_DAY_QUERY_TIMEOUT_MS") {
            if let Ok(v) = timeout.parse() {
                self.index.day_query_timeout_ms = v;
            }
        }

        // Grid overrides
        if let Ok(nodes) = std::env::var("PRISM_GRID_NODES") {
            if let Ok(v) = nodes.parse() {
                self.grid.nodes = v;
            }
        }
        if let Ok(replicas) = std::env::var("PRISM_GRID_REPLICAS") {
            if let Ok(v) = replicas.parse() {
                self.grid.replicas = v;
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("PRISM_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("PRISM_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index: IndexConfig::default(),
            grid: GridConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Prism Configuration
#
# Environment variables override these settings:
# - PRISM_PARTITION_MAX_BYTES
# - PRISM_DAY_QUERY_TIMEOUT_MS
# - PRISM_GRID_NODES
# - PRISM_GRID_REPLICAS
# - PRISM_LOG_LEVEL
# - PRISM_LOG_FORMAT

[index]
# Serialized size (bytes) at which a partition stops taking writes
partition_max_bytes = 10000000

# How long a delete waits for its day lock (ms)
delete_lock_timeout_ms = 200

# Deadline for each day of a query (ms)
day_query_timeout_ms = 100

[grid]
# Number of simulated nodes
nodes = 1

# Backup copies per shard
replicas = 0

# Serve reads from backup owners as well as the primary
read_from_backup = false

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.index.partition_max_bytes, 10_000_000);
        assert_eq!(config.index.delete_lock_timeout_ms, 200);
        assert_eq!(config.index.day_query_timeout_ms, 100);
        assert_eq!(config.grid.nodes, 1);
        assert_eq!(config.grid.replicas, 0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[index]\npartition_max_bytes = 1024").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.index.partition_max_bytes, 1_024);
        assert_eq!(config.index.day_query_timeout_ms, 100);
        assert_eq!(config.grid.nodes, 1);
    }

    #[test]
    fn test_generated_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.index.partition_max_bytes, 10_000_000);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/prism.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_env_overrides() {
        // no other test touches these variables
        std::env::set_var("PRISM_PARTITION_MAX_BYTES", "2048");
        std::env::set_var("PRISM_LOG_LEVEL", "debug");

        let config = Config::from_env();
        assert_eq!(config.index.partition_max_bytes, 2_048);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.grid.nodes, 1);

        std::env::remove_var("PRISM_PARTITION_MAX_BYTES");
        std::env::remove_var("PRISM_LOG_LEVEL");
    }
}
