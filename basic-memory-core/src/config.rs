//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/basic-memory/config.toml`

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// The project being synced
    #[serde(default)]
    pub project: ProjectConfig,

    /// Sync behavior
    #[serde(default)]
    pub sync: SyncConfig,

    /// Search/context defaults
    #[serde(default)]
    pub search: SearchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The directory sync mirrors into the knowledge graph
#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    /// Root directory to sync. Defaults to the current directory.
    #[serde(default = "default_project_root")]
    pub root: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: default_project_root(),
        }
    }
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

/// Sync behavior configuration
#[derive(Debug, Deserialize)]
pub struct SyncConfig {
    /// Whether to keep watching the project root for changes after the
    /// initial sync. The sync core itself runs one cycle at a time; this
    /// flag only controls whether the CLI restarts it on file events.
    #[serde(default)]
    pub watch: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { watch: false }
    }
}

/// Search/context defaults
#[derive(Debug, Deserialize)]
pub struct SearchConfig {
    /// Default `max_related` used by the context builder when a caller
    /// doesn't specify one.
    #[serde(default = "default_max_related")]
    pub max_related_default: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_related_default: default_max_related(),
        }
    }
}

fn default_max_related() -> usize {
    50
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of rotated log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("basic-memory")
            .join("config.toml")
    }

    /// Returns the data directory path (for the SQLite database)
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("basic-memory")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("basic-memory")
    }

    /// Returns the database file path
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("memory.db")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("basic-memory.log")
    }
}
