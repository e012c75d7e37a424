//! Configuration types for the warden daemon.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, WardenError};
use crate::logbuf::DEFAULT_LOG_CAPACITY;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Platform bot token. Overridable via the `WARDEN_TOKEN` environment
    /// variable; never logged.
    pub token: String,
    /// Literal command prefixes accepted once the process is ready.
    /// Mention prefixes are added automatically.
    pub prefixes: Vec<String>,
    /// Channel that receives structured operator reports.
    pub operator_channel_id: u64,
    /// Activity text announced when the process becomes ready.
    pub ready_activity: String,
    /// Bound of the inbound platform event queue.
    pub event_queue_size: usize,
    /// Capacity of the in-memory log ring.
    pub log_capacity: usize,
    /// Persistent store settings.
    pub database: DatabaseConfig,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            prefixes: vec!["!".to_owned(), "warden ".to_owned()],
            operator_channel_id: 0,
            ready_activity: "warden help".to_owned(),
            event_queue_size: 128,
            log_capacity: DEFAULT_LOG_CAPACITY,
            database: DatabaseConfig::default(),
        }
    }
}

/// Persistent blacklist store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file path.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_data_dir().join("warden.db"),
        }
    }
}

/// Returns `~/.warden/`.
fn default_data_dir() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".warden")
    } else {
        PathBuf::from("/tmp").join(".warden")
    }
}

impl WardenConfig {
    /// Returns the default config file path
    /// (`~/.config/warden/config.toml`).
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("warden").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("warden")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/warden-config/config.toml")
        }
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            WardenError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        toml::from_str(&text).map_err(|err| {
            WardenError::Config(format!("failed to parse {}: {err}", path.display()))
        })
    }

    /// Load configuration, falling back to defaults when the file is
    /// missing. Parse errors are still surfaced.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.is_file() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
