//! Configuration management for telemd.
//!
//! Loads settings from /etc/telemd/config.toml or uses defaults. Read once at
//! startup; nothing here changes while the daemon runs.

use crate::history::RetentionPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use telem_shared::TelemError;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/telemd/config.toml";

/// Fallback config file path
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/telemd/config.toml";

/// Cycle and fetch timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Time between cycles in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Per-fetch timeout in milliseconds
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Point catalog (.json or .toml)
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,
}

fn default_interval_ms() -> u64 {
    1_000
}

fn default_fetch_timeout_ms() -> u64 {
    500
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("/etc/telemd/catalog.json")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            catalog_path: default_catalog_path(),
        }
    }
}

/// Search service the field values are read from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub url: String,

    #[serde(default = "default_gateway_index")]
    pub index: String,
}

fn default_gateway_url() -> String {
    "http://localhost:5000/search-es".to_string()
}

fn default_gateway_index() -> String {
    "statefield_report_123456789012345".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            index: default_gateway_index(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Keep at most this many samples per point. Unset keeps everything.
    #[serde(default)]
    pub max_samples_per_point: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_enabled")]
    pub enabled: bool,

    #[serde(default = "default_server_bind")]
    pub bind: String,
}

fn default_server_enabled() -> bool {
    true
}

fn default_server_bind() -> String {
    "127.0.0.1:8090".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_server_enabled(),
            bind: default_server_bind(),
        }
    }
}

/// Full daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load config from the standard locations, or return defaults when
    /// neither file exists
    pub fn load() -> Result<Self, TelemError> {
        Self::load_first(&[Path::new(CONFIG_PATH), Path::new(DEFAULT_CONFIG_PATH)])
    }

    /// Load the first existing file in `paths`. A file that exists but
    /// cannot be read, parsed or validated is an error.
    pub fn load_first(paths: &[&Path]) -> Result<Self, TelemError> {
        for path in paths {
            match Self::load_from_path(path) {
                Ok(config) => return Ok(config),
                Err(TelemError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        warn!("Config not found, using defaults");
        Ok(Config::default())
    }

    /// Load config from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, TelemError> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TelemError> {
        if self.daemon.interval_ms == 0 {
            return Err(TelemError::Config("daemon.interval_ms must be positive".into()));
        }
        if self.daemon.fetch_timeout_ms == 0 {
            return Err(TelemError::Config("daemon.fetch_timeout_ms must be positive".into()));
        }
        if self.gateway.url.trim().is_empty() {
            return Err(TelemError::Config("gateway.url is empty".into()));
        }
        if self.gateway.index.trim().is_empty() {
            return Err(TelemError::Config("gateway.index is empty".into()));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.daemon.interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.daemon.fetch_timeout_ms)
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::from_limit(self.history.max_samples_per_point)
    }
}
