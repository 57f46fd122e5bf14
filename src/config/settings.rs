//! Bridge settings

use crate::core::device::{AdapterOptions, DeviceFamily};
use crate::core::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No platform config directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// File could not be read or written
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be serialized
    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Values parse but make no sense
    #[error("Invalid value: {0}")]
    Invalid(String),
}

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Board family
    pub device: DeviceFamily,
    /// Poll cadence in milliseconds
    pub poll_interval_ms: u64,
    /// Transport settings
    pub transport: TransportConfig,
    /// Adapter options
    pub adapter: AdapterSettings,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device: DeviceFamily::default(),
            poll_interval_ms: 20,
            transport: TransportConfig::default(),
            adapter: AdapterSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Load from the default location; a missing file gives defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_file().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from(&path)
    }

    /// Load from a file; a missing file gives defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to the default location
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = super::config_file().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save to a file, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_err)
    }

    /// Reject values no session can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Poll cadence
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Options handed to the adapter at init
    pub fn adapter_options(&self) -> AdapterOptions {
        AdapterOptions {
            transport: Some(self.transport.transport_type()),
            exclusive_dht: self.adapter.exclusive_dht,
        }
    }
}

/// Adapter settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterSettings {
    /// DHT temperature and humidity share one active subscription
    pub exclusive_dht: bool,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of text
    pub json: bool,
    /// Also write daily-rotated log files here
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}
