//! Player configuration.
//!
//! Loaded from TOML; every field has a default so an empty file (or no file)
//! is a valid configuration.
//!
//! ```toml
//! rate = 60.0
//! bus_capacity = 1024
//!
//! [feed]
//! path = "feeds/harrisimo.json"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use twimetravel_types::Rate;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "twimetravel.toml";

const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("bus_capacity must be at least 1")]
    ZeroCapacity,
}

/// Top-level player configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Playback rate used when a request does not name one.
    pub rate: Rate,

    /// Capacity of the playback notification channel.
    pub bus_capacity: usize,

    pub feed: FeedConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            rate: Rate::default(),
            bus_capacity: DEFAULT_BUS_CAPACITY,
            feed: FeedConfig::default(),
        }
    }
}

/// Where playback items are read from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// JSON feed file (array of `{"id", "seconds_since_start"}`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl PlayerConfig {
    /// `twimetravel.toml` in the current directory.
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PlayerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded player config");
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bus_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}
