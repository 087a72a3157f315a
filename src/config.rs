//! Server settings, loadable from a TOML file.
//!
//! Everything has a default, so a server started with nothing but a control
//! pipe path runs fine; a config file or CLI flags override selectively.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default size of the session worker pool (and thus the connection queue).
pub const DEFAULT_WORKERS: usize = 2;

/// Tunables for a server instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Session worker count; also the connection queue capacity.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Artificial delay before each store access, in microseconds. Useful
    /// for shaking out races under test; zero in normal operation.
    #[serde(default)]
    pub access_delay_micros: u64,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            access_delay_micros: 0,
        }
    }
}

/// Errors loading a settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl Settings {
    /// Load settings from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }
}
