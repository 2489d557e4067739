//! Runtime configuration
//!
//! Everything that used to be process-wide mutable state in the stream tools
//! (log verbosity, log file, background mode, transport timing) lives in one
//! [`RuntimeConfig`] that is loaded once and handed to the pieces that need
//! it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{DEFAULT_RECONNECT_MS, DEFAULT_RELISTEN_MS};
use crate::error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub log: LogConfig,
    pub transport: TransportConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 0 = warnings only, 1 = info, 2 = debug, 3 and above = trace
    pub verbosity: u8,
    /// Append log lines to this file as well
    pub file: Option<PathBuf>,
    /// Suppress stderr output
    pub background: bool,
}

impl LogConfig {
    /// Filter directive matching the verbosity
    pub fn filter_directive(&self) -> &'static str {
        match self.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Transport timing and placement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Directory holding shared-memory ring buffers
    pub buffer_dir: PathBuf,
    /// Delay between connection attempts of a persistent client
    pub reconnect_interval_ms: u64,
    /// Delay before a persistent listener accepts a new connection
    pub relisten_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            buffer_dir: default_buffer_dir(),
            reconnect_interval_ms: DEFAULT_RECONNECT_MS,
            relisten_interval_ms: DEFAULT_RELISTEN_MS,
        }
    }
}

impl TransportConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn relisten_interval(&self) -> Duration {
        Duration::from_millis(self.relisten_interval_ms)
    }

    /// Path of the backing file for ring buffer `name`
    pub fn buffer_path(&self, name: &str) -> PathBuf {
        self.buffer_dir.join(name)
    }
}

fn default_buffer_dir() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

impl RuntimeConfig {
    /// Default location of the user config file
    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "vlf-stream")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load the user config file, falling back to defaults when there is none
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load from an explicit TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// One more `-v`
    pub fn up_verbosity(&mut self) {
        self.log.verbosity = self.log.verbosity.saturating_add(1);
    }
}
