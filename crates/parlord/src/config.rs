//! Daemon configuration.
//!
//! Settings come from an optional TOML file, then command-line flags
//! override individual values. Everything is fixed at startup.
//!
//! ```toml
//! protocol = "tcp"
//! address = "localhost"
//! port = 1234
//! capacity = 100
//! idle_timeout_secs = 300
//! sweep_interval_secs = 2
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::registry::{RegistryConfig, DEFAULT_CAPACITY};

/// Default bind host.
pub const DEFAULT_ADDRESS: &str = "localhost";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 1234;

/// Default idle sweep cadence in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 2;

/// Stream transport the daemon listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP socket bound to `address:port`
    #[default]
    Tcp,
    /// Unix domain socket at path `address`
    Unix,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Unix => write!(f, "unix"),
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Stream transport
    pub protocol: Protocol,

    /// Host name or IP for TCP, socket path for Unix
    pub address: String,

    /// TCP port (ignored for Unix sockets)
    pub port: u16,

    /// Maximum concurrent participants
    pub capacity: usize,

    /// Evict participants silent for this many seconds (absent = never)
    pub idle_timeout_secs: Option<u64>,

    /// Seconds between idle sweeps
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Tcp,
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            capacity: DEFAULT_CAPACITY,
            idle_timeout_secs: None,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl ServerConfig {
    /// Loads a configuration file.
    ///
    /// Missing keys take their defaults; unknown keys are rejected.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml(&contents)
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Checks values that deserialize fine but cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidDuration {
                field: "sweep_interval_secs",
            });
        }
        if self.idle_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidDuration {
                field: "idle_timeout_secs",
            });
        }
        if self.address.is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        Ok(())
    }

    /// Returns the registry settings derived from this configuration.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            capacity: self.capacity,
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }

    /// Human-readable listen endpoint, e.g. `tcp://localhost:1234`.
    pub fn endpoint(&self) -> String {
        match self.protocol {
            Protocol::Tcp => format!("tcp://{}:{}", self.address, self.port),
            Protocol::Unix => format!("unix://{}", self.address),
        }
    }
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Invalid config file: {0}")]
    Parse(String),

    #[error("capacity must be at least 1")]
    InvalidCapacity,

    #[error("{field} must be greater than zero")]
    InvalidDuration { field: &'static str },

    #[error("address must not be empty")]
    EmptyAddress,
}
