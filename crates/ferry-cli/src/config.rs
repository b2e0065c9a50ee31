//! Client configuration (`~/.config/ferry/client.toml`).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default chunk size (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that was being read
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level client configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server connection settings
    pub server: ServerSettings,
    /// Upload settings
    pub transfer: TransferSettings,
}

/// `[server]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Server URI
    pub endpoint: String,
    /// Connection timeout
    pub connect_timeout_secs: u64,
    /// Largest encoded or decoded gRPC message, in bytes
    pub max_message_size: usize,
    /// HTTP/2 keepalive ping interval
    pub keepalive_interval_secs: u64,
    /// How long to wait for a keepalive ack
    pub keepalive_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:50051".to_string(),
            connect_timeout_secs: 10,
            max_message_size: 100 * 1024 * 1024,
            keepalive_interval_secs: 60,
            keepalive_timeout_secs: 10,
        }
    }
}

/// `[transfer]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Payload bytes per chunk
    pub chunk_size: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ClientConfig {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ferry")
            .join("client.toml")
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Load the default config file, or defaults if it does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Check that every value is usable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = &self.server.endpoint;
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "server.endpoint {endpoint:?} must start with http:// or https://"
            )));
        }
        if self.transfer.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "transfer.chunk_size must be greater than 0".into(),
            ));
        }
        // Leave room for the filename and framing
        if self.transfer.chunk_size >= self.server.max_message_size {
            return Err(ConfigError::Invalid(format!(
                "transfer.chunk_size ({}) must be smaller than server.max_message_size ({})",
                self.transfer.chunk_size, self.server.max_message_size
            )));
        }
        Ok(())
    }

    /// Connection timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.server.connect_timeout_secs)
    }

    /// Keepalive ping interval
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.server.keepalive_interval_secs)
    }

    /// Keepalive ack timeout
    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_secs(self.server.keepalive_timeout_secs)
    }
}
