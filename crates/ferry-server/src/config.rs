//! Server configuration.
//!
//! Loaded from an optional TOML file; every field has a default so an empty
//! file (or no file at all) yields a working server. Command-line flags are
//! applied on top by the binary.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

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

/// Top-level server configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener and transport settings
    pub server: ListenConfig,
    /// Upload directory settings
    pub storage: StorageConfig,
    /// Per-transfer behaviour
    pub transfer: TransferConfig,
}

/// `[server]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Address the gRPC server binds to
    pub listen_addr: String,
    /// Largest encoded or decoded gRPC message, in bytes
    pub max_message_size: usize,
    /// HTTP/2 keepalive ping interval
    pub keepalive_interval_secs: u64,
    /// How long to wait for a keepalive ack
    pub keepalive_timeout_secs: u64,
    /// Transfers served at once; further streams wait for a slot
    pub max_concurrent_transfers: usize,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:50051".to_string(),
            max_message_size: 100 * 1024 * 1024,
            keepalive_interval_secs: 60,
            keepalive_timeout_secs: 10,
            max_concurrent_transfers: 50,
        }
    }
}

/// `[storage]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory uploads are written to (created on startup)
    pub upload_dir: PathBuf,
    /// Block size used when hashing stored files
    pub read_buffer_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./uploads"),
            read_buffer_size: ferry_core::DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// `[transfer]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Seconds a stream may go without a chunk before it is failed
    pub idle_chunk_timeout_secs: u64,
    /// Refuse a second concurrent upload to the same filename
    pub exclusive_filenames: bool,
    /// Log a progress line every this many chunks (0 disables)
    pub progress_log_interval: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            idle_chunk_timeout_secs: 300,
            exclusive_filenames: true,
            progress_log_interval: 100,
        }
    }
}

impl ServerConfig {
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
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed input.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Check that every value is usable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;

        let nonzero = [
            ("server.max_message_size", self.server.max_message_size as u64),
            (
                "server.max_concurrent_transfers",
                self.server.max_concurrent_transfers as u64,
            ),
            ("storage.read_buffer_size", self.storage.read_buffer_size as u64),
            (
                "transfer.idle_chunk_timeout_secs",
                self.transfer.idle_chunk_timeout_secs,
            ),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{field} must be greater than 0")));
            }
        }

        if self.storage.upload_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "storage.upload_dir must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Parsed listen address
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `listen_addr` is not `host:port`.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.listen_addr.parse().map_err(|e| {
            ConfigError::Invalid(format!(
                "server.listen_addr {:?}: {e}",
                self.server.listen_addr
            ))
        })
    }

    /// Keepalive ping interval
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.server.keepalive_interval_secs)
    }

    /// Keepalive ack timeout
    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_secs(self.server.keepalive_timeout_secs)
    }

    /// Idle-chunk timeout
    pub fn idle_chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer.idle_chunk_timeout_secs)
    }
}
