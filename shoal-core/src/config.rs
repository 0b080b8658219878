//! Centralized configuration for Shoal.
//!
//! `ShoalConfig` is what lives on disk as JSON; `EngineConfig` is what the
//! registry hands to the engine builder on every (re)configuration.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "./shoal.json";

/// Fallback peer listening port when the configured one is unusable.
pub const DEFAULT_INCOMING_PORT: u16 = 50007;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid download directory: {reason}")]
    InvalidDownloadDirectory { reason: String },
}

/// Application settings loaded from `shoal.json`.
///
/// Every field is optional in the file; missing fields take the defaults
/// below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShoalConfig {
    /// Where the engine stores piece data
    pub download_directory: PathBuf,
    /// Port of the HTTP API and stream server
    pub http_server_port: u16,
    /// Peer listening port handed to the engine
    pub incoming_port: u16,
    /// Period of the snapshot refresher
    pub refresh_interval_ms: u64,
    /// Pause between closing and rebuilding the engine client
    pub settle_delay_ms: u64,
}

impl Default for ShoalConfig {
    fn default() -> Self {
        Self {
            download_directory: PathBuf::from("./downloads"),
            http_server_port: 8080,
            incoming_port: DEFAULT_INCOMING_PORT,
            refresh_interval_ms: 1000,
            settle_delay_ms: 1000,
        }
    }
}

impl ShoalConfig {
    /// Loads settings from a JSON file.
    ///
    /// A missing file yields the defaults; anything else that goes wrong is
    /// an error.
    ///
    /// # Errors
    /// - `ConfigError::Read` - File exists but could not be read
    /// - `ConfigError::Parse` - File is not valid JSON for this schema
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(
                    "No config file at {}, using defaults",
                    path.display()
                );
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Refresher period.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Builds the engine settings, resolving the download directory to an
    /// absolute path and replacing an unusable listening port.
    ///
    /// # Errors
    /// - `ConfigError::InvalidDownloadDirectory` - Current directory unavailable
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let download_directory = std::path::absolute(&self.download_directory).map_err(|e| {
            ConfigError::InvalidDownloadDirectory {
                reason: format!("{}: {e}", self.download_directory.display()),
            }
        })?;

        let incoming_port = if self.incoming_port == 0 || self.incoming_port == u16::MAX {
            DEFAULT_INCOMING_PORT
        } else {
            self.incoming_port
        };

        Ok(EngineConfig {
            download_directory,
            incoming_port,
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            ..EngineConfig::default()
        })
    }
}

/// Settings applied to the transfer engine client.
///
/// Replacing them tears down and recreates the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Directory for piece data and descriptor artifacts
    pub download_directory: PathBuf,
    /// Peer listening port, must be non-zero
    pub incoming_port: u16,
    /// Disable protocol encryption
    pub disable_encryption: bool,
    /// Serve pieces to other peers while downloading
    pub enable_upload: bool,
    /// Keep serving once complete
    pub enable_seeding: bool,
    /// Start a transfer automatically once its metadata arrives
    pub auto_start: bool,
    /// Pause between closing the old client and building the new one
    pub settle_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            download_directory: PathBuf::from("./downloads"),
            incoming_port: DEFAULT_INCOMING_PORT,
            disable_encryption: true,
            enable_upload: true,
            enable_seeding: false,
            auto_start: true,
            settle_delay: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    /// Path of the on-disk descriptor artifact for a transfer.
    pub fn descriptor_path(&self, info_hash: &crate::transfer::InfoHash) -> PathBuf {
        self.download_directory.join(format!("{info_hash}.torrent"))
    }
}
