//! Transfer identity, registry entries and the error taxonomy.

pub mod descriptor;
pub mod types;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use descriptor::Descriptor;
pub use types::{FileSnapshot, Transfer, TransferFile, TransferSnapshot};

/// Length in bytes of a BitTorrent v1 info hash.
pub const INFO_HASH_LEN: usize = 20;

/// SHA-1 hash identifying a unique transfer.
///
/// Used as the registry key and, hex-encoded, as the external handle in the
/// HTTP API and in on-disk artifact names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InfoHash([u8; INFO_HASH_LEN]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; INFO_HASH_LEN]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; INFO_HASH_LEN] {
        &self.0
    }

    /// Parses a 40 character hex string into an info hash.
    ///
    /// Both lower and upper case digits are accepted.
    ///
    /// # Errors
    /// - `TransferError::InvalidIdentifier` - Wrong length or non-hex characters
    pub fn from_hex(hex_str: &str) -> Result<Self, TransferError> {
        if hex_str.len() != INFO_HASH_LEN * 2 {
            return Err(TransferError::InvalidIdentifier {
                reason: format!(
                    "expected {} hex characters, got {}",
                    INFO_HASH_LEN * 2,
                    hex_str.len()
                ),
            });
        }

        let mut hash = [0u8; INFO_HASH_LEN];
        hex::decode_to_slice(hex_str, &mut hash).map_err(|e| {
            TransferError::InvalidIdentifier {
                reason: format!("invalid hex string: {e}"),
            }
        })?;
        Ok(Self(hash))
    }

    /// Lower-case hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for InfoHash {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// Errors surfaced by the registry, the lifecycle controller and the
/// streaming adapter.
///
/// Every variant is returned to the immediate caller; the HTTP layer maps
/// them onto status codes.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Transfer {info_hash} not found")]
    NotFound { info_hash: InfoHash },

    #[error("File {path} not found in transfer {info_hash}")]
    FileNotFound { info_hash: InfoHash, path: String },

    #[error("Invalid transfer identifier: {reason}")]
    InvalidIdentifier { reason: String },

    #[error("File index {index} out of range for transfer {info_hash}")]
    InvalidIndex { info_hash: InfoHash, index: usize },

    #[error("{subject} already started")]
    AlreadyStarted { subject: String },

    #[error("{subject} already stopped")]
    AlreadyStopped { subject: String },

    #[error("Operation not supported: {operation}")]
    Unsupported { operation: &'static str },

    #[error("Engine rejected request: {reason}")]
    EngineRejected { reason: String },

    #[error("Transfer engine is not configured")]
    EngineUnavailable,

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Checks if this error was caused by the caller's input rather than
    /// by system state.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            TransferError::InvalidIdentifier { .. } | TransferError::EngineRejected { .. }
        )
    }
}
