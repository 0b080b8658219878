//! Descriptor resolution: magnet URIs and bare info hashes.

use std::fmt;

use super::{INFO_HASH_LEN, InfoHash, TransferError};

const MAGNET_SCHEME: &str = "magnet:";

/// Parsed description of a transfer, enough for the engine to locate
/// metadata and peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
}

impl Descriptor {
    /// Creates a descriptor carrying only an info hash.
    pub fn from_info_hash(info_hash: InfoHash) -> Self {
        Self {
            info_hash,
            display_name: None,
            trackers: Vec::new(),
        }
    }

    /// Parses a magnet URI or a bare 40 character hex info hash.
    ///
    /// # Errors
    /// - `TransferError::EngineRejected` - Malformed URI, missing or
    ///   unsupported exact topic, or invalid info hash
    pub fn parse(raw: &str) -> Result<Self, TransferError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(TransferError::EngineRejected {
                reason: "empty descriptor".to_string(),
            });
        }

        if raw.len() == INFO_HASH_LEN * 2 && !raw.starts_with(MAGNET_SCHEME) {
            let info_hash = InfoHash::from_hex(raw).map_err(reject)?;
            return Ok(Self::from_info_hash(info_hash));
        }

        Self::parse_magnet(raw)
    }

    fn parse_magnet(raw: &str) -> Result<Self, TransferError> {
        if !raw.starts_with(MAGNET_SCHEME) {
            return Err(TransferError::EngineRejected {
                reason: format!("not a magnet link: {raw}"),
            });
        }

        let magnet = magnet_url::Magnet::new(raw).map_err(|e| TransferError::EngineRejected {
            reason: format!("Invalid magnet link: {e}"),
        })?;

        match magnet.hash_type() {
            Some("btih") => {}
            other => {
                return Err(TransferError::EngineRejected {
                    reason: format!("unsupported exact topic: {}", other.unwrap_or("none")),
                });
            }
        }

        let hash = magnet.hash().ok_or_else(|| TransferError::EngineRejected {
            reason: "magnet link does not contain an info hash".to_string(),
        })?;
        let info_hash = InfoHash::from_hex(hash).map_err(reject)?;

        Ok(Self {
            info_hash,
            display_name: magnet.display_name().map(decode_display_name),
            trackers: magnet.trackers().to_vec(),
        })
    }

    /// Renders the descriptor back into a magnet URI.
    pub fn to_magnet(&self) -> String {
        let mut uri = format!("magnet:?xt=urn:btih:{}", self.info_hash);
        if let Some(name) = &self.display_name {
            uri.push_str("&dn=");
            uri.push_str(&urlencoding::encode(name));
        }
        for tracker in &self.trackers {
            uri.push_str("&tr=");
            uri.push_str(&urlencoding::encode(tracker));
        }
        uri
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "{name} ({})", self.info_hash),
            None => write!(f, "{}", self.info_hash),
        }
    }
}

fn reject(error: TransferError) -> TransferError {
    TransferError::EngineRejected {
        reason: error.to_string(),
    }
}

/// Magnet display names arrive form-encoded; fall back to the raw value
/// when they are not valid percent-encoding.
fn decode_display_name(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}
