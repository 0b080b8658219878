//! Boundary with the external transfer engine.
//!
//! The engine owns the peer wire protocol, piece selection and on-disk piece
//! storage. Shoal only talks to it through the traits below: building a
//! client from an [`EngineConfig`], adding descriptors, enumerating live
//! transfers, waiting for metadata, fetching, dropping and opening
//! random-access readers over a transfer's byte space.

#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncSeek};

use crate::config::EngineConfig;
use crate::transfer::{Descriptor, InfoHash, TransferError};

/// Builds engine clients; called on startup and on every reconfiguration.
#[async_trait]
pub trait EngineBuilder: Send + Sync {
    /// Initializes a new engine client from the given settings.
    ///
    /// # Errors
    /// - `TransferError::EngineRejected` - Settings refused by the engine
    /// - `TransferError::Io` - Data directory could not be prepared
    async fn build(&self, config: &EngineConfig) -> Result<Arc<dyn TransferEngine>, TransferError>;
}

/// A configured engine client.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Adds a transfer and returns its handle immediately, before metadata
    /// is necessarily available.
    ///
    /// # Errors
    /// - `TransferError::EngineRejected` - Duplicate or refused descriptor
    async fn add_descriptor(
        &self,
        descriptor: &Descriptor,
    ) -> Result<Arc<dyn EngineTransfer>, TransferError>;

    /// All transfers the engine currently holds, in no particular order.
    fn transfers(&self) -> Vec<Arc<dyn EngineTransfer>>;

    /// Shuts the client down, dropping every transfer.
    async fn close(&self);
}

/// Engine-side state of one transfer.
#[async_trait]
pub trait EngineTransfer: Send + Sync + fmt::Debug {
    fn info_hash(&self) -> InfoHash;

    /// Display name; falls back to something derived from the info hash
    /// before metadata arrives.
    fn name(&self) -> String;

    fn has_metadata(&self) -> bool;

    /// Resolves once metadata is available. Never resolves if it never
    /// arrives.
    async fn metadata_ready(&self);

    /// Total content length, 0 before metadata.
    fn total_length(&self) -> u64;

    fn completed_length(&self) -> u64;

    /// File layout in engine order, empty before metadata.
    fn files(&self) -> Vec<EngineFile>;

    /// Requests every piece of the transfer.
    fn download_all(&self);

    /// Destroys the transfer inside the engine: peers, in-memory piece
    /// state and pending requests. There is no way back.
    fn drop_transfer(&self);

    fn is_dropped(&self) -> bool;

    /// Opens a reader over the transfer's concatenated byte space,
    /// positioned at 0.
    fn new_reader(&self) -> Box<dyn EngineReader>;
}

/// One entry of a transfer's file layout as reported by the engine.
#[derive(Clone)]
pub struct EngineFile {
    pub path: String,
    pub length: u64,
    pub offset: u64,
    pub handle: Arc<dyn EngineFileHandle>,
}

impl fmt::Debug for EngineFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineFile")
            .field("path", &self.path)
            .field("length", &self.length)
            .field("offset", &self.offset)
            .field("priority", &self.handle.priority())
            .finish()
    }
}

/// Download priority of a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum FilePriority {
    /// Not requested.
    #[default]
    None,
    /// Fetched as part of the whole transfer.
    Normal,
    /// Fetched ahead of normal priority files.
    High,
}

/// Engine file object used to adjust priority.
pub trait EngineFileHandle: Send + Sync + fmt::Debug {
    fn priority(&self) -> FilePriority;
    fn set_priority(&self, priority: FilePriority);
}

/// Random-access reader over a transfer's byte space.
///
/// Reads stay pending until the requested bytes have been fetched from
/// peers or the engine fails.
pub trait EngineReader: AsyncRead + AsyncSeek + Send + Unpin {
    /// Number of bytes past the read cursor the engine should prioritize.
    fn set_readahead(&mut self, bytes: u64);

    /// Favors pieces near the read cursor over everything else.
    fn set_responsive(&mut self);

    /// Releases engine-side buffers and registrations.
    fn close(&mut self);
}
