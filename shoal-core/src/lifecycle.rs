//! Lifecycle transitions on registry entries and the engine handles they
//! wrap.

use std::sync::Arc;

use crate::engine::{EngineTransfer, FilePriority};
use crate::registry::{RegistryState, TransferRegistry};
use crate::transfer::{Descriptor, InfoHash, TransferError};

/// Drives add, start, stop and per-file transitions.
///
/// Cheap to clone; every clone talks to the same registry.
#[derive(Clone)]
pub struct LifecycleController {
    registry: Arc<TransferRegistry>,
}

impl LifecycleController {
    pub fn new(registry: Arc<TransferRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<TransferRegistry> {
        &self.registry
    }

    /// Hands a magnet URI or bare info hash to the engine and records the
    /// resulting transfer.
    ///
    /// Returns as soon as the engine accepts the descriptor. With
    /// `auto_start` enabled the transfer starts by itself once metadata
    /// arrives.
    ///
    /// # Errors
    /// - `TransferError::EngineUnavailable` - No engine configured
    /// - `TransferError::EngineRejected` - Malformed, refused or duplicate descriptor
    pub async fn add_descriptor(&self, raw: &str) -> Result<InfoHash, TransferError> {
        let descriptor = Descriptor::parse(raw)?;

        let mut state = self.registry.lock().await;
        let engine = state.engine()?;
        let handle = engine.add_descriptor(&descriptor).await?;
        let info_hash = handle.info_hash();
        state.upsert(Arc::clone(&handle));

        let auto_start = state.config.as_ref().is_some_and(|config| config.auto_start);
        if auto_start {
            self.ensure_watch(&mut state, info_hash, handle);
        }

        tracing::info!("Added transfer {}", descriptor);
        Ok(info_hash)
    }

    /// Starts fetching the whole transfer.
    ///
    /// Without metadata the fetch is deferred until it arrives.
    ///
    /// # Errors
    /// - `TransferError::InvalidIdentifier` - `id` is not 40 hex characters
    /// - `TransferError::NotFound` - No such transfer
    /// - `TransferError::AlreadyStarted` - Transfer is already started
    pub async fn start(&self, id: &str) -> Result<(), TransferError> {
        let info_hash = InfoHash::from_hex(id)?;
        let mut state = self.registry.lock().await;
        self.start_locked(&mut state, info_hash)
    }

    fn start_locked(
        &self,
        state: &mut RegistryState,
        info_hash: InfoHash,
    ) -> Result<(), TransferError> {
        let transfer = state.transfer_mut(&info_hash)?;
        if transfer.started {
            return Err(TransferError::AlreadyStarted {
                subject: info_hash.to_string(),
            });
        }

        let handle = Arc::clone(transfer.engine_handle());
        if handle.is_dropped() {
            tracing::warn!(
                "Transfer {} was stopped and its engine transfer dropped; add it again to resume fetching",
                info_hash
            );
        }

        transfer.set_started(true);

        if handle.has_metadata() {
            handle.download_all();
            tracing::info!("Started transfer {}", info_hash);
        } else {
            self.ensure_watch(state, info_hash, handle);
            tracing::info!("Transfer {} will start fetching once metadata arrives", info_hash);
        }
        Ok(())
    }

    /// Stops a transfer by dropping it from the engine.
    ///
    /// Fetching cannot be resumed on the same handle; a later `start` only
    /// flips flags.
    ///
    /// # Errors
    /// - `TransferError::InvalidIdentifier` - `id` is not 40 hex characters
    /// - `TransferError::NotFound` - No such transfer
    /// - `TransferError::AlreadyStopped` - Transfer is not started
    pub async fn stop(&self, id: &str) -> Result<(), TransferError> {
        let info_hash = InfoHash::from_hex(id)?;
        let mut state = self.registry.lock().await;

        let transfer = state.transfer_mut(&info_hash)?;
        if !transfer.started {
            return Err(TransferError::AlreadyStopped {
                subject: info_hash.to_string(),
            });
        }
        transfer.engine_handle().drop_transfer();
        transfer.set_started(false);
        state.cancel_watch(&info_hash);

        tracing::info!("Stopped transfer {}", info_hash);
        Ok(())
    }

    /// Raises one file to high priority and marks it started.
    ///
    /// # Errors
    /// - `TransferError::InvalidIdentifier` - `id` is not 40 hex characters
    /// - `TransferError::NotFound` - No such transfer
    /// - `TransferError::FileNotFound` - No file at `path`
    /// - `TransferError::AlreadyStarted` - File is already started
    pub async fn start_file(&self, id: &str, path: &str) -> Result<(), TransferError> {
        let info_hash = InfoHash::from_hex(id)?;
        let mut state = self.registry.lock().await;

        let transfer = state.transfer_mut(&info_hash)?;
        let file = transfer
            .files
            .iter_mut()
            .find(|file| file.path == path)
            .ok_or_else(|| TransferError::FileNotFound {
                info_hash,
                path: path.to_string(),
            })?;
        if file.started {
            return Err(TransferError::AlreadyStarted {
                subject: path.to_string(),
            });
        }

        file.handle.set_priority(FilePriority::High);
        file.started = true;
        transfer.started = true;

        tracing::info!("Started file {} of {}", path, info_hash);
        Ok(())
    }

    /// Per-file stop is not available.
    ///
    /// # Errors
    /// - `TransferError::Unsupported` - Always
    pub async fn stop_file(&self, _id: &str, _path: &str) -> Result<(), TransferError> {
        Err(TransferError::Unsupported {
            operation: "stop file",
        })
    }

    /// Spawns a metadata watch for `info_hash` unless one is pending.
    fn ensure_watch(
        &self,
        state: &mut RegistryState,
        info_hash: InfoHash,
        handle: Arc<dyn EngineTransfer>,
    ) {
        if state
            .watches
            .get(&info_hash)
            .is_some_and(|watch| !watch.is_finished())
        {
            return;
        }

        let controller = self.clone();
        let watch = tokio::spawn(async move {
            handle.metadata_ready().await;
            if let Err(e) = controller.on_metadata_ready(info_hash).await {
                tracing::warn!("Metadata watch for {} failed: {}", info_hash, e);
            }
        });
        state.watches.insert(info_hash, watch);
        tracing::debug!("Watching {} for metadata", info_hash);
    }

    async fn on_metadata_ready(&self, info_hash: InfoHash) -> Result<(), TransferError> {
        let mut state = self.registry.lock().await;
        // This task is the watch; dropping its handle detaches without aborting.
        state.watches.remove(&info_hash);

        let Some(transfer) = state.transfers.get(&info_hash) else {
            return Ok(());
        };
        let handle = Arc::clone(transfer.engine_handle());
        let started = transfer.started;
        state.upsert(Arc::clone(&handle));
        tracing::debug!("Metadata ready for {}", info_hash);

        if started {
            handle.download_all();
            tracing::info!("Started deferred fetch of {}", info_hash);
            Ok(())
        } else {
            self.start_locked(&mut state, info_hash)
        }
    }
}
