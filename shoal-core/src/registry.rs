//! Transfer registry: the process-wide cache of transfer state.
//!
//! One async mutex guards everything that must change together: the engine
//! client, the last applied engine settings, the transfer map, the cached
//! snapshot and the metadata-watch tasks. Readers of the snapshot therefore
//! never observe a half-reconciled transfer.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::engine::{EngineBuilder, EngineTransfer, TransferEngine};
use crate::transfer::{InfoHash, Transfer, TransferError, TransferSnapshot};

/// Snapshot of every known transfer keyed by info hash.
pub type SnapshotMap = BTreeMap<InfoHash, TransferSnapshot>;

/// State guarded by the registry lock.
#[derive(Default)]
pub(crate) struct RegistryState {
    pub(crate) engine: Option<Arc<dyn TransferEngine>>,
    pub(crate) config: Option<EngineConfig>,
    pub(crate) transfers: BTreeMap<InfoHash, Transfer>,
    pub(crate) snapshot: Option<SnapshotMap>,
    pub(crate) watches: HashMap<InfoHash, JoinHandle<()>>,
}

impl RegistryState {
    /// Engine client, or `EngineUnavailable` before the first `configure`.
    pub(crate) fn engine(&self) -> Result<Arc<dyn TransferEngine>, TransferError> {
        self.engine.clone().ok_or(TransferError::EngineUnavailable)
    }

    /// Finds or creates the entry for `handle` and refreshes it.
    pub(crate) fn upsert(&mut self, handle: Arc<dyn EngineTransfer>) -> &mut Transfer {
        self.transfers
            .entry(handle.info_hash())
            .and_modify(|transfer| transfer.update(&handle))
            .or_insert_with(|| Transfer::new(handle))
    }

    pub(crate) fn transfer(&self, info_hash: &InfoHash) -> Result<&Transfer, TransferError> {
        self.transfers
            .get(info_hash)
            .ok_or(TransferError::NotFound {
                info_hash: *info_hash,
            })
    }

    pub(crate) fn transfer_mut(
        &mut self,
        info_hash: &InfoHash,
    ) -> Result<&mut Transfer, TransferError> {
        self.transfers
            .get_mut(info_hash)
            .ok_or(TransferError::NotFound {
                info_hash: *info_hash,
            })
    }

    /// Aborts the metadata watch for `info_hash`, if any.
    pub(crate) fn cancel_watch(&mut self, info_hash: &InfoHash) {
        if let Some(watch) = self.watches.remove(info_hash) {
            watch.abort();
            tracing::debug!("Cancelled metadata watch for {}", info_hash);
        }
    }

    fn cancel_all_watches(&mut self) {
        for (_, watch) in self.watches.drain() {
            watch.abort();
        }
    }

    /// Pulls every live engine handle into the map and rebuilds the cached
    /// snapshot. Returns `None` when no engine is configured.
    fn reconcile(&mut self) -> Option<&SnapshotMap> {
        let engine = self.engine.clone()?;

        for handle in engine.transfers() {
            if handle.is_dropped() {
                continue;
            }
            self.upsert(handle);
        }

        let snapshot = self
            .transfers
            .iter()
            .map(|(info_hash, transfer)| (*info_hash, transfer.snapshot()))
            .collect();
        self.snapshot = Some(snapshot);
        self.snapshot.as_ref()
    }
}

/// Concurrency-safe cache of transfers, reconciled against the engine.
///
/// Constructed once per process and shared by `Arc` between the lifecycle
/// controller, the refresher and the HTTP layer.
pub struct TransferRegistry {
    builder: Arc<dyn EngineBuilder>,
    state: Mutex<RegistryState>,
}

impl TransferRegistry {
    /// Creates an unconfigured registry. Nothing touches the engine until
    /// [`configure`](Self::configure) succeeds.
    pub fn new(builder: Arc<dyn EngineBuilder>) -> Self {
        Self {
            builder,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().await
    }

    /// Applies new engine settings, replacing any running client.
    ///
    /// The old client is closed and the registry waits `settle_delay`
    /// before building the new one so the listening port is released. The
    /// lock is held throughout; every other registry operation waits.
    /// Entries from the old client are discarded.
    ///
    /// # Errors
    /// - `TransferError::EngineRejected` - Listening port is 0 or the
    ///   builder refused the settings
    /// - `TransferError::Io` - Download directory could not be created
    pub async fn configure(&self, config: EngineConfig) -> Result<(), TransferError> {
        if config.incoming_port == 0 {
            return Err(TransferError::EngineRejected {
                reason: "incoming port must be non-zero".to_string(),
            });
        }

        let mut state = self.state.lock().await;
        state.cancel_all_watches();

        if let Some(old) = state.engine.take() {
            tracing::info!("Closing engine client before reconfiguration");
            old.close().await;
            state.transfers.clear();
            state.snapshot = None;
            tokio::time::sleep(config.settle_delay).await;
        }

        tokio::fs::create_dir_all(&config.download_directory).await?;
        let engine = self.builder.build(&config).await?;

        tracing::info!(
            "Engine configured: download_directory={}, incoming_port={}",
            config.download_directory.display(),
            config.incoming_port
        );
        state.engine = Some(engine);
        state.config = Some(config);
        state.reconcile();
        Ok(())
    }

    /// Returns true once an engine client is configured.
    pub async fn is_ready(&self) -> bool {
        self.state.lock().await.engine.is_some()
    }

    /// Last applied engine settings.
    pub async fn config(&self) -> Option<EngineConfig> {
        self.state.lock().await.config.clone()
    }

    /// Reconciles with the engine and returns the fresh snapshot, or `None`
    /// while no engine is configured.
    pub async fn list(&self) -> Option<SnapshotMap> {
        let mut state = self.state.lock().await;
        state.reconcile().cloned()
    }

    /// Last snapshot stored by [`list`](Self::list) or
    /// [`refresh`](Self::refresh), without touching the engine.
    pub async fn cached_snapshot(&self) -> Option<SnapshotMap> {
        self.state.lock().await.snapshot.clone()
    }

    /// Reconciles with the engine and stores the snapshot.
    ///
    /// Returns the number of transfers in the snapshot.
    ///
    /// # Errors
    /// - `TransferError::EngineUnavailable` - No engine configured yet
    pub async fn refresh(&self) -> Result<usize, TransferError> {
        let mut state = self.state.lock().await;
        state
            .reconcile()
            .map(BTreeMap::len)
            .ok_or(TransferError::EngineUnavailable)
    }

    /// Snapshot of a single transfer.
    ///
    /// # Errors
    /// - `TransferError::InvalidIdentifier` - `id` is not 40 hex characters
    /// - `TransferError::NotFound` - No such transfer
    pub async fn get(&self, id: &str) -> Result<TransferSnapshot, TransferError> {
        let info_hash = InfoHash::from_hex(id)?;
        let state = self.state.lock().await;
        state.transfer(&info_hash).map(Transfer::snapshot)
    }

    /// Removes a transfer for good.
    ///
    /// Cancels its metadata watch, removes the descriptor artifact from the
    /// download directory, drops the engine transfer and forgets the entry.
    /// Open stream readers fail on their next read.
    ///
    /// # Errors
    /// - `TransferError::InvalidIdentifier` - `id` is not 40 hex characters
    /// - `TransferError::NotFound` - No such transfer
    /// - `TransferError::Io` - Descriptor artifact exists but could not be removed
    pub async fn delete(&self, id: &str) -> Result<(), TransferError> {
        let info_hash = InfoHash::from_hex(id)?;
        let mut state = self.state.lock().await;
        state.transfer(&info_hash)?;

        state.cancel_watch(&info_hash);

        if let Some(config) = &state.config {
            let artifact = config.descriptor_path(&info_hash);
            match tokio::fs::remove_file(&artifact).await {
                Ok(()) => tracing::debug!("Removed {}", artifact.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(transfer) = state.transfers.remove(&info_hash) {
            transfer.engine_handle().drop_transfer();
        }
        if let Some(snapshot) = state.snapshot.as_mut() {
            snapshot.remove(&info_hash);
        }

        tracing::info!("Deleted transfer {}", info_hash);
        Ok(())
    }

    /// Cancels every watch, closes the engine and forgets all transfers.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.cancel_all_watches();
        if let Some(engine) = state.engine.take() {
            engine.close().await;
        }
        state.transfers.clear();
        state.snapshot = None;
        tracing::info!("Transfer registry shut down");
    }
}
