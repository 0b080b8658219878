//! Simulated transfer: piece bookkeeping, download ticks and reader
//! registrations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::task::Waker;

use async_trait::async_trait;
use parking_lot::Mutex;
use shoal_core::{
    EngineFile, EngineFileHandle, EngineReader, EngineTransfer, FilePriority, InfoHash,
};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::catalog::CatalogEntry;
use crate::config::SimulationConfig;
use crate::reader::SimReader;

/// Priority handle of one simulated file.
#[derive(Debug, Default)]
pub struct SimFileHandle {
    priority: Mutex<FilePriority>,
}

impl EngineFileHandle for SimFileHandle {
    fn priority(&self) -> FilePriority {
        *self.priority.lock()
    }

    fn set_priority(&self, priority: FilePriority) {
        *self.priority.lock() = priority;
    }
}

/// Download interest registered by an open reader.
#[derive(Debug, Default)]
pub(crate) struct ReaderInterest {
    pub(crate) position: u64,
    pub(crate) readahead: u64,
    pub(crate) responsive: bool,
    pub(crate) waker: Option<Waker>,
}

#[derive(Debug, Default)]
pub(crate) struct SimState {
    pub(crate) metadata: bool,
    pub(crate) completed: Vec<bool>,
    pub(crate) wanted_all: bool,
    pub(crate) dropped: bool,
    pub(crate) readers: HashMap<u64, ReaderInterest>,
    next_reader_id: u64,
    credit: u64,
}

/// One transfer inside the simulated engine.
#[derive(Debug)]
pub struct SimTransfer {
    weak_self: Weak<SimTransfer>,
    info_hash: InfoHash,
    fallback_name: String,
    entry: Option<Arc<CatalogEntry>>,
    config: SimulationConfig,
    file_handles: Vec<Arc<SimFileHandle>>,
    metadata_tx: watch::Sender<bool>,
    pub(crate) state: Mutex<SimState>,
}

impl SimTransfer {
    /// Creates the transfer and spawns its metadata and download tasks.
    ///
    /// Content missing from the catalog never receives metadata.
    pub(crate) fn spawn(
        info_hash: InfoHash,
        fallback_name: String,
        entry: Option<Arc<CatalogEntry>>,
        config: SimulationConfig,
        manifest_path: PathBuf,
    ) -> Arc<Self> {
        let file_handles = entry
            .as_ref()
            .map(|entry| {
                entry
                    .files()
                    .iter()
                    .map(|_| Arc::new(SimFileHandle::default()))
                    .collect()
            })
            .unwrap_or_default();
        let (metadata_tx, _) = watch::channel(false);

        let transfer = Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            info_hash,
            fallback_name,
            entry,
            config,
            file_handles,
            metadata_tx,
            state: Mutex::new(SimState::default()),
        });

        if transfer.entry.is_some() {
            tokio::spawn(run_transfer(Arc::downgrade(&transfer), manifest_path));
        } else {
            tracing::debug!("{} is not in the catalog, metadata will never arrive", info_hash);
        }
        transfer
    }

    pub(crate) fn piece_length(&self) -> u64 {
        self.config.piece_length.max(1)
    }

    pub(crate) fn entry(&self) -> Option<&Arc<CatalogEntry>> {
        self.entry.as_ref()
    }

    /// Number of completed pieces.
    pub fn completed_pieces(&self) -> usize {
        self.state.lock().completed.iter().filter(|done| **done).count()
    }

    /// Whether the piece holding byte `offset` has been fetched.
    pub fn has_byte(&self, offset: u64) -> bool {
        let index = (offset / self.piece_length()) as usize;
        self.state.lock().completed.get(index).copied().unwrap_or(false)
    }

    /// Number of readers currently registered.
    pub fn reader_count(&self) -> usize {
        self.state.lock().readers.len()
    }

    fn publish_metadata(&self) {
        let Some(entry) = &self.entry else {
            return;
        };
        let piece_count = entry.total_length().div_ceil(self.piece_length()) as usize;
        {
            let mut state = self.state.lock();
            if state.dropped {
                return;
            }
            state.metadata = true;
            state.completed = vec![false; piece_count];
        }
        self.metadata_tx.send_replace(true);
        tracing::debug!(
            "Metadata available for {}: {} pieces",
            self.info_hash,
            piece_count
        );
    }

    /// Completes pieces worth one tick of bandwidth and wakes readers.
    ///
    /// Returns false once the transfer is dropped.
    fn tick(&self) -> bool {
        let Some(entry) = &self.entry else {
            return false;
        };
        let mut state = self.state.lock();
        if state.dropped {
            return false;
        }
        if !state.metadata {
            return true;
        }

        state.credit += self.config.bytes_per_tick();
        let mut progressed = false;
        while let Some(piece) = self.next_piece(&state) {
            let length = self.piece_size(piece, entry.total_length());
            if state.credit < length {
                break;
            }
            state.credit -= length;
            state.completed[piece] = true;
            progressed = true;
        }
        if self.next_piece(&state).is_none() {
            state.credit = 0;
        }

        if progressed {
            for interest in state.readers.values_mut() {
                if let Some(waker) = interest.waker.take() {
                    waker.wake();
                }
            }
        }
        true
    }

    fn piece_size(&self, piece: usize, total: u64) -> u64 {
        let start = piece as u64 * self.piece_length();
        (total - start).min(self.piece_length())
    }

    /// Picks the next missing piece.
    ///
    /// Reader windows come first, responsive readers ahead of the rest and
    /// nearest piece first. High priority files follow, then everything
    /// else when the whole transfer or a normal priority file is wanted.
    fn next_piece(&self, state: &SimState) -> Option<usize> {
        let piece_length = self.piece_length();
        let missing = |piece: &usize| !state.completed.get(*piece).copied().unwrap_or(true);

        let mut readers: Vec<&ReaderInterest> = state.readers.values().collect();
        readers.sort_by_key(|interest| (!interest.responsive, interest.position));
        for interest in readers {
            let first = (interest.position / piece_length) as usize;
            let last = (interest.position + interest.readahead.max(1) - 1) / piece_length;
            if let Some(piece) = (first..=last as usize).find(missing) {
                return Some(piece);
            }
        }

        let entry = self.entry.as_ref()?;
        for wanted in [FilePriority::High, FilePriority::Normal] {
            for (file, handle) in entry.files().iter().zip(&self.file_handles) {
                if handle.priority() != wanted || file.length == 0 {
                    continue;
                }
                let first = (file.offset / piece_length) as usize;
                let last = ((file.offset + file.length - 1) / piece_length) as usize;
                if let Some(piece) = (first..=last).find(missing) {
                    return Some(piece);
                }
            }
        }

        if state.wanted_all {
            return (0..state.completed.len()).find(missing);
        }
        None
    }

    pub(crate) fn register_reader(&self) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_reader_id;
        state.next_reader_id += 1;
        state.readers.insert(id, ReaderInterest::default());
        id
    }

    pub(crate) fn unregister_reader(&self, id: u64) {
        self.state.lock().readers.remove(&id);
    }
}

#[async_trait]
impl EngineTransfer for SimTransfer {
    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    fn name(&self) -> String {
        match &self.entry {
            Some(entry) if self.has_metadata() => entry.name().to_string(),
            _ => self.fallback_name.clone(),
        }
    }

    fn has_metadata(&self) -> bool {
        self.state.lock().metadata
    }

    async fn metadata_ready(&self) {
        let mut receiver = self.metadata_tx.subscribe();
        let _ = receiver.wait_for(|ready| *ready).await;
    }

    fn total_length(&self) -> u64 {
        match &self.entry {
            Some(entry) if self.has_metadata() => entry.total_length(),
            _ => 0,
        }
    }

    fn completed_length(&self) -> u64 {
        let Some(entry) = &self.entry else {
            return 0;
        };
        let state = self.state.lock();
        state
            .completed
            .iter()
            .enumerate()
            .filter(|(_, done)| **done)
            .map(|(piece, _)| self.piece_size(piece, entry.total_length()))
            .sum()
    }

    fn files(&self) -> Vec<EngineFile> {
        let Some(entry) = &self.entry else {
            return Vec::new();
        };
        if !self.has_metadata() {
            return Vec::new();
        }
        entry
            .files()
            .iter()
            .zip(&self.file_handles)
            .map(|(file, handle)| EngineFile {
                path: file.path.clone(),
                length: file.length,
                offset: file.offset,
                handle: Arc::clone(handle) as Arc<dyn EngineFileHandle>,
            })
            .collect()
    }

    fn download_all(&self) {
        let mut state = self.state.lock();
        if state.dropped {
            return;
        }
        state.wanted_all = true;
        for handle in &self.file_handles {
            if handle.priority() == FilePriority::None {
                handle.set_priority(FilePriority::Normal);
            }
        }
    }

    fn drop_transfer(&self) {
        let mut state = self.state.lock();
        if state.dropped {
            return;
        }
        state.dropped = true;
        for interest in state.readers.values_mut() {
            if let Some(waker) = interest.waker.take() {
                waker.wake();
            }
        }
        tracing::debug!("Dropped simulated transfer {}", self.info_hash);
    }

    fn is_dropped(&self) -> bool {
        self.state.lock().dropped
    }

    fn new_reader(&self) -> Box<dyn EngineReader> {
        Box::new(SimReader::new(self.weak_self.clone(), self.register_reader()))
    }
}

async fn run_transfer(transfer: Weak<SimTransfer>, manifest_path: PathBuf) {
    let Some((metadata_delay, tick_interval)) = transfer
        .upgrade()
        .map(|t| (t.config.metadata_delay, t.config.tick_interval))
    else {
        return;
    };

    tokio::time::sleep(metadata_delay).await;
    let Some(current) = transfer.upgrade() else {
        return;
    };
    current.publish_metadata();
    if let Some(entry) = current.entry() {
        write_manifest(&manifest_path, entry).await;
    }
    drop(current);

    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(current) = transfer.upgrade() else {
            break;
        };
        if !current.tick() {
            break;
        }
    }
}

async fn write_manifest(path: &Path, entry: &CatalogEntry) {
    let contents = match serde_json::to_vec_pretty(&entry.manifest()) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::warn!("Failed to encode manifest for {}: {}", entry.name(), e);
            return;
        }
    };
    if let Err(e) = tokio::fs::write(path, contents).await {
        tracing::warn!("Failed to write {}: {}", path.display(), e);
    }
}
