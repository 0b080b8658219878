//! Mock engine for testing the registry, lifecycle and streaming layers.
//!
//! Content is registered up front with [`MockEngine::register_content`];
//! metadata is released explicitly with [`MockEngine::complete_metadata`].
//! Readers serve deterministic bytes and never block.

use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tokio::sync::watch;

use super::{
    EngineBuilder, EngineFile, EngineFileHandle, EngineReader, EngineTransfer, FilePriority,
    TransferEngine,
};
use crate::config::EngineConfig;
use crate::transfer::{Descriptor, InfoHash, TransferError};

/// Byte stored at a given offset of every mock transfer.
pub fn mock_byte_at(offset: u64) -> u8 {
    (offset % 251) as u8
}

/// File entry of registered mock content.
#[derive(Debug, Clone)]
pub struct MockFileSpec {
    pub path: String,
    pub length: u64,
}

impl MockFileSpec {
    pub fn new(path: &str, length: u64) -> Self {
        Self {
            path: path.to_string(),
            length,
        }
    }
}

#[derive(Debug)]
struct MockContent {
    name: String,
    files: Vec<MockFileSpec>,
    data: Bytes,
    metadata_released: bool,
}

/// Observable side effects of a mock transfer.
#[derive(Debug, Default, Clone)]
pub struct MockTransferState {
    pub download_all_calls: usize,
    pub dropped: bool,
    pub readers_opened: usize,
    pub readers_closed: usize,
    pub last_readahead: Option<u64>,
    pub responsive: bool,
    pub seeks: Vec<u64>,
}

#[derive(Debug)]
pub struct MockFileHandle {
    priority: Mutex<FilePriority>,
}

impl EngineFileHandle for MockFileHandle {
    fn priority(&self) -> FilePriority {
        *self.priority.lock()
    }

    fn set_priority(&self, priority: FilePriority) {
        *self.priority.lock() = priority;
    }
}

/// Mock engine transfer.
#[derive(Debug)]
pub struct MockTransfer {
    info_hash: InfoHash,
    fallback_name: String,
    content: Option<Arc<Mutex<MockContent>>>,
    metadata: watch::Sender<bool>,
    state: Arc<Mutex<MockTransferState>>,
    file_handles: Vec<Arc<MockFileHandle>>,
}

impl MockTransfer {
    /// Copy of the recorded side effects.
    pub fn state(&self) -> MockTransferState {
        self.state.lock().clone()
    }

    /// Current priority of the file at `index`.
    pub fn file_priority(&self, index: usize) -> Option<FilePriority> {
        self.file_handles.get(index).map(|handle| handle.priority())
    }

    fn release_metadata(&self) {
        self.metadata.send_replace(true);
    }

    fn data(&self) -> Bytes {
        self.content
            .as_ref()
            .map(|content| content.lock().data.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EngineTransfer for MockTransfer {
    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    fn name(&self) -> String {
        match &self.content {
            Some(content) if self.has_metadata() => content.lock().name.clone(),
            _ => self.fallback_name.clone(),
        }
    }

    fn has_metadata(&self) -> bool {
        *self.metadata.borrow()
    }

    async fn metadata_ready(&self) {
        let mut receiver = self.metadata.subscribe();
        let _ = receiver.wait_for(|ready| *ready).await;
    }

    fn total_length(&self) -> u64 {
        if !self.has_metadata() {
            return 0;
        }
        self.data().len() as u64
    }

    fn completed_length(&self) -> u64 {
        let state = self.state.lock();
        if state.download_all_calls > 0 && !state.dropped {
            drop(state);
            self.total_length()
        } else {
            0
        }
    }

    fn files(&self) -> Vec<EngineFile> {
        let Some(content) = &self.content else {
            return Vec::new();
        };
        if !self.has_metadata() {
            return Vec::new();
        }

        let content = content.lock();
        let mut offset = 0;
        content
            .files
            .iter()
            .zip(&self.file_handles)
            .map(|(spec, handle)| {
                let file = EngineFile {
                    path: spec.path.clone(),
                    length: spec.length,
                    offset,
                    handle: Arc::clone(handle) as Arc<dyn EngineFileHandle>,
                };
                offset += spec.length;
                file
            })
            .collect()
    }

    fn download_all(&self) {
        let mut state = self.state.lock();
        if !state.dropped {
            state.download_all_calls += 1;
        }
    }

    fn drop_transfer(&self) {
        self.state.lock().dropped = true;
    }

    fn is_dropped(&self) -> bool {
        self.state.lock().dropped
    }

    fn new_reader(&self) -> Box<dyn EngineReader> {
        self.state.lock().readers_opened += 1;
        Box::new(MockReader {
            data: self.data(),
            position: 0,
            pending_seek: None,
            state: Arc::clone(&self.state),
            closed: false,
        })
    }
}

/// Reader over mock transfer bytes.
pub struct MockReader {
    data: Bytes,
    position: u64,
    pending_seek: Option<u64>,
    state: Arc<Mutex<MockTransferState>>,
    closed: bool,
}

impl AsyncRead for MockReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.state.lock().dropped {
            return Poll::Ready(Err(io::Error::other("transfer dropped")));
        }

        let start = self.position.min(self.data.len() as u64) as usize;
        let count = buf.remaining().min(self.data.len() - start);
        buf.put_slice(&self.data[start..start + count]);
        self.position += count as u64;
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for MockReader {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let base = match position {
            SeekFrom::Start(offset) => {
                self.pending_seek = Some(offset);
                return Ok(());
            }
            SeekFrom::Current(delta) => (self.position, delta),
            SeekFrom::End(delta) => (self.data.len() as u64, delta),
        };
        let target = base.0.checked_add_signed(base.1).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start")
        })?;
        self.pending_seek = Some(target);
        Ok(())
    }

    fn poll_complete(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        if let Some(target) = self.pending_seek.take() {
            self.position = target;
            self.state.lock().seeks.push(target);
        }
        Poll::Ready(Ok(self.position))
    }
}

impl EngineReader for MockReader {
    fn set_readahead(&mut self, bytes: u64) {
        self.state.lock().last_readahead = Some(bytes);
    }

    fn set_responsive(&mut self) {
        self.state.lock().responsive = true;
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.lock().readers_closed += 1;
        }
    }
}

#[derive(Debug, Default)]
struct MockEngineInner {
    catalog: Mutex<HashMap<InfoHash, Arc<Mutex<MockContent>>>>,
    transfers: Mutex<HashMap<InfoHash, Arc<MockTransfer>>>,
    closed: AtomicUsize,
}

/// In-memory engine double. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    inner: Arc<MockEngineInner>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers content so that adding its info hash eventually yields
    /// metadata. Bytes follow [`mock_byte_at`].
    pub fn register_content(&self, info_hash: InfoHash, name: &str, files: Vec<MockFileSpec>) {
        let total: u64 = files.iter().map(|file| file.length).sum();
        let data: Vec<u8> = (0..total).map(mock_byte_at).collect();
        let content = MockContent {
            name: name.to_string(),
            files,
            data: Bytes::from(data),
            metadata_released: false,
        };
        self.inner
            .catalog
            .lock()
            .insert(info_hash, Arc::new(Mutex::new(content)));
    }

    /// Makes metadata available for registered content, now and for
    /// transfers added later.
    pub fn complete_metadata(&self, info_hash: InfoHash) {
        if let Some(content) = self.inner.catalog.lock().get(&info_hash) {
            content.lock().metadata_released = true;
        }
        if let Some(transfer) = self.inner.transfers.lock().get(&info_hash) {
            transfer.release_metadata();
        }
    }

    /// Engine-side transfer for assertions.
    pub fn transfer(&self, info_hash: InfoHash) -> Option<Arc<MockTransfer>> {
        self.inner.transfers.lock().get(&info_hash).cloned()
    }

    /// Number of times `close` was called.
    pub fn close_count(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferEngine for MockEngine {
    async fn add_descriptor(
        &self,
        descriptor: &Descriptor,
    ) -> Result<Arc<dyn EngineTransfer>, TransferError> {
        let info_hash = descriptor.info_hash;
        let mut transfers = self.inner.transfers.lock();
        if transfers
            .get(&info_hash)
            .is_some_and(|transfer| !transfer.is_dropped())
        {
            return Err(TransferError::EngineRejected {
                reason: format!("duplicate transfer {info_hash}"),
            });
        }

        let content = self.inner.catalog.lock().get(&info_hash).cloned();
        let (metadata_released, file_count) = content.as_ref().map_or((false, 0), |content| {
            let content = content.lock();
            (content.metadata_released, content.files.len())
        });
        let (metadata, _) = watch::channel(metadata_released);

        let transfer = Arc::new(MockTransfer {
            info_hash,
            fallback_name: descriptor
                .display_name
                .clone()
                .unwrap_or_else(|| info_hash.to_string()),
            content,
            metadata,
            state: Arc::new(Mutex::new(MockTransferState::default())),
            file_handles: (0..file_count)
                .map(|_| {
                    Arc::new(MockFileHandle {
                        priority: Mutex::new(FilePriority::None),
                    })
                })
                .collect(),
        });
        transfers.insert(info_hash, Arc::clone(&transfer));
        Ok(transfer)
    }

    fn transfers(&self) -> Vec<Arc<dyn EngineTransfer>> {
        self.inner
            .transfers
            .lock()
            .values()
            .filter(|transfer| !transfer.is_dropped())
            .map(|transfer| Arc::clone(transfer) as Arc<dyn EngineTransfer>)
            .collect()
    }

    async fn close(&self) {
        self.inner.closed.fetch_add(1, Ordering::SeqCst);
        for transfer in self.inner.transfers.lock().drain().map(|(_, transfer)| transfer) {
            transfer.drop_transfer();
        }
    }
}

/// Builder handing out a shared [`MockEngine`].
#[derive(Debug, Default)]
pub struct MockEngineBuilder {
    engine: MockEngine,
    builds: AtomicUsize,
    configs: Mutex<Vec<EngineConfig>>,
}

impl MockEngineBuilder {
    pub fn new(engine: MockEngine) -> Self {
        Self {
            engine,
            builds: AtomicUsize::new(0),
            configs: Mutex::new(Vec::new()),
        }
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn last_config(&self) -> Option<EngineConfig> {
        self.configs.lock().last().cloned()
    }
}

#[async_trait]
impl EngineBuilder for MockEngineBuilder {
    async fn build(&self, config: &EngineConfig) -> Result<Arc<dyn TransferEngine>, TransferError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.configs.lock().push(config.clone());
        Ok(Arc::new(self.engine.clone()))
    }
}
