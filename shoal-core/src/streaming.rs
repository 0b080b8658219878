//! Streaming adapter: one transfer file as a seekable, closeable byte stream.
//!
//! The engine reader addresses the transfer's concatenated piece space;
//! [`StreamReader`] narrows it to a single file so the HTTP layer can treat
//! it like any other `AsyncRead + AsyncSeek` source.

use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt, ReadBuf};

use crate::engine::EngineReader;
use crate::registry::TransferRegistry;
use crate::transfer::{InfoHash, TransferError};

/// Share of the file length the engine is asked to read ahead.
const READAHEAD_DIVISOR: u64 = 100;

/// File-scoped reader over an engine reader.
///
/// Positions are relative to the start of the file. Seeking to a position
/// outside `0..length` fails with `InvalidInput` and leaves the position
/// unchanged; position 0 is always accepted. The engine reader is released
/// exactly once, on [`close`](Self::close) or on drop.
pub struct StreamReader {
    inner: Box<dyn EngineReader>,
    info_hash: InfoHash,
    path: String,
    offset: u64,
    length: u64,
    position: u64,
    pending_seek: Option<u64>,
    closed: bool,
}

impl StreamReader {
    /// Wraps an engine reader already positioned at `offset`.
    pub fn new(
        inner: Box<dyn EngineReader>,
        info_hash: InfoHash,
        path: String,
        offset: u64,
        length: u64,
    ) -> Self {
        Self {
            inner,
            info_hash,
            path,
            offset,
            length,
            position: 0,
            pending_seek: None,
            closed: false,
        }
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// Relative path of the file inside the transfer.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// File length in bytes.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Current file-relative position.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Releases the engine reader. Further calls are no-ops; further reads
    /// fail.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.inner.close();
        tracing::debug!("Closed stream {} of {}", self.path, self.info_hash);
    }

    fn resolve_target(&self, position: SeekFrom) -> io::Result<u64> {
        let target = match position {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.position) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.length) + i128::from(delta),
        };

        if target == 0 {
            return Ok(0);
        }
        if target < 0 || target >= i128::from(self.length) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "seek to {target} outside file {} of length {}",
                    self.path, self.length
                ),
            ));
        }
        // Bounded by `length` above.
        Ok(target as u64)
    }
}

impl AsyncRead for StreamReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(io::Error::other("stream reader is closed")));
        }

        let remaining = this.length.saturating_sub(this.position);
        if remaining == 0 || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let max = usize::try_from(remaining)
            .unwrap_or(usize::MAX)
            .min(buf.remaining());
        let read = {
            let mut limited = ReadBuf::new(buf.initialize_unfilled_to(max));
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited))?;
            limited.filled().len()
        };
        buf.advance(read);
        this.position += read as u64;
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for StreamReader {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        if this.closed {
            return Err(io::Error::other("stream reader is closed"));
        }

        let target = this.resolve_target(position)?;
        Pin::new(&mut this.inner).start_seek(SeekFrom::Start(this.offset + target))?;
        this.pending_seek = Some(target);
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        let this = self.get_mut();
        if let Some(target) = this.pending_seek {
            ready!(Pin::new(&mut this.inner).poll_complete(cx))?;
            this.pending_seek = None;
            this.position = target;
        }
        Poll::Ready(Ok(this.position))
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.close();
    }
}

impl TransferRegistry {
    /// Opens a stream over file `index` of a transfer.
    ///
    /// The registry lock is only held to look the file up; reads go straight
    /// to the engine.
    ///
    /// # Errors
    /// - `TransferError::InvalidIdentifier` - `id` is not 40 hex characters
    /// - `TransferError::NotFound` - No such transfer
    /// - `TransferError::InvalidIndex` - No file at `index`
    /// - `TransferError::Io` - Engine reader failed to seek to the file
    pub async fn open_stream(&self, id: &str, index: usize) -> Result<StreamReader, TransferError> {
        let info_hash = InfoHash::from_hex(id)?;

        let (handle, file) = {
            let state = self.lock().await;
            let transfer = state.transfer(&info_hash)?;
            let file = transfer
                .files
                .get(index)
                .cloned()
                .ok_or(TransferError::InvalidIndex { info_hash, index })?;
            (std::sync::Arc::clone(transfer.engine_handle()), file)
        };

        let mut inner = handle.new_reader();
        inner.set_readahead(file.length / READAHEAD_DIVISOR);
        inner.set_responsive();
        if let Err(e) = inner.seek(SeekFrom::Start(file.offset)).await {
            inner.close();
            return Err(e.into());
        }

        tracing::debug!(
            "Opened stream {} of {} at offset {} ({} bytes)",
            file.path,
            info_hash,
            file.offset,
            file.length
        );
        Ok(StreamReader::new(
            inner,
            info_hash,
            file.path,
            file.offset,
            file.length,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::TransferEngine;
    use crate::engine::test_mocks::{MockEngine, MockEngineBuilder, MockFileSpec, mock_byte_at};
    use crate::transfer::Descriptor;

    const FIRST_LEN: u64 = 300;
    const SECOND_LEN: u64 = 1_000;

    async fn registry_with_content() -> (TransferRegistry, MockEngine, InfoHash, tempfile::TempDir)
    {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new();
        let registry = TransferRegistry::new(Arc::new(MockEngineBuilder::new(engine.clone())));
        registry
            .configure(EngineConfig {
                download_directory: dir.path().to_path_buf(),
                settle_delay: Duration::from_millis(1),
                ..EngineConfig::default()
            })
            .await
            .unwrap();

        let info_hash = InfoHash::new([0x42; 20]);
        engine.register_content(
            info_hash,
            "movie",
            vec![
                MockFileSpec::new("movie/sample.txt", FIRST_LEN),
                MockFileSpec::new("movie/feature.mp4", SECOND_LEN),
            ],
        );
        engine.complete_metadata(info_hash);
        engine
            .add_descriptor(&Descriptor::from_info_hash(info_hash))
            .await
            .unwrap();
        registry.list().await.unwrap();
        (registry, engine, info_hash, dir)
    }

    #[tokio::test]
    async fn test_open_tunes_engine_reader() {
        let (registry, engine, info_hash, _dir) = registry_with_content().await;

        let stream = registry.open_stream(&info_hash.to_hex(), 1).await.unwrap();
        assert_eq!(stream.len(), SECOND_LEN);
        assert_eq!(stream.path(), "movie/feature.mp4");

        let state = engine.transfer(info_hash).unwrap().state();
        assert_eq!(state.last_readahead, Some(SECOND_LEN / 100));
        assert!(state.responsive);
        assert_eq!(state.seeks, vec![FIRST_LEN]);
    }

    #[tokio::test]
    async fn test_open_errors() {
        let (registry, _, info_hash, _dir) = registry_with_content().await;

        assert!(matches!(
            registry.open_stream("nothex", 0).await,
            Err(TransferError::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            registry.open_stream(&"00".repeat(20), 0).await,
            Err(TransferError::NotFound { .. })
        ));
        assert!(matches!(
            registry.open_stream(&info_hash.to_hex(), 2).await,
            Err(TransferError::InvalidIndex { index: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_read_stays_inside_file() {
        let (registry, _, info_hash, _dir) = registry_with_content().await;
        let mut stream = registry.open_stream(&info_hash.to_hex(), 0).await.unwrap();

        let mut contents = Vec::new();
        stream.read_to_end(&mut contents).await.unwrap();

        assert_eq!(contents.len() as u64, FIRST_LEN);
        assert!(
            contents
                .iter()
                .enumerate()
                .all(|(i, byte)| *byte == mock_byte_at(i as u64))
        );
    }

    #[tokio::test]
    async fn test_seek_is_file_relative() {
        let (registry, _, info_hash, _dir) = registry_with_content().await;
        let mut stream = registry.open_stream(&info_hash.to_hex(), 1).await.unwrap();

        let position = stream.seek(SeekFrom::Start(10)).await.unwrap();
        assert_eq!(position, 10);
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await.unwrap();
        assert_eq!(byte[0], mock_byte_at(FIRST_LEN + 10));

        let position = stream.seek(SeekFrom::End(-1)).await.unwrap();
        assert_eq!(position, SECOND_LEN - 1);
        let position = stream.seek(SeekFrom::Current(-9)).await.unwrap();
        assert_eq!(position, SECOND_LEN - 10);
    }

    #[tokio::test]
    async fn test_seek_bounds() {
        let (registry, _, info_hash, _dir) = registry_with_content().await;
        let mut stream = registry.open_stream(&info_hash.to_hex(), 1).await.unwrap();

        assert_eq!(
            stream.seek(SeekFrom::Start(SECOND_LEN - 1)).await.unwrap(),
            SECOND_LEN - 1
        );
        for target in [SECOND_LEN, SECOND_LEN + 1] {
            let error = stream.seek(SeekFrom::Start(target)).await.unwrap_err();
            assert_eq!(error.kind(), io::ErrorKind::InvalidInput);
            assert_eq!(stream.position(), SECOND_LEN - 1);
        }

        let error = stream.seek(SeekFrom::Current(-(SECOND_LEN as i64))).await.unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(stream.seek(SeekFrom::Start(0)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_runs_on_drop() {
        let (registry, engine, info_hash, _dir) = registry_with_content().await;
        let id = info_hash.to_hex();

        let mut stream = registry.open_stream(&id, 0).await.unwrap();
        stream.close();
        stream.close();
        assert!(stream.is_closed());
        let mut buf = [0u8; 4];
        assert!(stream.read(&mut buf).await.is_err());
        drop(stream);

        let stream = registry.open_stream(&id, 1).await.unwrap();
        drop(stream);

        let state = engine.transfer(info_hash).unwrap().state();
        assert_eq!(state.readers_opened, 2);
        assert_eq!(state.readers_closed, 2);
    }

    #[tokio::test]
    async fn test_read_after_delete_fails() {
        let (registry, _, info_hash, _dir) = registry_with_content().await;
        let id = info_hash.to_hex();
        let mut stream = registry.open_stream(&id, 1).await.unwrap();

        registry.delete(&id).await.unwrap();

        let mut buf = [0u8; 16];
        assert!(stream.read(&mut buf).await.is_err());
    }

    #[test]
    fn test_empty_file_accepts_position_zero() {
        tokio_test::block_on(async {
            let engine = MockEngine::new();
            let info_hash = InfoHash::new([1; 20]);
            engine.register_content(info_hash, "empty", vec![MockFileSpec::new("empty.txt", 0)]);
            engine.complete_metadata(info_hash);
            let handle = engine
                .add_descriptor(&Descriptor::from_info_hash(info_hash))
                .await
                .unwrap();

            let mut stream =
                StreamReader::new(handle.new_reader(), info_hash, "empty.txt".to_string(), 0, 0);
            assert_eq!(stream.seek(SeekFrom::Start(0)).await.unwrap(), 0);
            assert!(stream.seek(SeekFrom::Start(1)).await.is_err());

            let mut contents = Vec::new();
            assert_eq!(stream.read_to_end(&mut contents).await.unwrap(), 0);
        });
    }
}
