//! Registry entries and their serializable snapshots.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::InfoHash;
use crate::engine::{EngineFileHandle, EngineTransfer};

/// One file inside a transfer.
///
/// `offset` is the byte address of the file's first byte in the transfer's
/// concatenated piece space.
#[derive(Clone)]
pub struct TransferFile {
    pub path: String,
    pub length: u64,
    pub offset: u64,
    pub started: bool,
    pub(crate) handle: Arc<dyn EngineFileHandle>,
}

impl TransferFile {
    /// Engine handle used to adjust download priority.
    pub fn handle(&self) -> &Arc<dyn EngineFileHandle> {
        &self.handle
    }

    /// Serializable view of this file.
    pub fn snapshot(&self) -> FileSnapshot {
        FileSnapshot {
            path: self.path.clone(),
            length: self.length,
            offset: self.offset,
            started: self.started,
        }
    }
}

impl fmt::Debug for TransferFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferFile")
            .field("path", &self.path)
            .field("length", &self.length)
            .field("offset", &self.offset)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

/// Registry entry for one content item.
///
/// Owns the engine handle it was built from; descriptive fields are
/// overwritten from that handle on every reconciliation.
#[derive(Clone)]
pub struct Transfer {
    pub info_hash: InfoHash,
    pub name: String,
    pub total_length: u64,
    pub completed_length: u64,
    pub started: bool,
    pub files: Vec<TransferFile>,
    pub(crate) engine_handle: Arc<dyn EngineTransfer>,
}

impl Transfer {
    /// Creates an entry for a freshly resolved engine handle.
    pub(crate) fn new(engine_handle: Arc<dyn EngineTransfer>) -> Self {
        let mut transfer = Self {
            info_hash: engine_handle.info_hash(),
            name: String::new(),
            total_length: 0,
            completed_length: 0,
            started: false,
            files: Vec::new(),
            engine_handle: Arc::clone(&engine_handle),
        };
        transfer.update(&engine_handle);
        transfer
    }

    /// Refreshes descriptive fields and the file list from an engine handle.
    ///
    /// The file layout never changes once metadata is known, so an existing
    /// list is kept as-is while the handle stays the same. A different handle
    /// for the same content (a re-add after stop) invalidates every file
    /// handle: the list is rebuilt from the new handle, or emptied until its
    /// metadata arrives. An in-place rebuild carries per-file `started` flags
    /// over by path.
    pub(crate) fn update(&mut self, engine_handle: &Arc<dyn EngineTransfer>) {
        let replaced = !Arc::ptr_eq(&self.engine_handle, engine_handle);
        if replaced {
            self.engine_handle = Arc::clone(engine_handle);
        }

        self.name = engine_handle.name();
        self.total_length = engine_handle.total_length();
        self.completed_length = engine_handle.completed_length();

        if !engine_handle.has_metadata() {
            if replaced {
                self.files.clear();
            }
            return;
        }
        if !self.files.is_empty() && !replaced {
            return;
        }

        let files = engine_handle
            .files()
            .into_iter()
            .map(|file| {
                let started = self
                    .file_by_path(&file.path)
                    .map_or(self.started, |existing| existing.started);
                TransferFile {
                    path: file.path,
                    length: file.length,
                    offset: file.offset,
                    started,
                    handle: file.handle,
                }
            })
            .collect();
        self.files = files;
    }

    /// Returns true once the engine knows the file layout.
    pub fn has_metadata(&self) -> bool {
        self.engine_handle.has_metadata()
    }

    /// Engine handle backing this entry.
    pub fn engine_handle(&self) -> &Arc<dyn EngineTransfer> {
        &self.engine_handle
    }

    /// Linear lookup by relative path; file counts are small.
    pub fn file_by_path(&self, path: &str) -> Option<&TransferFile> {
        self.files.iter().find(|file| file.path == path)
    }

    /// Sets the transfer flag and every file flag in one step.
    pub(crate) fn set_started(&mut self, started: bool) {
        self.started = started;
        for file in &mut self.files {
            file.started = started;
        }
    }

    /// Serializable view of this entry.
    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            info_hash: self.info_hash,
            name: self.name.clone(),
            total_length: self.total_length,
            completed_length: self.completed_length,
            started: self.started,
            ready: !self.files.is_empty(),
            files: self.files.iter().map(TransferFile::snapshot).collect(),
        }
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("info_hash", &self.info_hash)
            .field("name", &self.name)
            .field("total_length", &self.total_length)
            .field("completed_length", &self.completed_length)
            .field("started", &self.started)
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

/// Point-in-time copy of a transfer, safe to hand out without the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSnapshot {
    pub info_hash: InfoHash,
    pub name: String,
    pub total_length: u64,
    pub completed_length: u64,
    pub started: bool,
    /// Whether the file layout is known.
    pub ready: bool,
    pub files: Vec<FileSnapshot>,
}

impl TransferSnapshot {
    /// Download progress in the range 0.0 to 1.0.
    pub fn progress(&self) -> f64 {
        if self.total_length == 0 {
            return 0.0;
        }
        self.completed_length as f64 / self.total_length as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: String,
    pub length: u64,
    pub offset: u64,
    pub started: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FilePriority;
    use crate::engine::test_mocks::{MockEngine, MockFileSpec};
    use crate::engine::TransferEngine;
    use crate::transfer::Descriptor;

    fn files() -> Vec<MockFileSpec> {
        vec![
            MockFileSpec::new("show/a.srt", 100),
            MockFileSpec::new("show/video.mkv", 900),
        ]
    }

    #[tokio::test]
    async fn test_update_populates_files_once_metadata_arrives() {
        let engine = MockEngine::new();
        let info_hash = InfoHash::new([3u8; 20]);
        engine.register_content(info_hash, "show", files());

        let handle = engine
            .add_descriptor(&Descriptor::from_info_hash(info_hash))
            .await
            .unwrap();
        let mut transfer = Transfer::new(Arc::clone(&handle));
        assert!(transfer.files.is_empty());
        assert_eq!(transfer.total_length, 0);

        engine.complete_metadata(info_hash);
        transfer.update(&handle);

        assert_eq!(transfer.files.len(), 2);
        assert_eq!(transfer.files[1].offset, 100);
        let sum: u64 = transfer.files.iter().map(|file| file.length).sum();
        assert_eq!(sum, transfer.total_length);
    }

    #[tokio::test]
    async fn test_update_keeps_file_flags() {
        let engine = MockEngine::new();
        let info_hash = InfoHash::new([4u8; 20]);
        engine.register_content(info_hash, "show", files());
        engine.complete_metadata(info_hash);

        let handle = engine
            .add_descriptor(&Descriptor::from_info_hash(info_hash))
            .await
            .unwrap();
        let mut transfer = Transfer::new(Arc::clone(&handle));
        transfer.files[1].started = true;
        transfer.files[1].handle.set_priority(FilePriority::High);

        transfer.update(&handle);

        assert!(!transfer.files[0].started);
        assert!(transfer.files[1].started);
    }

    #[tokio::test]
    async fn test_files_inherit_transfer_flag() {
        let engine = MockEngine::new();
        let info_hash = InfoHash::new([5u8; 20]);
        engine.register_content(info_hash, "show", files());

        let handle = engine
            .add_descriptor(&Descriptor::from_info_hash(info_hash))
            .await
            .unwrap();
        let mut transfer = Transfer::new(Arc::clone(&handle));
        transfer.set_started(true);

        engine.complete_metadata(info_hash);
        transfer.update(&handle);

        assert!(transfer.files.iter().all(|file| file.started));
        assert!(transfer.snapshot().ready);
    }

    #[tokio::test]
    async fn test_readded_handle_replaces_file_handles() {
        let info_hash = InfoHash::new([6u8; 20]);
        let descriptor = Descriptor::from_info_hash(info_hash);

        let first_engine = MockEngine::new();
        first_engine.register_content(info_hash, "show", files());
        first_engine.complete_metadata(info_hash);
        let first = first_engine.add_descriptor(&descriptor).await.unwrap();
        let mut transfer = Transfer::new(Arc::clone(&first));
        assert_eq!(transfer.files.len(), 2);

        let second_engine = MockEngine::new();
        second_engine.register_content(info_hash, "show", files());
        let second = second_engine.add_descriptor(&descriptor).await.unwrap();

        transfer.update(&second);
        assert!(transfer.files.is_empty());
        assert!(!transfer.snapshot().ready);

        second_engine.complete_metadata(info_hash);
        transfer.update(&second);
        assert_eq!(transfer.files.len(), 2);

        transfer.files[1].handle.set_priority(FilePriority::High);
        let live = second_engine.transfer(info_hash).unwrap();
        assert_eq!(live.file_priority(1), Some(FilePriority::High));
        let stale = first_engine.transfer(info_hash).unwrap();
        assert_eq!(stale.file_priority(1), Some(FilePriority::None));
    }

    #[tokio::test]
    async fn test_readded_handle_with_metadata_rebuilds_in_place() {
        let info_hash = InfoHash::new([7u8; 20]);
        let descriptor = Descriptor::from_info_hash(info_hash);

        let first_engine = MockEngine::new();
        first_engine.register_content(info_hash, "show", files());
        first_engine.complete_metadata(info_hash);
        let first = first_engine.add_descriptor(&descriptor).await.unwrap();
        let mut transfer = Transfer::new(first);
        transfer.files[0].started = true;

        let second_engine = MockEngine::new();
        second_engine.register_content(info_hash, "show", files());
        second_engine.complete_metadata(info_hash);
        let second = second_engine.add_descriptor(&descriptor).await.unwrap();

        transfer.update(&second);
        assert!(transfer.files[0].started);
        assert!(!transfer.files[1].started);
        transfer.files[0].handle.set_priority(FilePriority::High);
        let live = second_engine.transfer(info_hash).unwrap();
        assert_eq!(live.file_priority(0), Some(FilePriority::High));
    }

    #[test]
    fn test_snapshot_progress() {
        let snapshot = TransferSnapshot {
            info_hash: InfoHash::new([0u8; 20]),
            name: "x".to_string(),
            total_length: 400,
            completed_length: 100,
            started: true,
            ready: true,
            files: Vec::new(),
        };
        assert!((snapshot.progress() - 0.25).abs() < f64::EPSILON);
    }
}
