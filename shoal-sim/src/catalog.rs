//! Content known to the simulated swarm.
//!
//! Each entry is one transfer worth of files held in memory. Info hashes are
//! derived from the name and file listing, so the same library always yields
//! the same hashes.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use sha1::{Digest, Sha1};
use shoal_core::{Descriptor, InfoHash};

/// Errors raised while building a catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Content {name} is already in the catalog")]
    Duplicate { name: String },
}

/// File layout entry of catalog content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogFile {
    pub path: String,
    pub length: u64,
    pub offset: u64,
}

/// One content item: a name, its files and their concatenated bytes.
#[derive(Clone)]
pub struct CatalogEntry {
    name: String,
    files: Vec<CatalogFile>,
    data: Bytes,
    info_hash: InfoHash,
}

impl CatalogEntry {
    /// Builds an entry from `(relative path, contents)` pairs in order.
    pub fn new(name: impl Into<String>, files: Vec<(String, Bytes)>) -> Self {
        let name = name.into();
        let mut data = BytesMut::new();
        let mut layout = Vec::with_capacity(files.len());

        for (path, contents) in files {
            layout.push(CatalogFile {
                path,
                length: contents.len() as u64,
                offset: data.len() as u64,
            });
            data.extend_from_slice(&contents);
        }

        let info_hash = content_hash(&name, &layout);
        Self {
            name,
            files: layout,
            data: data.freeze(),
            info_hash,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    pub fn files(&self) -> &[CatalogFile] {
        &self.files
    }

    /// Concatenated bytes of every file.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn total_length(&self) -> u64 {
        self.data.len() as u64
    }

    /// Magnet link that resolves to this entry.
    pub fn magnet(&self) -> String {
        Descriptor {
            info_hash: self.info_hash,
            display_name: Some(self.name.clone()),
            trackers: Vec::new(),
        }
        .to_magnet()
    }

    /// JSON manifest written next to downloaded data once metadata is known.
    pub fn manifest(&self) -> serde_json::Value {
        serde_json::json!({
            "info_hash": self.info_hash,
            "name": self.name,
            "files": self.files,
        })
    }
}

impl fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("name", &self.name)
            .field("info_hash", &self.info_hash)
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

fn content_hash(name: &str, files: &[CatalogFile]) -> InfoHash {
    let mut hasher = Sha1::new();
    hasher.update(name.as_bytes());
    for file in files {
        hasher.update([0u8]);
        hasher.update(file.path.as_bytes());
        hasher.update(file.length.to_be_bytes());
    }
    InfoHash::new(hasher.finalize().into())
}

/// Set of content the simulated swarm can serve.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: HashMap<InfoHash, Arc<CatalogEntry>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry and returns its info hash.
    ///
    /// # Errors
    /// - `CatalogError::Duplicate` - Same name and layout already present
    pub fn insert(&mut self, entry: CatalogEntry) -> Result<InfoHash, CatalogError> {
        let info_hash = entry.info_hash();
        if self.entries.contains_key(&info_hash) {
            return Err(CatalogError::Duplicate { name: entry.name });
        }
        self.entries.insert(info_hash, Arc::new(entry));
        Ok(info_hash)
    }

    pub fn get(&self, info_hash: &InfoHash) -> Option<Arc<CatalogEntry>> {
        self.entries.get(info_hash).cloned()
    }

    /// Entries sorted by name.
    pub fn entries(&self) -> Vec<Arc<CatalogEntry>> {
        let mut entries: Vec<_> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Small generated content for running without a library directory.
    pub fn sample() -> Self {
        let mut catalog = Self::new();
        let entries = [
            CatalogEntry::new(
                "Shoal Sample Clip",
                vec![
                    ("Shoal Sample Clip/clip.mp4".to_string(), generated(3 * 1024 * 1024, 7)),
                    (
                        "Shoal Sample Clip/clip.srt".to_string(),
                        Bytes::from_static(b"1\n00:00:00,000 --> 00:00:02,000\nShoal\n"),
                    ),
                ],
            ),
            CatalogEntry::new(
                "Shoal Sample Audio",
                vec![("Shoal Sample Audio.mp3".to_string(), generated(1024 * 1024, 13))],
            ),
        ];
        for entry in entries {
            // Names differ, so hashes cannot collide.
            let _ = catalog.insert(entry);
        }
        catalog
    }

    /// Builds a catalog from a local library directory.
    ///
    /// Every top-level file becomes single-file content named after the file;
    /// every top-level directory becomes multi-file content whose paths keep
    /// the directory name as first component. Hidden entries are skipped.
    ///
    /// # Errors
    /// - `CatalogError::Read` - Directory or file could not be read
    /// - `CatalogError::Duplicate` - Two entries hash to the same content
    pub async fn from_dir(root: &Path) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        let mut entries = read_dir_sorted(root).await?;
        entries.retain(|path| !is_hidden(path));

        for path in entries {
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };

            let mut files = Vec::new();
            if path.is_dir() {
                collect_files(&path, &name, &mut files).await?;
                if files.is_empty() {
                    continue;
                }
            } else {
                files.push((name.clone(), read_file(&path).await?));
            }

            let count = files.len();
            let info_hash = catalog.insert(CatalogEntry::new(name.clone(), files))?;
            tracing::debug!("Catalogued {} ({} files) as {}", name, count, info_hash);
        }

        tracing::info!(
            "Loaded {} catalog entries from {}",
            catalog.len(),
            root.display()
        );
        Ok(catalog)
    }
}

fn generated(length: usize, seed: u8) -> Bytes {
    (0..length)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect::<Vec<u8>>()
        .into()
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

async fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, CatalogError> {
    let read_error = |source| CatalogError::Read {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_error)?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_error)? {
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

async fn read_file(path: &Path) -> Result<Bytes, CatalogError> {
    tokio::fs::read(path)
        .await
        .map(Bytes::from)
        .map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Recursively collects files under `dir` with `/`-joined paths rooted at
/// `prefix`.
fn collect_files<'a>(
    dir: &'a Path,
    prefix: &'a str,
    files: &'a mut Vec<(String, Bytes)>,
) -> Pin<Box<dyn Future<Output = Result<(), CatalogError>> + Send + 'a>> {
    Box::pin(async move {
        for path in read_dir_sorted(dir).await? {
            if is_hidden(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let relative = format!("{prefix}/{name}");

            if path.is_dir() {
                collect_files(&path, &relative, files).await?;
            } else {
                files.push((relative, read_file(&path).await?));
            }
        }
        Ok(())
    })
}
