//! Shoal Core - transfer registry and streaming adapter
//!
//! This crate keeps a lock-guarded, continuously refreshed view of every
//! transfer known to the external transfer engine, drives lifecycle
//! transitions against that engine, and turns engine file handles into
//! seekable byte streams for HTTP range serving.

pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod refresher;
pub mod registry;
pub mod streaming;
pub mod tracing_setup;
pub mod transfer;

pub use config::{ConfigError, EngineConfig, ShoalConfig};
pub use engine::{
    EngineBuilder, EngineFile, EngineFileHandle, EngineReader, EngineTransfer, FilePriority,
    TransferEngine,
};
pub use lifecycle::LifecycleController;
pub use refresher::{DEFAULT_REFRESH_INTERVAL, SnapshotRefresher};
pub use registry::{SnapshotMap, TransferRegistry};
pub use streaming::StreamReader;
pub use transfer::{
    Descriptor, FileSnapshot, InfoHash, Transfer, TransferError, TransferFile, TransferSnapshot,
};
