//! Shoal Sim - simulated transfer engine
//!
//! Implements the `shoal_core::engine` traits over an in-memory catalog so
//! the registry, lifecycle controller and HTTP layer can run without a real
//! swarm. Metadata shows up after a configurable delay, pieces complete at a
//! configurable rate, and readers block until the bytes they need exist.
//! Pieces inside an open reader's readahead window are fetched first.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use shoal_core::TransferRegistry;
//! use shoal_sim::{Catalog, SimulatedEngineBuilder, SimulationConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = Catalog::from_dir(std::path::Path::new("./library")).await?;
//! let builder = SimulatedEngineBuilder::new(catalog, SimulationConfig::default());
//! let registry = Arc::new(TransferRegistry::new(Arc::new(builder)));
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod engine;
pub mod reader;
pub mod transfer;

pub use catalog::{Catalog, CatalogEntry, CatalogError, CatalogFile};
pub use config::SimulationConfig;
pub use engine::{SimulatedEngine, SimulatedEngineBuilder};
pub use reader::SimReader;
pub use transfer::{SimFileHandle, SimTransfer};
