//! Simulated engine client and its builder.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use shoal_core::{
    Descriptor, EngineBuilder, EngineConfig, EngineTransfer, InfoHash, TransferEngine,
    TransferError,
};

use crate::catalog::Catalog;
use crate::config::SimulationConfig;
use crate::transfer::SimTransfer;

/// Builds [`SimulatedEngine`] clients over a fixed catalog.
#[derive(Debug, Clone)]
pub struct SimulatedEngineBuilder {
    catalog: Arc<Catalog>,
    simulation: SimulationConfig,
}

impl SimulatedEngineBuilder {
    pub fn new(catalog: Catalog, simulation: SimulationConfig) -> Self {
        Self {
            catalog: Arc::new(catalog),
            simulation,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Builds a concrete engine client.
    ///
    /// # Errors
    /// - `TransferError::EngineRejected` - Download directory does not exist
    pub fn build_engine(&self, config: &EngineConfig) -> Result<SimulatedEngine, TransferError> {
        if !config.download_directory.is_dir() {
            return Err(TransferError::EngineRejected {
                reason: format!(
                    "download directory {} does not exist",
                    config.download_directory.display()
                ),
            });
        }

        tracing::info!(
            "Simulated engine listening on port {} with {} catalog entries",
            config.incoming_port,
            self.catalog.len()
        );
        Ok(SimulatedEngine {
            catalog: Arc::clone(&self.catalog),
            simulation: self.simulation.clone(),
            config: config.clone(),
            transfers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl EngineBuilder for SimulatedEngineBuilder {
    async fn build(&self, config: &EngineConfig) -> Result<Arc<dyn TransferEngine>, TransferError> {
        Ok(Arc::new(self.build_engine(config)?))
    }
}

/// Engine client serving catalog content at simulated speed.
#[derive(Debug)]
pub struct SimulatedEngine {
    catalog: Arc<Catalog>,
    simulation: SimulationConfig,
    config: EngineConfig,
    transfers: Mutex<HashMap<InfoHash, Arc<SimTransfer>>>,
    closed: AtomicBool,
}

impl SimulatedEngine {
    /// Concrete handle for inspection in tests and diagnostics.
    pub fn transfer(&self, info_hash: &InfoHash) -> Option<Arc<SimTransfer>> {
        self.transfers.lock().get(info_hash).cloned()
    }
}

#[async_trait]
impl TransferEngine for SimulatedEngine {
    async fn add_descriptor(
        &self,
        descriptor: &Descriptor,
    ) -> Result<Arc<dyn EngineTransfer>, TransferError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransferError::EngineRejected {
                reason: "engine is closed".to_string(),
            });
        }

        let info_hash = descriptor.info_hash;
        let mut transfers = self.transfers.lock();
        if transfers
            .get(&info_hash)
            .is_some_and(|transfer| !transfer.is_dropped())
        {
            return Err(TransferError::EngineRejected {
                reason: format!("transfer {info_hash} already added"),
            });
        }

        let fallback_name = descriptor
            .display_name
            .clone()
            .unwrap_or_else(|| info_hash.to_string());
        let transfer = SimTransfer::spawn(
            info_hash,
            fallback_name,
            self.catalog.get(&info_hash),
            self.simulation.clone(),
            self.config.descriptor_path(&info_hash),
        );
        transfers.insert(info_hash, Arc::clone(&transfer));

        tracing::debug!("Simulated engine added {}", descriptor);
        Ok(transfer)
    }

    fn transfers(&self) -> Vec<Arc<dyn EngineTransfer>> {
        self.transfers
            .lock()
            .values()
            .filter(|transfer| !transfer.is_dropped())
            .map(|transfer| Arc::clone(transfer) as Arc<dyn EngineTransfer>)
            .collect()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let transfers: Vec<_> = self.transfers.lock().drain().map(|(_, t)| t).collect();
        for transfer in &transfers {
            transfer.drop_transfer();
        }
        tracing::info!("Simulated engine closed, dropped {} transfers", transfers.len());
    }
}
