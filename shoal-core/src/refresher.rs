//! Background loop keeping the registry snapshot fresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::registry::TransferRegistry;
use crate::transfer::TransferError;

/// Period between reconciliations unless configured otherwise.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to the refresher task.
///
/// The task reconciles the registry with the engine on every tick. It never
/// changes lifecycle state. Dropping the handle aborts the task.
pub struct SnapshotRefresher {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SnapshotRefresher {
    /// Spawns the refresher on the current runtime.
    pub fn spawn(registry: Arc<TransferRegistry>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_refresh_loop(registry, interval, shutdown_rx));
        Self {
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }

    /// Stops the loop after the current tick and waits for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match (&mut self.task).await {
            Err(e) if e.is_panic() => tracing::error!("Snapshot refresher panicked: {}", e),
            _ => {}
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SnapshotRefresher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_refresh_loop(
    registry: Arc<TransferRegistry>,
    interval: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    tracing::debug!("Snapshot refresher started, interval={:?}", interval);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = ticker.tick() => {
                match registry.refresh().await {
                    Ok(count) => tracing::trace!("Refreshed {} transfers", count),
                    Err(TransferError::EngineUnavailable) => {
                        tracing::debug!("Engine not configured yet, skipping refresh");
                    }
                    Err(e) => tracing::warn!("Snapshot refresh failed: {}", e),
                }
            }
        }
    }

    tracing::debug!("Snapshot refresher stopped");
}
