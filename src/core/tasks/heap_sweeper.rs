// src/core/tasks/heap_sweeper.rs

use crate::core::cache::heap::HeapShared;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

/// The interval at which the heap cache's size sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// A task that periodically trims the heap cache back under its target size
/// by removing the least-recently-accessed entries.
pub struct HeapSweeperTask {
    shared: Arc<HeapShared>,
}

impl HeapSweeperTask {
    pub(crate) fn new(shared: Arc<HeapShared>) -> Self {
        Self { shared }
    }

    /// The main run loop for the sweeper task.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Heap cache sweeper started. Sweep interval: {:?}",
            SWEEP_INTERVAL
        );
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.shared.evict_excess().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Heap cache sweeper shutting down.");
                    return;
                }
            }
        }
    }
}
