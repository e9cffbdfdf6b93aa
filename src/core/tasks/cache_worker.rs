// src/core/tasks/cache_worker.rs

//! A background task that periodically runs maintenance on the active
//! variant backend.

use crate::config::SharedConfig;
use crate::core::cache::factory::CacheFactory;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Delay before the first maintenance pass after startup.
const WORKER_STARTUP_DELAY: Duration = Duration::from_secs(60);

/// Periodically invokes the variant backend's worker hook (by default
/// `evict_invalid` followed by `clean_up`). Tick failures are logged and do
/// not halt the schedule.
pub struct CacheWorkerTask {
    config: SharedConfig,
    factory: Arc<CacheFactory>,
}

impl CacheWorkerTask {
    pub fn new(config: SharedConfig, factory: Arc<CacheFactory>) -> Self {
        Self { config, factory }
    }

    /// The main run loop for the worker task.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let interval_secs = self.config.lock().await.cache.cache_worker_interval;
        info!(
            "Cache worker started. Tick interval: {}s, startup delay: {:?}",
            interval_secs, WORKER_STARTUP_DELAY
        );

        tokio::select! {
            _ = tokio::time::sleep(WORKER_STARTUP_DELAY) => {}
            _ = shutdown_rx.recv() => {
                info!("Cache worker shutting down.");
                return;
            }
        }

        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.work().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Cache worker shutting down.");
                    return;
                }
            }
        }
    }

    /// Runs one maintenance pass against the currently active variant
    /// backend, if any.
    pub async fn work(&self) {
        match self.factory.variant_cache().await {
            Ok(Some(backend)) => {
                debug!("Cache worker running maintenance pass");
                backend.on_worker().await;
            }
            Ok(None) => {
                debug!("Cache worker tick: no variant backend configured");
            }
            Err(e) => {
                warn!("Cache worker could not resolve the variant backend: {}", e);
            }
        }
    }
}
