// src/core/cache/facade.rs

//! The stable public surface of the cache layer. Coordinates the in-memory
//! info index (L1) and the configured persistent backends through the
//! factory, implementing read-through for infos, asynchronous writes, and
//! fan-out evictions.

use crate::config::SharedConfig;
use crate::core::cache::factory::CacheFactory;
use crate::core::cache::heap_info_index::HeapInfoIndex;
use crate::core::cache::observer::CacheObserver;
use crate::core::cache::{Decoder, VariantReader, VariantSink};
use crate::core::errors::CacheError;
use crate::core::types::{Identifier, Info, OperationList, StatResult};
use std::sync::Arc;
use tracing::warn;

/// Coordinates every cache tier behind one interface. Backend handles are
/// obtained from the factory on each call, so live configuration changes
/// take effect on the next operation.
pub struct CacheFacade {
    config: SharedConfig,
    factory: Arc<CacheFactory>,
    heap_info_index: Arc<HeapInfoIndex>,
}

impl CacheFacade {
    pub fn new(config: SharedConfig) -> Self {
        let factory = Arc::new(CacheFactory::new(config.clone()));
        Self {
            config,
            factory,
            heap_info_index: Arc::new(HeapInfoIndex::new()),
        }
    }

    /// Replaces the default heap info index, e.g. with a smaller one.
    pub fn with_heap_info_index(config: SharedConfig, index: HeapInfoIndex) -> Self {
        let factory = Arc::new(CacheFactory::new(config.clone()));
        Self {
            config,
            factory,
            heap_info_index: Arc::new(index),
        }
    }

    pub fn factory(&self) -> &Arc<CacheFactory> {
        &self.factory
    }

    pub fn heap_info_index(&self) -> &Arc<HeapInfoIndex> {
        &self.heap_info_index
    }

    async fn index_enabled(&self) -> bool {
        self.config.lock().await.cache.heap_info_cache_enabled
    }

    /// Fetches an info from the fastest tier that has it: the L1 index
    /// first, then the configured info backend (populating L1 on a hit).
    /// Corrupt backend artifacts are logged and reported as misses.
    pub async fn fetch_info(&self, id: &Identifier) -> Result<Option<Info>, CacheError> {
        let index_enabled = self.index_enabled().await;
        if index_enabled {
            if let Some(info) = self.heap_info_index.get(id) {
                return Ok(Some(info));
            }
        }
        if let Some(backend) = self.factory.info_cache().await? {
            match backend.fetch_info(id).await {
                Ok(Some(info)) => {
                    if index_enabled {
                        self.heap_info_index.put(id.clone(), info.clone());
                    }
                    return Ok(Some(info));
                }
                Ok(None) => {}
                Err(CacheError::Corrupt(msg)) => {
                    warn!("Discarding corrupt cached info for {}: {}", id, msg);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Read-through info fetch: on a miss, reads from the decoder, returns
    /// the result synchronously, and persists it to the index and the info
    /// backend in the background. Callers must not assume persistence is
    /// complete on return.
    pub async fn fetch_or_read_info(
        &self,
        id: &Identifier,
        decoder: &Arc<dyn Decoder>,
    ) -> Result<Info, CacheError> {
        if let Some(info) = self.fetch_info(id).await? {
            return Ok(info);
        }
        let info = decoder.read().await?;

        let id = id.clone();
        let stored = info.clone();
        let index = self.heap_info_index.clone();
        let index_enabled = self.index_enabled().await;
        let factory = self.factory.clone();
        tokio::spawn(async move {
            if index_enabled {
                index.put(id.clone(), stored.clone());
            }
            match factory.info_cache().await {
                Ok(Some(backend)) => {
                    if let Err(e) = backend.put_info(&id, &stored).await {
                        warn!("Could not persist info for {}: {}", id, e);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Could not resolve info backend: {}", e),
            }
        });

        Ok(info)
    }

    /// A stream over the cached variant, or `None` on a miss or when no
    /// variant backend is configured.
    pub async fn variant_reader(
        &self,
        ops: &OperationList,
        stat: &mut StatResult,
    ) -> Result<Option<VariantReader>, CacheError> {
        match self.factory.variant_cache().await? {
            Some(backend) => backend.variant_reader(ops, stat).await,
            None => Ok(None),
        }
    }

    /// A completable sink for the variant, or `None` when no variant
    /// backend is configured.
    pub async fn variant_writer(
        &self,
        ops: &OperationList,
    ) -> Result<Option<Box<dyn VariantSink>>, CacheError> {
        match self.factory.variant_cache().await? {
            Some(backend) => Ok(Some(backend.variant_writer(ops).await?)),
            None => Ok(None),
        }
    }

    /// Registers an observer with the active variant backend.
    pub async fn add_observer(&self, observer: &Arc<dyn CacheObserver>) -> Result<(), CacheError> {
        if let Some(backend) = self.factory.variant_cache().await? {
            backend.add_observer(observer);
        }
        Ok(())
    }

    /// Fans an eviction of everything derived from `id` out to the L1
    /// index and both backends.
    pub async fn evict(&self, id: &Identifier) -> Result<(), CacheError> {
        self.heap_info_index.evict(id);
        if let Some(backend) = self.factory.info_cache().await? {
            backend.evict(id).await?;
        }
        if let Some(backend) = self.factory.variant_cache().await? {
            backend.evict(id).await?;
        }
        Ok(())
    }

    /// Like [`CacheFacade::evict`], but fire-and-forget on a background
    /// task; failures are logged.
    pub fn evict_async(&self, id: &Identifier) {
        let id = id.clone();
        let index = self.heap_info_index.clone();
        let factory = self.factory.clone();
        tokio::spawn(async move {
            index.evict(&id);
            let result: Result<(), CacheError> = async {
                if let Some(backend) = factory.info_cache().await? {
                    backend.evict(&id).await?;
                }
                if let Some(backend) = factory.variant_cache().await? {
                    backend.evict(&id).await?;
                }
                Ok(())
            }
            .await;
            if let Err(e) = result {
                warn!("Background eviction of {} failed: {}", id, e);
            }
        });
    }

    /// Removes all infos from the L1 index and the info backend.
    pub async fn evict_infos(&self) -> Result<(), CacheError> {
        self.heap_info_index.purge();
        if let Some(backend) = self.factory.info_cache().await? {
            backend.evict_infos().await?;
        }
        Ok(())
    }

    /// Removes one variant from the variant backend.
    pub async fn evict_variant(&self, ops: &OperationList) -> Result<(), CacheError> {
        if let Some(backend) = self.factory.variant_cache().await? {
            backend.evict_variant(ops).await?;
        }
        Ok(())
    }

    /// Removes invalid entries from both backends.
    pub async fn evict_invalid(&self) -> Result<(), CacheError> {
        if let Some(backend) = self.factory.info_cache().await? {
            backend.evict_invalid().await?;
        }
        if let Some(backend) = self.factory.variant_cache().await? {
            backend.evict_invalid().await?;
        }
        Ok(())
    }

    /// Runs maintenance cleanup on both backends.
    pub async fn clean_up(&self) -> Result<(), CacheError> {
        if let Some(backend) = self.factory.info_cache().await? {
            backend.clean_up().await?;
        }
        if let Some(backend) = self.factory.variant_cache().await? {
            backend.clean_up().await?;
        }
        Ok(())
    }

    /// Clears every tier, the L1 index included.
    pub async fn purge(&self) -> Result<(), CacheError> {
        self.heap_info_index.purge();
        if let Some(backend) = self.factory.info_cache().await? {
            backend.purge().await?;
        }
        if let Some(backend) = self.factory.variant_cache().await? {
            backend.purge().await?;
        }
        Ok(())
    }

    /// Shuts down the factory's backends. Called at process shutdown.
    pub async fn shutdown(&self) {
        self.factory.shutdown().await;
    }
}
