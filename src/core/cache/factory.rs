// src/core/cache/factory.rs

//! Resolves configuration to live backend instances and replaces them when
//! the configuration names a different implementation.

use crate::config::{FILESYSTEM_CACHE_NAME, HEAP_CACHE_NAME, SharedConfig};
use crate::core::cache::filesystem::FilesystemCache;
use crate::core::cache::heap::HeapCache;
use crate::core::cache::{InfoCache, VariantCache};
use crate::core::errors::CacheError;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// The two roles a backend can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Role {
    Info,
    Variant,
}

/// The heap backend is process-wide: both roles share one instance, which
/// is shut down only when the last role releases it.
#[derive(Default)]
struct SharedHeap {
    instance: Option<Arc<HeapCache>>,
    roles: HashSet<Role>,
}

/// Holds the current info and variant backends, lazily created on first
/// access and swapped (with shutdown of the previous instance) whenever the
/// configuration names a different implementation.
pub struct CacheFactory {
    config: SharedConfig,
    info_slot: Mutex<Option<(String, Arc<dyn InfoCache>)>>,
    variant_slot: Mutex<Option<(String, Arc<dyn VariantCache>)>>,
    heap: Mutex<SharedHeap>,
}

impl CacheFactory {
    pub fn new(config: SharedConfig) -> Self {
        Self {
            config,
            info_slot: Mutex::new(None),
            variant_slot: Mutex::new(None),
            heap: Mutex::new(SharedHeap::default()),
        }
    }

    /// The active info backend, or `None` when disabled or unnamed.
    pub async fn info_cache(&self) -> Result<Option<Arc<dyn InfoCache>>, CacheError> {
        let (enabled, name) = {
            let cfg = self.config.lock().await;
            (cfg.cache.info_cache_enabled, cfg.cache.info_cache.clone())
        };
        let name = name.unwrap_or_default();

        let mut slot = self.info_slot.lock().await;
        if !enabled || name.is_empty() {
            if let Some((old_name, old)) = slot.take() {
                self.retire(Role::Info, &old_name, || old.shutdown()).await;
            }
            return Ok(None);
        }
        if let Some((current, instance)) = slot.as_ref() {
            if *current == name {
                return Ok(Some(instance.clone()));
            }
        }
        if let Some((old_name, old)) = slot.take() {
            info!("Replacing info backend '{}' with '{}'", old_name, name);
            self.retire(Role::Info, &old_name, || old.shutdown()).await;
        }
        let instance: Arc<dyn InfoCache> = match name.as_str() {
            FILESYSTEM_CACHE_NAME => {
                let backend = Arc::new(FilesystemCache::from_config(self.config.clone()).await?);
                InfoCache::initialize(backend.as_ref()).await?;
                backend
            }
            HEAP_CACHE_NAME => self.acquire_heap(Role::Info).await?,
            other => {
                return Err(CacheError::Config(format!(
                    "unrecognized info cache implementation '{other}'"
                )));
            }
        };
        *slot = Some((name, instance.clone()));
        Ok(Some(instance))
    }

    /// The active variant backend, or `None` when disabled or unnamed.
    pub async fn variant_cache(&self) -> Result<Option<Arc<dyn VariantCache>>, CacheError> {
        let (enabled, name) = {
            let cfg = self.config.lock().await;
            (
                cfg.cache.variant_cache_enabled,
                cfg.cache.variant_cache.clone(),
            )
        };
        let name = name.unwrap_or_default();

        let mut slot = self.variant_slot.lock().await;
        if !enabled || name.is_empty() {
            if let Some((old_name, old)) = slot.take() {
                self.retire(Role::Variant, &old_name, || old.shutdown()).await;
            }
            return Ok(None);
        }
        if let Some((current, instance)) = slot.as_ref() {
            if *current == name {
                return Ok(Some(instance.clone()));
            }
        }
        if let Some((old_name, old)) = slot.take() {
            info!("Replacing variant backend '{}' with '{}'", old_name, name);
            self.retire(Role::Variant, &old_name, || old.shutdown()).await;
        }
        let instance: Arc<dyn VariantCache> = match name.as_str() {
            FILESYSTEM_CACHE_NAME => {
                let backend = Arc::new(FilesystemCache::from_config(self.config.clone()).await?);
                VariantCache::initialize(backend.as_ref()).await?;
                backend
            }
            HEAP_CACHE_NAME => self.acquire_heap(Role::Variant).await?,
            other => {
                return Err(CacheError::Config(format!(
                    "unrecognized variant cache implementation '{other}'"
                )));
            }
        };
        *slot = Some((name, instance.clone()));
        Ok(Some(instance))
    }

    /// Returns the shared heap instance for a role, constructing and
    /// initializing it on first use.
    async fn acquire_heap(&self, role: Role) -> Result<Arc<HeapCache>, CacheError> {
        let mut heap = self.heap.lock().await;
        if let Some(instance) = heap.instance.clone() {
            heap.roles.insert(role);
            return Ok(instance);
        }
        let instance = Arc::new(HeapCache::from_config(self.config.clone()).await?);
        InfoCache::initialize(instance.as_ref()).await?;
        heap.instance = Some(instance.clone());
        heap.roles.insert(role);
        Ok(instance)
    }

    /// Shuts down an outgoing backend. The shared heap is only shut down
    /// once no role references it.
    async fn retire<F, Fut>(&self, role: Role, name: &str, shutdown: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        if name == HEAP_CACHE_NAME {
            let mut heap = self.heap.lock().await;
            heap.roles.remove(&role);
            if heap.roles.is_empty() {
                if let Some(instance) = heap.instance.take() {
                    InfoCache::shutdown(instance.as_ref()).await;
                }
            }
            return;
        }
        shutdown().await;
    }

    /// Shuts down both backends. Called at process shutdown.
    pub async fn shutdown(&self) {
        if let Some((name, backend)) = self.info_slot.lock().await.take() {
            self.retire(Role::Info, &name, || backend.shutdown()).await;
        }
        if let Some((name, backend)) = self.variant_slot.lock().await.take() {
            self.retire(Role::Variant, &name, || backend.shutdown())
                .await;
        }
        let mut heap = self.heap.lock().await;
        if !heap.roles.is_empty() {
            warn!("Heap backend roles not fully released at shutdown");
        }
        if let Some(instance) = heap.instance.take() {
            InfoCache::shutdown(instance.as_ref()).await;
        }
        heap.roles.clear();
    }
}
