// src/core/cache/heap_info_index.rs

//! Bounded in-memory index from identifier to info, acting as an optional
//! L1 in front of the slower persistent info backend.

use crate::config;
use crate::core::types::{Identifier, Info};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use tracing::{debug, warn};

/// Share of available memory the index may occupy, in percent.
const MEMORY_SHARE_PERCENT: u64 = 5;
/// Expected average serialized size of one info, in bytes.
const EXPECTED_AVG_INFO_SIZE: u64 = 4096;
/// Lower bound on the computed capacity.
const MIN_CAPACITY: usize = 1024;

/// Access-ordered LRU mapping of [`Identifier`] to [`Info`].
///
/// Capacity is derived once at construction from available memory; the index
/// is never persisted and is recreated from scratch each run. All operations
/// are thread-safe; the internal mutex is held only for the map operation
/// itself.
pub struct HeapInfoIndex {
    entries: Mutex<LruCache<Identifier, Info>>,
}

impl HeapInfoIndex {
    /// Creates an index sized to `available memory x 5% / 4096`.
    pub fn new() -> Self {
        let capacity = match config::available_memory() {
            Ok(mem) => {
                ((mem * MEMORY_SHARE_PERCENT / 100 / EXPECTED_AVG_INFO_SIZE) as usize)
                    .max(MIN_CAPACITY)
            }
            Err(e) => {
                warn!(
                    "Could not detect available memory ({}); falling back to {} entries",
                    e, MIN_CAPACITY
                );
                MIN_CAPACITY
            }
        };
        debug!("Heap info index capacity: {} entries", capacity);
        Self::with_capacity(capacity)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns a clone of the cached info, promoting the entry to
    /// most-recently-used.
    pub fn get(&self, id: &Identifier) -> Option<Info> {
        self.entries.lock().get(id).cloned()
    }

    /// Stores `info` under `id`, discarding the least-recently-used entry on
    /// overflow.
    pub fn put(&self, id: Identifier, info: Info) {
        self.entries.lock().put(id, info);
    }

    pub fn evict(&self, id: &Identifier) {
        self.entries.lock().pop(id);
    }

    pub fn purge(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HeapInfoIndex {
    fn default() -> Self {
        Self::new()
    }
}
