// src/core/cache/heap.rs

//! In-memory cache backend storing both infos and variants as byte blobs,
//! LRU-evicted by size and invalidated by TTL.

use crate::config::SharedConfig;
use crate::core::cache::key::CacheKey;
use crate::core::cache::observer::{CacheObserver, ObserverRegistry};
use crate::core::cache::{InfoCache, NoopSink, VariantCache, VariantReader, VariantSink};
use crate::core::errors::CacheError;
use crate::core::tasks::heap_sweeper::HeapSweeperTask;
use crate::core::types::{Identifier, Info, OperationList, StatResult};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant, SystemTime};
use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};

/// Distinguishes the two blob kinds so that each uses its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Info,
    Variant,
}

/// One cached blob. `last_accessed` is bumped on every successful read;
/// `last_modified` is set at write time and never changed.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Bytes,
    pub last_modified: SystemTime,
    pub last_accessed: Instant,
    pub kind: EntryKind,
}

impl CacheEntry {
    fn new(data: Bytes, kind: EntryKind) -> Self {
        Self {
            data,
            last_modified: SystemTime::now(),
            last_accessed: Instant::now(),
            kind,
        }
    }

    /// An entry is valid iff its kind's TTL is infinite or its last access
    /// is within the TTL window.
    fn is_valid(&self, info_ttl: Option<Duration>, variant_ttl: Option<Duration>) -> bool {
        let ttl = match self.kind {
            EntryKind::Info => info_ttl,
            EntryKind::Variant => variant_ttl,
        };
        match ttl {
            Some(ttl) => self.last_accessed.elapsed() <= ttl,
            None => true,
        }
    }
}

/// State shared between the cache handle and its background sweeper task.
pub(crate) struct HeapShared {
    entries: DashMap<CacheKey, CacheEntry>,
    used_bytes: AtomicU64,
    target_bytes: u64,
    /// Serializes `evict_excess` with itself; reads and writes proceed
    /// concurrently and tolerate removed-under-foot entries.
    sweep_lock: Mutex<()>,
}

impl HeapShared {
    fn remove_key(&self, key: &CacheKey) -> Option<u64> {
        self.entries.remove(key).map(|(_, entry)| {
            let size = entry.data.len() as u64;
            self.used_bytes.fetch_sub(size, Ordering::Relaxed);
            size
        })
    }

    fn insert_entry(&self, key: CacheKey, entry: CacheEntry) {
        let size = entry.data.len() as u64;
        if let Some(old) = self.entries.insert(key, entry) {
            self.used_bytes
                .fetch_sub(old.data.len() as u64, Ordering::Relaxed);
        }
        self.used_bytes.fetch_add(size, Ordering::Relaxed);
    }

    /// Removes entries in ascending last-accessed order until the total
    /// freed meets or exceeds the excess over the target size. A racing
    /// write may transiently push the total back over the target; the next
    /// sweep re-stabilizes it.
    pub(crate) async fn evict_excess(&self) {
        let _guard = self.sweep_lock.lock().await;
        let used = self.used_bytes.load(Ordering::Relaxed);
        if used <= self.target_bytes {
            return;
        }
        let excess = used - self.target_bytes;

        let mut snapshot: Vec<(CacheKey, Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().last_accessed))
            .collect();
        snapshot.sort_by_key(|(_, accessed)| *accessed);

        let mut freed = 0u64;
        for (key, _) in snapshot {
            if freed >= excess {
                break;
            }
            if let Some(size) = self.remove_key(&key) {
                freed += size;
            }
        }
        debug!("Heap cache sweep freed {} of {} excess bytes", freed, excess);
    }
}

/// Process-wide in-memory cache implementing both backend roles.
pub struct HeapCache {
    shared: Arc<HeapShared>,
    config: SharedConfig,
    observers: Arc<ObserverRegistry>,
    shutdown_tx: parking_lot::Mutex<Option<broadcast::Sender<()>>>,
}

impl HeapCache {
    /// Builds the cache from the live configuration. The target size is
    /// resolved here, at first demand; a non-positive value is a
    /// configuration error.
    pub async fn from_config(config: SharedConfig) -> Result<Self, CacheError> {
        let target_bytes = {
            let cfg = config.lock().await;
            cfg.cache
                .heapcache_target_size
                .resolve()
                .map_err(|e| CacheError::Config(e.to_string()))?
        };
        if target_bytes == 0 {
            return Err(CacheError::Config(
                "heapcache_target_size must be a positive size".to_string(),
            ));
        }
        Ok(Self {
            shared: Arc::new(HeapShared {
                entries: DashMap::new(),
                used_bytes: AtomicU64::new(0),
                target_bytes,
                sweep_lock: Mutex::new(()),
            }),
            config,
            observers: Arc::new(ObserverRegistry::new()),
            shutdown_tx: parking_lot::Mutex::new(None),
        })
    }

    pub fn len(&self) -> usize {
        self.shared.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn used_bytes(&self) -> u64 {
        self.shared.used_bytes.load(Ordering::Relaxed)
    }

    pub fn target_bytes(&self) -> u64 {
        self.shared.target_bytes
    }

    /// Runs one size sweep immediately. Normally driven by the background
    /// sweeper every 10 seconds.
    pub async fn evict_excess(&self) {
        self.shared.evict_excess().await;
    }

    async fn ttls(&self) -> (Option<Duration>, Option<Duration>) {
        let cfg = self.config.lock().await;
        (cfg.cache.info_ttl(), cfg.cache.variant_ttl())
    }

    fn initialize_inner(&self) {
        let mut guard = self.shutdown_tx.lock();
        if guard.is_some() {
            return;
        }
        let (tx, rx) = broadcast::channel(1);
        *guard = Some(tx);
        tokio::spawn(HeapSweeperTask::new(self.shared.clone()).run(rx));
    }

    fn shutdown_inner(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
            info!("Heap cache shut down");
        }
    }

    async fn fetch_info_inner(&self, id: &Identifier) -> Result<Option<Info>, CacheError> {
        let key = CacheKey::Info(id.clone());
        let (info_ttl, variant_ttl) = self.ttls().await;

        let mut stale = false;
        let mut payload = None;
        if let Some(mut entry) = self.shared.entries.get_mut(&key) {
            if entry.is_valid(info_ttl, variant_ttl) {
                entry.last_accessed = Instant::now();
                payload = Some((entry.data.clone(), entry.last_modified));
            } else {
                stale = true;
            }
        }
        if stale {
            self.shared.remove_key(&key);
            return Ok(None);
        }
        let Some((data, last_modified)) = payload else {
            return Ok(None);
        };

        let text = std::str::from_utf8(&data)
            .map_err(|e| CacheError::Corrupt(format!("info entry is not UTF-8: {e}")))?;
        let mut info = Info::from_json(text)?;
        if info.serialization_timestamp.is_none() {
            info.serialization_timestamp = Some(last_modified.into());
        }
        Ok(Some(info))
    }

    async fn put_info_inner(&self, id: &Identifier, info: &Info) -> Result<(), CacheError> {
        let json = info.to_json()?;
        self.shared.insert_entry(
            CacheKey::Info(id.clone()),
            CacheEntry::new(Bytes::from(json), EntryKind::Info),
        );
        Ok(())
    }

    async fn variant_reader_inner(
        &self,
        ops: &OperationList,
        stat: &mut StatResult,
    ) -> Result<Option<VariantReader>, CacheError> {
        let key = CacheKey::Variant(ops.clone());
        let (info_ttl, variant_ttl) = self.ttls().await;

        let mut stale = false;
        let mut payload = None;
        if let Some(mut entry) = self.shared.entries.get_mut(&key) {
            if entry.is_valid(info_ttl, variant_ttl) {
                entry.last_accessed = Instant::now();
                payload = Some((entry.data.clone(), entry.last_modified));
            } else {
                stale = true;
            }
        }
        if stale {
            self.shared.remove_key(&key);
            return Ok(None);
        }
        let Some((data, last_modified)) = payload else {
            return Ok(None);
        };

        stat.last_modified = Some(last_modified);
        Ok(Some(Box::new(io::Cursor::new(data))))
    }

    async fn variant_writer_inner(
        &self,
        ops: &OperationList,
    ) -> Result<Box<dyn VariantSink>, CacheError> {
        let key = CacheKey::Variant(ops.clone());
        if let Some(mut entry) = self.shared.entries.get_mut(&key) {
            entry.last_accessed = Instant::now();
            debug!("Variant {} already cached; returning no-op sink", ops);
            return Ok(Box::new(NoopSink::new()));
        }
        Ok(Box::new(HeapVariantSink {
            ops: ops.clone(),
            key,
            buf: Vec::new(),
            complete: false,
            shared: self.shared.clone(),
            observers: self.observers.clone(),
        }))
    }

    fn evict_identifier(&self, id: &Identifier) {
        let doomed: Vec<CacheKey> = self
            .shared
            .entries
            .iter()
            .filter(|e| e.key().identifier() == id)
            .map(|e| e.key().clone())
            .collect();
        for key in doomed {
            self.shared.remove_key(&key);
        }
    }

    fn evict_variant_inner(&self, ops: &OperationList) {
        self.shared.remove_key(&CacheKey::Variant(ops.clone()));
    }

    fn evict_infos_inner(&self) {
        let doomed: Vec<CacheKey> = self
            .shared
            .entries
            .iter()
            .filter(|e| e.key().is_info())
            .map(|e| e.key().clone())
            .collect();
        for key in doomed {
            self.shared.remove_key(&key);
        }
    }

    async fn evict_invalid_inner(&self) {
        let (info_ttl, variant_ttl) = self.ttls().await;
        let doomed: Vec<CacheKey> = self
            .shared
            .entries
            .iter()
            .filter(|e| !e.value().is_valid(info_ttl, variant_ttl))
            .map(|e| e.key().clone())
            .collect();
        let count = doomed.len();
        for key in doomed {
            self.shared.remove_key(&key);
        }
        if count > 0 {
            debug!("Heap cache removed {} invalid entries", count);
        }
    }

    fn purge_inner(&self) {
        self.shared.entries.clear();
        self.shared.used_bytes.store(0, Ordering::Relaxed);
    }
}

#[async_trait]
impl InfoCache for HeapCache {
    async fn initialize(&self) -> Result<(), CacheError> {
        self.initialize_inner();
        Ok(())
    }

    async fn shutdown(&self) {
        self.shutdown_inner();
    }

    async fn fetch_info(&self, id: &Identifier) -> Result<Option<Info>, CacheError> {
        self.fetch_info_inner(id).await
    }

    async fn put_info(&self, id: &Identifier, info: &Info) -> Result<(), CacheError> {
        self.put_info_inner(id, info).await
    }

    async fn evict(&self, id: &Identifier) -> Result<(), CacheError> {
        self.evict_identifier(id);
        Ok(())
    }

    async fn evict_infos(&self) -> Result<(), CacheError> {
        self.evict_infos_inner();
        Ok(())
    }

    async fn evict_invalid(&self) -> Result<(), CacheError> {
        self.evict_invalid_inner().await;
        Ok(())
    }

    async fn purge(&self) -> Result<(), CacheError> {
        self.purge_inner();
        Ok(())
    }

    async fn clean_up(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[async_trait]
impl VariantCache for HeapCache {
    async fn initialize(&self) -> Result<(), CacheError> {
        self.initialize_inner();
        Ok(())
    }

    async fn shutdown(&self) {
        self.shutdown_inner();
    }

    async fn variant_reader(
        &self,
        ops: &OperationList,
        stat: &mut StatResult,
    ) -> Result<Option<VariantReader>, CacheError> {
        self.variant_reader_inner(ops, stat).await
    }

    async fn variant_writer(
        &self,
        ops: &OperationList,
    ) -> Result<Box<dyn VariantSink>, CacheError> {
        self.variant_writer_inner(ops).await
    }

    async fn evict(&self, id: &Identifier) -> Result<(), CacheError> {
        self.evict_identifier(id);
        Ok(())
    }

    async fn evict_variant(&self, ops: &OperationList) -> Result<(), CacheError> {
        self.evict_variant_inner(ops);
        Ok(())
    }

    async fn evict_invalid(&self) -> Result<(), CacheError> {
        self.evict_invalid_inner().await;
        Ok(())
    }

    async fn purge(&self) -> Result<(), CacheError> {
        self.purge_inner();
        Ok(())
    }

    async fn clean_up(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn add_observer(&self, observer: &Arc<dyn CacheObserver>) {
        self.observers.add(observer);
    }
}

/// Buffering sink for one heap variant. Closing with the complete flag set
/// atomically installs the buffered bytes as a new entry and notifies
/// observers; closing without it discards the buffer.
struct HeapVariantSink {
    ops: OperationList,
    key: CacheKey,
    buf: Vec<u8>,
    complete: bool,
    shared: Arc<HeapShared>,
    observers: Arc<ObserverRegistry>,
}

impl AsyncWrite for HeapVariantSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl VariantSink for HeapVariantSink {
    fn mark_complete(&mut self) {
        self.complete = true;
    }

    async fn finish(self: Box<Self>) -> Result<(), CacheError> {
        let HeapVariantSink {
            ops,
            key,
            buf,
            complete,
            shared,
            observers,
        } = *self;
        if !complete {
            debug!("Discarding incomplete heap variant write for {}", ops);
            return Ok(());
        }
        shared.insert_entry(key, CacheEntry::new(Bytes::from(buf), EntryKind::Variant));
        observers.notify_variant_written(&ops);
        Ok(())
    }
}
