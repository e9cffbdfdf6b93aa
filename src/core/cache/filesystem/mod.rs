// src/core/cache/filesystem/mod.rs

//! On-disk cache backend with hashed directory sharding, atomic renames,
//! per-identifier locking, and TTL-based invalidation.

mod paths;
mod streams;

use crate::config::SharedConfig;
use crate::core::cache::key::CacheKey;
use crate::core::cache::observer::{CacheObserver, ObserverRegistry};
use crate::core::cache::{InfoCache, NoopSink, VariantCache, VariantReader, VariantSink};
use crate::core::errors::CacheError;
use crate::core::types::{Identifier, Info, OperationList, StatResult};
use async_trait::async_trait;
use dashmap::DashMap;
use paths::{IMAGE_DIR, INFO_DIR, is_temp, shard_path, temp_path};
use std::collections::HashSet;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use streams::FileVariantSink;
use tokio::fs;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

/// Temp files younger than this are presumed to belong to an in-flight
/// writer, possibly in another process, and are left alone by `clean_up`.
const MIN_CLEANABLE_AGE: Duration = Duration::from_secs(600);

/// Coordination state for evictions: a global-purge flag plus the sets of
/// identifiers and variant filenames currently being purged.
#[derive(Default)]
struct PurgeState {
    global_in_progress: bool,
    ids: HashSet<Identifier>,
    variants: HashSet<String>,
}

/// One mutex plus one condition (a `Notify`) guarding [`PurgeState`].
/// Waiters re-check their condition in a loop, so spurious wakeups are
/// harmless.
#[derive(Default)]
struct PurgeCoordinator {
    state: parking_lot::Mutex<PurgeState>,
    notify: Notify,
}

impl PurgeCoordinator {
    /// Claims `id` for eviction. Returns `false` when a global purge is in
    /// progress (the caller skips); waits while another task is already
    /// evicting the same identifier.
    async fn begin_identifier(&self, id: &Identifier) -> bool {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            {
                let mut state = self.state.lock();
                if state.global_in_progress {
                    return false;
                }
                if state.ids.insert(id.clone()) {
                    return true;
                }
            }
            notified.as_mut().await;
        }
    }

    fn end_identifier(&self, id: &Identifier) {
        self.state.lock().ids.remove(id);
        self.notify.notify_waiters();
    }

    async fn begin_variant(&self, filename: &str) -> bool {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            {
                let mut state = self.state.lock();
                if state.global_in_progress {
                    return false;
                }
                if state.variants.insert(filename.to_string()) {
                    return true;
                }
            }
            notified.as_mut().await;
        }
    }

    fn end_variant(&self, filename: &str) {
        self.state.lock().variants.remove(filename);
        self.notify.notify_waiters();
    }

    /// Claims the global-purge flag, first waiting for in-flight variant
    /// purges to drain and any other global purge to finish.
    async fn begin_global(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            {
                let mut state = self.state.lock();
                if !state.global_in_progress && state.variants.is_empty() {
                    state.global_in_progress = true;
                    return;
                }
            }
            notified.as_mut().await;
        }
    }

    fn end_global(&self) {
        self.state.lock().global_in_progress = false;
        self.notify.notify_waiters();
    }
}

/// On-disk cache backend implementing both the info and variant roles.
///
/// Infos live under `root/info/<shard>/<md5(id)>.json`, variants under
/// `root/image/<shard>/<oplist filename>`. All writes go through sibling
/// temp files committed by rename; cross-process safety relies on rename
/// atomicity and overwrite tolerance.
pub struct FilesystemCache {
    config: SharedConfig,
    /// Per-identifier read/write locks for info files, lazily populated.
    /// Stale entries are swept during `clean_up`.
    info_locks: DashMap<Identifier, Arc<RwLock<()>>>,
    /// Keys with an open writer somewhere in this process.
    writes_in_flight: Arc<DashMap<CacheKey, ()>>,
    /// Signaled whenever a writer finishes, for tasks waiting on write
    /// completion.
    write_notify: Arc<Notify>,
    purges: PurgeCoordinator,
    observers: Arc<ObserverRegistry>,
}

impl FilesystemCache {
    /// Builds the backend from the live configuration, validating the values
    /// it depends on. Called at first demand by the factory.
    pub async fn from_config(config: SharedConfig) -> Result<Self, CacheError> {
        {
            let cfg = config.lock().await;
            if cfg.cache.filesystem_cache_pathname.trim().is_empty() {
                return Err(CacheError::Config(
                    "filesystem_cache_pathname is not set".to_string(),
                ));
            }
            let depth = cfg.cache.filesystem_cache_directory_depth;
            let segment_len = cfg.cache.filesystem_cache_directory_name_length;
            if depth == 0 || segment_len == 0 || depth * segment_len > 32 {
                return Err(CacheError::Config(format!(
                    "invalid shard layout: depth {depth} x segment length {segment_len}"
                )));
            }
        }
        Ok(Self {
            config,
            info_locks: DashMap::new(),
            writes_in_flight: Arc::new(DashMap::new()),
            write_notify: Arc::new(Notify::new()),
            purges: PurgeCoordinator::default(),
            observers: Arc::new(ObserverRegistry::new()),
        })
    }

    /// Reads the on-disk layout parameters from the live configuration.
    async fn layout(&self) -> Result<(PathBuf, usize, usize), CacheError> {
        let cfg = self.config.lock().await;
        let root = cfg.cache.filesystem_cache_pathname.trim();
        if root.is_empty() {
            return Err(CacheError::Config(
                "filesystem_cache_pathname is not set".to_string(),
            ));
        }
        Ok((
            PathBuf::from(root),
            cfg.cache.filesystem_cache_directory_depth,
            cfg.cache.filesystem_cache_directory_name_length,
        ))
    }

    async fn root(&self) -> Result<PathBuf, CacheError> {
        Ok(self.layout().await?.0)
    }

    /// `root/info/<shard>/<md5(id)>.json`
    async fn info_file(&self, id: &Identifier) -> Result<PathBuf, CacheError> {
        let (root, depth, segment_len) = self.layout().await?;
        let digest = id.md5();
        let mut path = root.join(INFO_DIR).join(shard_path(&digest, depth, segment_len));
        path.push(format!("{digest}.json"));
        Ok(path)
    }

    /// `root/image/<shard>/` for the operation list's identifier.
    async fn variant_shard_dir(&self, id: &Identifier) -> Result<PathBuf, CacheError> {
        let (root, depth, segment_len) = self.layout().await?;
        Ok(root
            .join(IMAGE_DIR)
            .join(shard_path(&id.md5(), depth, segment_len)))
    }

    /// `root/image/<shard>/<oplist filename>`
    async fn variant_file(&self, ops: &OperationList) -> Result<PathBuf, CacheError> {
        let mut path = self.variant_shard_dir(ops.identifier()).await?;
        path.push(ops.filename());
        Ok(path)
    }

    fn info_lock(&self, id: &Identifier) -> Arc<RwLock<()>> {
        self.info_locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    async fn info_ttl(&self) -> Option<Duration> {
        self.config.lock().await.cache.info_ttl()
    }

    async fn variant_ttl(&self) -> Option<Duration> {
        self.config.lock().await.cache.variant_ttl()
    }

    /// TTL applicable to `path`, chosen by which subtree it lies under.
    async fn ttl_for(&self, root: &Path, path: &Path) -> Option<Duration> {
        if path.starts_with(root.join(INFO_DIR)) {
            self.info_ttl().await
        } else {
            self.variant_ttl().await
        }
    }

    /// Best-effort background delete.
    fn delete_async(&self, path: PathBuf) {
        tokio::spawn(async move {
            delete_file_quiet(&path).await;
        });
    }

    // --- reads ---

    async fn fetch_info_inner(&self, id: &Identifier) -> Result<Option<Info>, CacheError> {
        let path = self.info_file(id).await?;
        let lock = self.info_lock(id);
        let guard = lock.read().await;

        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!("Could not stat info file {:?}: {}", path, e);
                return Ok(None);
            }
        };
        if is_expired(&metadata, self.info_ttl().await) {
            drop(guard);
            debug!("Info file {:?} is expired; deleting", path);
            self.delete_async(path);
            return Ok(None);
        }

        let text = match fs::read_to_string(&path).await {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!("Could not read info file {:?}: {}", path, e);
                return Ok(None);
            }
        };
        let mut info = match Info::from_json(&text) {
            Ok(info) => info,
            Err(e) => {
                drop(guard);
                self.delete_async(path);
                return Err(e);
            }
        };
        if info.serialization_timestamp.is_none() {
            if let Ok(mtime) = metadata.modified() {
                info.serialization_timestamp = Some(mtime.into());
            }
        }
        Ok(Some(info))
    }

    async fn variant_reader_inner(
        &self,
        ops: &OperationList,
        stat: &mut StatResult,
    ) -> Result<Option<VariantReader>, CacheError> {
        let path = self.variant_file(ops).await?;
        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied && cfg!(windows) => {
                // A concurrent replace on Windows can deny access briefly.
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if is_expired(&metadata, self.variant_ttl().await) {
            debug!("Variant file {:?} is expired; deleting", path);
            self.delete_async(path);
            return Ok(None);
        }

        let file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied && cfg!(windows) => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        stat.last_modified = metadata.modified().ok();
        Ok(Some(Box::new(file)))
    }

    // --- writes ---

    async fn put_info_inner(&self, id: &Identifier, info: &Info) -> Result<(), CacheError> {
        let final_path = self.info_file(id).await?;
        let json = info.to_json()?;

        // Concurrent puts for the same identifier serialize on the write
        // lock; each writes its own temp file and the renames land in put
        // order. The in-flight arbitration set is for variant streams only.
        let lock = self.info_lock(id);
        let _guard = lock.write().await;

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = temp_path(&final_path);
        if let Err(e) = fs::write(&tmp, json.as_bytes()).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &final_path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn variant_writer_inner(
        &self,
        ops: &OperationList,
    ) -> Result<Box<dyn VariantSink>, CacheError> {
        let key = CacheKey::Variant(ops.clone());
        if self.writes_in_flight.insert(key.clone(), ()).is_some() {
            debug!("Variant {} is already being written; returning no-op sink", ops);
            return Ok(Box::new(NoopSink::new()));
        }
        match self.open_variant_sink(ops, key.clone()).await {
            Ok(sink) => Ok(sink),
            Err(e) => {
                self.writes_in_flight.remove(&key);
                self.write_notify.notify_waiters();
                Err(e)
            }
        }
    }

    async fn open_variant_sink(
        &self,
        ops: &OperationList,
        key: CacheKey,
    ) -> Result<Box<dyn VariantSink>, CacheError> {
        let final_path = self.variant_file(ops).await?;
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = temp_path(&final_path);
        let file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // Another writer beat us to the temp name.
                self.writes_in_flight.remove(&key);
                self.write_notify.notify_waiters();
                return Ok(Box::new(NoopSink::new()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Box::new(FileVariantSink::new(
            file,
            tmp,
            final_path,
            ops.clone(),
            key,
            self.writes_in_flight.clone(),
            self.write_notify.clone(),
            self.observers.clone(),
        )))
    }

    // --- evictions ---

    async fn evict_identifier_inner(&self, id: &Identifier) -> Result<(), CacheError> {
        if !self.purges.begin_identifier(id).await {
            debug!("Global purge in progress; skipping eviction of {}", id);
            return Ok(());
        }
        self.delete_identifier_files(id).await;
        self.purges.end_identifier(id);
        Ok(())
    }

    async fn delete_identifier_files(&self, id: &Identifier) {
        let mut deleted = 0u64;
        let mut freed = 0u64;

        match self.info_file(id).await {
            Ok(path) => {
                let size = delete_file_quiet(&path).await;
                if size > 0 {
                    deleted += 1;
                    freed += size;
                }
            }
            Err(e) => warn!("Could not derive info path for {}: {}", id, e),
        }

        let shard_dir = match self.variant_shard_dir(id).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Could not derive variant shard for {}: {}", id, e);
                return;
            }
        };
        let prefix = id.md5();
        let mut rd = match fs::read_dir(&shard_dir).await {
            Ok(rd) => rd,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Could not list {:?}: {}", shard_dir, e);
                }
                return;
            }
        };
        while let Ok(Some(entry)) = rd.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) {
                let size = delete_file_quiet(&entry.path()).await;
                if size > 0 {
                    deleted += 1;
                    freed += size;
                }
            }
        }
        debug!("Evicted {} file(s) ({} bytes) for {}", deleted, freed, id);
    }

    async fn evict_variant_inner(&self, ops: &OperationList) -> Result<(), CacheError> {
        let filename = ops.filename();
        if !self.purges.begin_variant(&filename).await {
            debug!("Global purge in progress; skipping eviction of {}", ops);
            return Ok(());
        }
        match self.variant_file(ops).await {
            Ok(path) => {
                delete_file_quiet(&path).await;
            }
            Err(e) => warn!("Could not derive variant path for {}: {}", ops, e),
        }
        self.purges.end_variant(&filename);
        Ok(())
    }

    async fn evict_infos_inner(&self) -> Result<(), CacheError> {
        let root = self.root().await?;
        let (files, _) = collect_tree(&root).await;
        let mut deleted = 0u64;
        let mut freed = 0u64;
        for path in files {
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let size = delete_file_quiet(&path).await;
                deleted += 1;
                freed += size;
            }
        }
        info!("Evicted {} info file(s), freeing {} bytes", deleted, freed);
        Ok(())
    }

    async fn evict_invalid_inner(&self) -> Result<(), CacheError> {
        let root = self.root().await?;
        self.purges.begin_global().await;
        let (files, _) = collect_tree(&root).await;
        let mut deleted = 0u64;
        let mut freed = 0u64;
        for path in files {
            let metadata = match fs::metadata(&path).await {
                Ok(m) => m,
                Err(_) => continue,
            };
            let ttl = self.ttl_for(&root, &path).await;
            if is_expired(&metadata, ttl) {
                let size = delete_file_quiet(&path).await;
                deleted += 1;
                freed += size;
            }
        }
        self.purges.end_global();
        info!("Evicted {} invalid file(s), freeing {} bytes", deleted, freed);
        Ok(())
    }

    async fn purge_inner(&self) -> Result<(), CacheError> {
        let root = self.root().await?;
        self.purges.begin_global().await;
        let (files, mut dirs) = collect_tree(&root).await;
        let mut deleted = 0u64;
        let mut freed = 0u64;
        for path in files {
            let size = delete_file_quiet(&path).await;
            deleted += 1;
            freed += size;
        }
        // Deepest directories first, so emptied parents can follow.
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for dir in dirs {
            let _ = fs::remove_dir(&dir).await;
        }
        self.purges.end_global();
        info!("Purged {} file(s), freeing {} bytes", deleted, freed);
        Ok(())
    }

    /// Deletes temp files older than `min_age` and zero-byte stray files,
    /// and sweeps per-identifier lock entries nothing holds anymore.
    pub async fn clean_up_aged(&self, min_age: Duration) -> Result<(), CacheError> {
        self.info_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1);

        let root = self.root().await?;
        let (files, _) = collect_tree(&root).await;
        let mut deleted = 0u64;
        for path in files {
            let metadata = match fs::metadata(&path).await {
                Ok(m) => m,
                Err(_) => continue,
            };
            if is_temp(&path) {
                if file_age(&metadata) >= min_age {
                    delete_file_quiet(&path).await;
                    deleted += 1;
                }
            } else if metadata.len() == 0 {
                delete_file_quiet(&path).await;
                deleted += 1;
            }
        }
        if deleted > 0 {
            info!("Cleanup removed {} stray file(s)", deleted);
        }
        Ok(())
    }
}

#[async_trait]
impl InfoCache for FilesystemCache {
    async fn shutdown(&self) {
        info!("Filesystem cache (info role) shut down");
    }

    async fn fetch_info(&self, id: &Identifier) -> Result<Option<Info>, CacheError> {
        self.fetch_info_inner(id).await
    }

    async fn put_info(&self, id: &Identifier, info: &Info) -> Result<(), CacheError> {
        self.put_info_inner(id, info).await
    }

    async fn evict(&self, id: &Identifier) -> Result<(), CacheError> {
        self.evict_identifier_inner(id).await
    }

    async fn evict_infos(&self) -> Result<(), CacheError> {
        self.evict_infos_inner().await
    }

    async fn evict_invalid(&self) -> Result<(), CacheError> {
        self.evict_invalid_inner().await
    }

    async fn purge(&self) -> Result<(), CacheError> {
        self.purge_inner().await
    }

    async fn clean_up(&self) -> Result<(), CacheError> {
        self.clean_up_aged(MIN_CLEANABLE_AGE).await
    }
}

#[async_trait]
impl VariantCache for FilesystemCache {
    async fn shutdown(&self) {
        info!("Filesystem cache (variant role) shut down");
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
        self.evict_identifier_inner(id).await
    }

    async fn evict_variant(&self, ops: &OperationList) -> Result<(), CacheError> {
        self.evict_variant_inner(ops).await
    }

    async fn evict_invalid(&self) -> Result<(), CacheError> {
        self.evict_invalid_inner().await
    }

    async fn purge(&self) -> Result<(), CacheError> {
        self.purge_inner().await
    }

    async fn clean_up(&self) -> Result<(), CacheError> {
        self.clean_up_aged(MIN_CLEANABLE_AGE).await
    }

    fn add_observer(&self, observer: &Arc<dyn CacheObserver>) {
        self.observers.add(observer);
    }
}

/// A file is expired iff a TTL applies and its age exceeds it. Last-access
/// time is preferred; filesystems that don't track it fall back to
/// last-modified.
fn is_expired(metadata: &Metadata, ttl: Option<Duration>) -> bool {
    let Some(ttl) = ttl else {
        return false;
    };
    file_age(metadata) > ttl
}

/// Age of a file per its access time, falling back to its modified time.
fn file_age(metadata: &Metadata) -> Duration {
    metadata
        .accessed()
        .or_else(|_| metadata.modified())
        .ok()
        .and_then(|t| t.elapsed().ok())
        .unwrap_or(Duration::ZERO)
}

/// Deletes a file, returning its size when something was actually removed.
/// Not-found is not an error; other failures are logged and swallowed.
async fn delete_file_quiet(path: &Path) -> u64 {
    let size = fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
    match fs::remove_file(path).await {
        Ok(()) => size,
        Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
        Err(e) => {
            warn!("Could not delete {:?}: {}", path, e);
            0
        }
    }
}

/// Walks the tree below `root`, returning regular files and directories.
/// Per-entry errors are logged and skipped; the walk continues.
async fn collect_tree(root: &Path) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut rd = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Could not list {:?}: {}", dir, e);
                }
                continue;
            }
        };
        loop {
            match rd.next_entry().await {
                Ok(Some(entry)) => match entry.file_type().await {
                    Ok(ft) if ft.is_dir() => {
                        dirs.push(entry.path());
                        pending.push(entry.path());
                    }
                    Ok(ft) if ft.is_file() => files.push(entry.path()),
                    Ok(_) => {}
                    Err(e) => warn!("Could not type {:?}: {}", entry.path(), e),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("Walk error under {:?}: {}", dir, e);
                    break;
                }
            }
        }
    }
    (files, dirs)
}
