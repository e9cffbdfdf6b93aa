use async_trait::async_trait;
use pixcache::config::{Config, SharedConfig};
use pixcache::core::cache::{CacheFacade, Decoder, HeapInfoIndex};
use pixcache::core::errors::CacheError;
use pixcache::core::types::{Format, Identifier, Info, Operation, OperationList, StatResult};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

struct CountingDecoder {
    reads: AtomicUsize,
    info: Info,
}

impl CountingDecoder {
    fn new(info: Info) -> Self {
        Self {
            reads: AtomicUsize::new(0),
            info,
        }
    }
}

#[async_trait]
impl Decoder for CountingDecoder {
    fn format(&self) -> Format {
        Format::Jpeg
    }

    async fn read(&self) -> Result<Info, CacheError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.info.clone())
    }
}

fn bare_config() -> SharedConfig {
    Config::default().into_shared()
}

fn fs_config(root: &Path) -> SharedConfig {
    let mut config = Config::default();
    config.cache.info_cache_enabled = true;
    config.cache.info_cache = Some("filesystem".to_string());
    config.cache.variant_cache_enabled = true;
    config.cache.variant_cache = Some("filesystem".to_string());
    config.cache.filesystem_cache_pathname = root.to_string_lossy().into_owned();
    config.into_shared()
}

fn ops_for(id: &str, quality: u8) -> OperationList {
    OperationList::with_operations(
        Identifier::from(id),
        vec![Operation::Quality(quality)],
        Format::Jpeg,
    )
}

/// Waits for the facade's background info write to land on the backend.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_read_through_invokes_decoder_exactly_once() {
    // No persistent info backend; only the heap info index in front.
    let facade = CacheFacade::with_heap_info_index(bare_config(), HeapInfoIndex::with_capacity(16));
    let id = Identifier::from("cats");
    let decoder = Arc::new(CountingDecoder::new(Info::new("image/jpeg", 100, 50)));
    let handle: Arc<dyn Decoder> = decoder.clone();

    let info = facade.fetch_or_read_info(&id, &handle).await.unwrap();
    assert_eq!(info.width(), Some(100));
    assert_eq!(decoder.reads.load(Ordering::SeqCst), 1);

    settle().await;

    let info = facade.fetch_or_read_info(&id, &handle).await.unwrap();
    assert_eq!(info.width(), Some(100));
    assert_eq!(decoder.reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_read_through_persists_to_backend() {
    let dir = tempfile::tempdir().unwrap();
    let facade =
        CacheFacade::with_heap_info_index(fs_config(dir.path()), HeapInfoIndex::with_capacity(16));
    let id = Identifier::from("cats");
    let decoder = Arc::new(CountingDecoder::new(Info::new("image/jpeg", 100, 50)));
    let handle: Arc<dyn Decoder> = decoder.clone();

    facade.fetch_or_read_info(&id, &handle).await.unwrap();
    settle().await;

    // Clear L1; the next fetch must come from the filesystem backend
    // without touching the decoder.
    facade.heap_info_index().purge();
    let info = facade.fetch_info(&id).await.unwrap().unwrap();
    assert_eq!(info.width(), Some(100));
    assert_eq!(decoder.reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_backend_hit_populates_l1() {
    let dir = tempfile::tempdir().unwrap();
    let facade =
        CacheFacade::with_heap_info_index(fs_config(dir.path()), HeapInfoIndex::with_capacity(16));
    let id = Identifier::from("cats");

    let backend = facade.factory().info_cache().await.unwrap().unwrap();
    backend
        .put_info(&id, &Info::new("image/jpeg", 100, 50))
        .await
        .unwrap();

    assert!(facade.heap_info_index().is_empty());
    assert!(facade.fetch_info(&id).await.unwrap().is_some());
    assert_eq!(facade.heap_info_index().len(), 1);
}

#[tokio::test]
async fn test_l1_disabled_bypasses_index() {
    let dir = tempfile::tempdir().unwrap();
    let config = fs_config(dir.path());
    config.lock().await.cache.heap_info_cache_enabled = false;
    let facade = CacheFacade::with_heap_info_index(config, HeapInfoIndex::with_capacity(16));
    let id = Identifier::from("cats");

    let backend = facade.factory().info_cache().await.unwrap().unwrap();
    backend
        .put_info(&id, &Info::new("image/jpeg", 100, 50))
        .await
        .unwrap();

    assert!(facade.fetch_info(&id).await.unwrap().is_some());
    assert!(facade.heap_info_index().is_empty());
}

#[tokio::test]
async fn test_variant_streams_unconfigured_are_absent() {
    let facade = CacheFacade::new(bare_config());
    let ops = ops_for("cats", 80);
    let mut stat = StatResult::new();
    assert!(facade.variant_reader(&ops, &mut stat).await.unwrap().is_none());
    assert!(facade.variant_writer(&ops).await.unwrap().is_none());
}

#[tokio::test]
async fn test_variant_round_trip_through_facade() {
    let dir = tempfile::tempdir().unwrap();
    let facade = CacheFacade::new(fs_config(dir.path()));
    let ops = ops_for("cats", 80);

    let mut sink = facade.variant_writer(&ops).await.unwrap().unwrap();
    sink.write_all(b"facade bytes").await.unwrap();
    sink.mark_complete();
    sink.finish().await.unwrap();

    let mut stat = StatResult::new();
    let mut reader = facade
        .variant_reader(&ops, &mut stat)
        .await
        .unwrap()
        .unwrap();
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.unwrap();
    assert_eq!(buf, b"facade bytes");
}

#[tokio::test]
async fn test_evict_fans_out_to_all_tiers() {
    let dir = tempfile::tempdir().unwrap();
    let facade =
        CacheFacade::with_heap_info_index(fs_config(dir.path()), HeapInfoIndex::with_capacity(16));
    let id = Identifier::from("cats");
    let ops = ops_for("cats", 80);

    let backend = facade.factory().info_cache().await.unwrap().unwrap();
    backend
        .put_info(&id, &Info::new("image/jpeg", 100, 50))
        .await
        .unwrap();
    facade.fetch_info(&id).await.unwrap();
    assert_eq!(facade.heap_info_index().len(), 1);

    let mut sink = facade.variant_writer(&ops).await.unwrap().unwrap();
    sink.write_all(b"bytes").await.unwrap();
    sink.mark_complete();
    sink.finish().await.unwrap();

    facade.evict(&id).await.unwrap();

    assert!(facade.heap_info_index().is_empty());
    assert!(facade.fetch_info(&id).await.unwrap().is_none());
    let mut stat = StatResult::new();
    assert!(facade.variant_reader(&ops, &mut stat).await.unwrap().is_none());
}

#[tokio::test]
async fn test_purge_includes_l1() {
    let dir = tempfile::tempdir().unwrap();
    let facade =
        CacheFacade::with_heap_info_index(fs_config(dir.path()), HeapInfoIndex::with_capacity(16));
    let id = Identifier::from("cats");

    let backend = facade.factory().info_cache().await.unwrap().unwrap();
    backend
        .put_info(&id, &Info::new("image/jpeg", 100, 50))
        .await
        .unwrap();
    facade.fetch_info(&id).await.unwrap();
    assert_eq!(facade.heap_info_index().len(), 1);

    facade.purge().await.unwrap();

    assert!(facade.heap_info_index().is_empty());
    assert!(facade.fetch_info(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_corrupt_backend_artifact_reads_as_miss() {
    let dir = tempfile::tempdir().unwrap();
    let facade = CacheFacade::new(fs_config(dir.path()));
    let id = Identifier::from("cats");

    // Plant a corrupt info file where the backend expects it.
    let digest = id.md5();
    let mut path = dir.path().join("info");
    path.push(&digest[0..2]);
    path.push(&digest[2..4]);
    path.push(&digest[4..6]);
    std::fs::create_dir_all(&path).unwrap();
    path.push(format!("{digest}.json"));
    std::fs::write(&path, b"{ definitely not json").unwrap();

    assert!(facade.fetch_info(&id).await.unwrap().is_none());
}
