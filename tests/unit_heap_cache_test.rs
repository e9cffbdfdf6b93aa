use pixcache::config::{Config, SharedConfig, SizeSpec};
use pixcache::core::cache::heap::HeapCache;
use pixcache::core::cache::{CacheObserver, InfoCache, VariantCache};
use pixcache::core::types::{Format, Identifier, Info, Operation, OperationList, StatResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn heap_config(target: u64, info_ttl: u64, variant_ttl: u64) -> SharedConfig {
    let mut config = Config::default();
    config.cache.heapcache_target_size = SizeSpec::Bytes(target);
    config.cache.info_cache_ttl = info_ttl;
    config.cache.variant_cache_ttl = variant_ttl;
    config.into_shared()
}

fn ops_for(id: &str, quality: u8) -> OperationList {
    OperationList::with_operations(
        Identifier::from(id),
        vec![Operation::Quality(quality)],
        Format::Jpeg,
    )
}

#[derive(Default)]
struct CountingObserver {
    count: AtomicUsize,
}

impl CacheObserver for CountingObserver {
    fn on_variant_written(&self, _ops: &OperationList) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_rejects_non_positive_target_size() {
    let err = HeapCache::from_config(heap_config(0, 0, 0))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, pixcache::CacheError::Config(_)));
}

#[tokio::test]
async fn test_info_round_trip_fills_timestamp() {
    let cache = HeapCache::from_config(heap_config(1 << 20, 0, 0))
        .await
        .unwrap();
    let id = Identifier::from("cats");
    let info = Info::new("image/jpeg", 100, 50);

    assert!(cache.fetch_info(&id).await.unwrap().is_none());
    cache.put_info(&id, &info).await.unwrap();

    let fetched = cache.fetch_info(&id).await.unwrap().unwrap();
    assert!(fetched.same_content(&info));
    assert!(fetched.serialization_timestamp.is_some());
}

#[tokio::test]
async fn test_variant_round_trip() {
    let cache = HeapCache::from_config(heap_config(1 << 20, 0, 0))
        .await
        .unwrap();
    let ops = ops_for("cats", 80);

    let mut stat = StatResult::new();
    assert!(cache.variant_reader(&ops, &mut stat).await.unwrap().is_none());

    let mut sink = cache.variant_writer(&ops).await.unwrap();
    sink.write_all(&[0x01, 0x02, 0x03]).await.unwrap();
    sink.mark_complete();
    sink.finish().await.unwrap();

    let mut reader = cache
        .variant_reader(&ops, &mut stat)
        .await
        .unwrap()
        .unwrap();
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.unwrap();
    assert_eq!(buf, vec![0x01, 0x02, 0x03]);
    let age = stat
        .last_modified
        .unwrap()
        .elapsed()
        .unwrap_or(Duration::ZERO);
    assert!(age < Duration::from_secs(2));
}

#[tokio::test]
async fn test_incomplete_write_is_discarded() {
    let cache = HeapCache::from_config(heap_config(1 << 20, 0, 0))
        .await
        .unwrap();
    let ops = ops_for("cats", 80);

    let mut sink = cache.variant_writer(&ops).await.unwrap();
    sink.write_all(b"partial").await.unwrap();
    sink.finish().await.unwrap();

    let mut stat = StatResult::new();
    assert!(cache.variant_reader(&ops, &mut stat).await.unwrap().is_none());
    assert_eq!(cache.used_bytes(), 0);
}

#[tokio::test]
async fn test_existing_entry_yields_noop_sink() {
    let cache = HeapCache::from_config(heap_config(1 << 20, 0, 0))
        .await
        .unwrap();
    let ops = ops_for("cats", 80);

    let mut sink = cache.variant_writer(&ops).await.unwrap();
    sink.write_all(b"original").await.unwrap();
    sink.mark_complete();
    sink.finish().await.unwrap();

    let mut second = cache.variant_writer(&ops).await.unwrap();
    second.write_all(b"discarded").await.unwrap();
    second.mark_complete();
    second.finish().await.unwrap();

    let mut stat = StatResult::new();
    let mut reader = cache
        .variant_reader(&ops, &mut stat)
        .await
        .unwrap()
        .unwrap();
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.unwrap();
    assert_eq!(buf, b"original");
}

#[tokio::test]
async fn test_observer_notified_once_per_commit() {
    let cache = HeapCache::from_config(heap_config(1 << 20, 0, 0))
        .await
        .unwrap();
    let observer = Arc::new(CountingObserver::default());
    let handle: Arc<dyn CacheObserver> = observer.clone();
    cache.add_observer(&handle);

    // An aborted write must not notify.
    let mut aborted = cache.variant_writer(&ops_for("cats", 10)).await.unwrap();
    aborted.write_all(b"junk").await.unwrap();
    aborted.finish().await.unwrap();
    assert_eq!(observer.count.load(Ordering::SeqCst), 0);

    let mut sink = cache.variant_writer(&ops_for("cats", 80)).await.unwrap();
    sink.write_all(b"bytes").await.unwrap();
    sink.mark_complete();
    sink.finish().await.unwrap();
    assert_eq!(observer.count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_evict_identifier_spares_other_identifiers() {
    let cache = HeapCache::from_config(heap_config(1 << 20, 0, 0))
        .await
        .unwrap();
    let cats = Identifier::from("cats");

    cache
        .put_info(&cats, &Info::new("image/jpeg", 1, 1))
        .await
        .unwrap();
    for quality in [10, 20] {
        let mut sink = cache.variant_writer(&ops_for("cats", quality)).await.unwrap();
        sink.write_all(b"cat bytes").await.unwrap();
        sink.mark_complete();
        sink.finish().await.unwrap();
    }
    let mut sink = cache.variant_writer(&ops_for("dogs", 10)).await.unwrap();
    sink.write_all(b"dog bytes").await.unwrap();
    sink.mark_complete();
    sink.finish().await.unwrap();

    InfoCache::evict(&cache, &cats).await.unwrap();

    assert!(cache.fetch_info(&cats).await.unwrap().is_none());
    let mut stat = StatResult::new();
    assert!(
        cache
            .variant_reader(&ops_for("cats", 10), &mut stat)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        cache
            .variant_reader(&ops_for("dogs", 10), &mut stat)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_evict_infos_spares_variants() {
    let cache = HeapCache::from_config(heap_config(1 << 20, 0, 0))
        .await
        .unwrap();
    let id = Identifier::from("cats");
    cache
        .put_info(&id, &Info::new("image/jpeg", 1, 1))
        .await
        .unwrap();
    let mut sink = cache.variant_writer(&ops_for("cats", 80)).await.unwrap();
    sink.write_all(b"bytes").await.unwrap();
    sink.mark_complete();
    sink.finish().await.unwrap();

    cache.evict_infos().await.unwrap();

    assert!(cache.fetch_info(&id).await.unwrap().is_none());
    let mut stat = StatResult::new();
    assert!(
        cache
            .variant_reader(&ops_for("cats", 80), &mut stat)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_expired_entry_reads_as_miss_and_is_removed() {
    let cache = HeapCache::from_config(heap_config(1 << 20, 1, 1))
        .await
        .unwrap();
    let id = Identifier::from("cats");
    cache
        .put_info(&id, &Info::new("image/jpeg", 1, 1))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1300)).await;

    assert!(cache.fetch_info(&id).await.unwrap().is_none());
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_evict_invalid_respects_per_kind_ttls() {
    // Infos expire after a second; variants never do.
    let cache = HeapCache::from_config(heap_config(1 << 20, 1, 0))
        .await
        .unwrap();
    cache
        .put_info(&Identifier::from("cats"), &Info::new("image/jpeg", 1, 1))
        .await
        .unwrap();
    let mut sink = cache.variant_writer(&ops_for("cats", 80)).await.unwrap();
    sink.write_all(b"bytes").await.unwrap();
    sink.mark_complete();
    sink.finish().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1300)).await;
    InfoCache::evict_invalid(&cache).await.unwrap();

    assert_eq!(cache.len(), 1);
    let mut stat = StatResult::new();
    assert!(
        cache
            .variant_reader(&ops_for("cats", 80), &mut stat)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_evict_excess_trims_to_target_keeping_most_recent() {
    let cache = HeapCache::from_config(heap_config(1024, 0, 0))
        .await
        .unwrap();
    let payload = [0u8; 100];

    for quality in 0..20u8 {
        let mut sink = cache.variant_writer(&ops_for("cats", quality)).await.unwrap();
        sink.write_all(&payload).await.unwrap();
        sink.mark_complete();
        sink.finish().await.unwrap();
        // Keep last-accessed times strictly ordered.
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(cache.used_bytes(), 2000);

    cache.evict_excess().await;

    assert!(cache.used_bytes() <= cache.target_bytes());
    let mut stat = StatResult::new();
    for quality in 0..10u8 {
        assert!(
            cache
                .variant_reader(&ops_for("cats", quality), &mut stat)
                .await
                .unwrap()
                .is_none(),
            "oldest entry {quality} should have been evicted"
        );
    }
    for quality in 10..20u8 {
        assert!(
            cache
                .variant_reader(&ops_for("cats", quality), &mut stat)
                .await
                .unwrap()
                .is_some(),
            "most recent entry {quality} should have survived"
        );
    }
}

#[tokio::test]
async fn test_purge_empties_everything() {
    let cache = HeapCache::from_config(heap_config(1 << 20, 0, 0))
        .await
        .unwrap();
    cache
        .put_info(&Identifier::from("cats"), &Info::new("image/jpeg", 1, 1))
        .await
        .unwrap();
    let mut sink = cache.variant_writer(&ops_for("cats", 80)).await.unwrap();
    sink.write_all(b"bytes").await.unwrap();
    sink.mark_complete();
    sink.finish().await.unwrap();

    InfoCache::purge(&cache).await.unwrap();
    assert!(cache.is_empty());
    assert_eq!(cache.used_bytes(), 0);
}
