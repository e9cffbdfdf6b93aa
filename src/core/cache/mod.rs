// src/core/cache/mod.rs

//! The cache subsystem: backend traits, the coordinating facade, the
//! configuration-driven factory, and the concrete heap and filesystem
//! backends.

pub mod facade;
pub mod factory;
pub mod filesystem;
pub mod heap;
pub mod heap_info_index;
pub mod key;
pub mod observer;

pub use facade::CacheFacade;
pub use factory::CacheFactory;
pub use filesystem::FilesystemCache;
pub use heap::HeapCache;
pub use heap_info_index::HeapInfoIndex;
pub use key::CacheKey;
pub use observer::{CacheObserver, ObserverRegistry};

use crate::core::errors::CacheError;
use crate::core::types::{Identifier, Info, OperationList, StatResult};
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

/// A readable stream over a cached variant's bytes.
pub type VariantReader = Box<dyn AsyncRead + Send + Unpin>;

/// An output stream with an explicit "complete" flag. The caller streams
/// variant bytes into it, marks it complete on success, and then calls
/// [`VariantSink::finish`], which commits the artifact (and notifies
/// observers) or discards it.
#[async_trait]
pub trait VariantSink: AsyncWrite + Send + Unpin {
    /// Signals that the variant was fully produced, so `finish` commits
    /// instead of discarding.
    fn mark_complete(&mut self);

    /// Closes the sink. Commits the buffered/temp artifact when the sink was
    /// marked complete; deletes it otherwise.
    async fn finish(self: Box<Self>) -> Result<(), CacheError>;
}

/// Sink handed to a writer that lost the in-flight arbitration for a key.
/// Writes are discarded; `finish` is a no-op.
#[derive(Debug, Default)]
pub struct NoopSink {
    complete: bool,
}

impl NoopSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AsyncWrite for NoopSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
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
impl VariantSink for NoopSink {
    fn mark_complete(&mut self) {
        self.complete = true;
    }

    async fn finish(self: Box<Self>) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Produces an [`Info`] for a source image when no cache entry exists. The
/// decoder is supplied by the host; no caching behavior is expected of it.
#[async_trait]
pub trait Decoder: Send + Sync {
    /// The source image format, e.g. the format the decoder was opened with.
    fn format(&self) -> crate::core::types::Format;

    async fn read(&self) -> Result<Info, CacheError>;
}

/// Capability set of a backend that persists infos.
#[async_trait]
pub trait InfoCache: Send + Sync {
    async fn initialize(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn shutdown(&self) {}

    async fn fetch_info(&self, id: &Identifier) -> Result<Option<Info>, CacheError>;

    async fn put_info(&self, id: &Identifier, info: &Info) -> Result<(), CacheError>;

    /// Removes the info and every variant derived from `id`.
    async fn evict(&self, id: &Identifier) -> Result<(), CacheError>;

    /// Removes all infos, leaving variants alone.
    async fn evict_infos(&self) -> Result<(), CacheError>;

    async fn evict_invalid(&self) -> Result<(), CacheError>;

    async fn purge(&self) -> Result<(), CacheError>;

    async fn clean_up(&self) -> Result<(), CacheError>;
}

/// Capability set of a backend that persists variants.
#[async_trait]
pub trait VariantCache: Send + Sync {
    async fn initialize(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn shutdown(&self) {}

    /// Opens a stream over the variant if present and valid, filling `stat`
    /// with the artifact's last-modified time.
    async fn variant_reader(
        &self,
        ops: &OperationList,
        stat: &mut StatResult,
    ) -> Result<Option<VariantReader>, CacheError>;

    /// Opens a completable sink for the variant. Exactly one concurrent
    /// caller per operation list receives a real sink; the rest receive
    /// no-op sinks.
    async fn variant_writer(&self, ops: &OperationList)
    -> Result<Box<dyn VariantSink>, CacheError>;

    /// Removes every variant derived from `id`.
    async fn evict(&self, id: &Identifier) -> Result<(), CacheError>;

    /// Removes the one variant described by `ops`.
    async fn evict_variant(&self, ops: &OperationList) -> Result<(), CacheError>;

    async fn evict_invalid(&self) -> Result<(), CacheError>;

    async fn purge(&self) -> Result<(), CacheError>;

    async fn clean_up(&self) -> Result<(), CacheError>;

    /// Registers an observer to be notified after variant writes commit.
    fn add_observer(&self, observer: &Arc<dyn CacheObserver>);

    /// Hook invoked by the periodic cache worker.
    async fn on_worker(&self) {
        if let Err(e) = self.evict_invalid().await {
            warn!("Worker eviction pass failed: {}", e);
        }
        if let Err(e) = self.clean_up().await {
            warn!("Worker cleanup pass failed: {}", e);
        }
    }
}
