// src/core/cache/filesystem/streams.rs

//! The file-backed completable sink used for variant writes.

use crate::core::cache::key::CacheKey;
use crate::core::cache::observer::ObserverRegistry;
use crate::core::cache::VariantSink;
use crate::core::errors::CacheError;
use crate::core::types::OperationList;
use async_trait::async_trait;
use dashmap::DashMap;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Streams variant bytes to a sibling temp file. Closing with the complete
/// flag set renames the temp file over the final name (atomic on POSIX
/// within a directory) and notifies observers; closing without it unlinks
/// the temp file. Either way the writer's in-flight registration is cleared
/// and waiters are notified.
pub(crate) struct FileVariantSink {
    writer: BufWriter<fs::File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    ops: OperationList,
    key: CacheKey,
    complete: bool,
    writes_in_flight: Arc<DashMap<CacheKey, ()>>,
    write_notify: Arc<Notify>,
    observers: Arc<ObserverRegistry>,
}

impl FileVariantSink {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        file: fs::File,
        tmp_path: PathBuf,
        final_path: PathBuf,
        ops: OperationList,
        key: CacheKey,
        writes_in_flight: Arc<DashMap<CacheKey, ()>>,
        write_notify: Arc<Notify>,
        observers: Arc<ObserverRegistry>,
    ) -> Self {
        Self {
            writer: BufWriter::new(file),
            tmp_path,
            final_path,
            ops,
            key,
            complete: false,
            writes_in_flight,
            write_notify,
            observers,
        }
    }

    async fn finish_inner(&mut self) -> Result<(), CacheError> {
        if let Err(e) = self.writer.flush().await {
            let _ = fs::remove_file(&self.tmp_path).await;
            return Err(e.into());
        }
        if self.complete {
            if let Err(e) = fs::rename(&self.tmp_path, &self.final_path).await {
                let _ = fs::remove_file(&self.tmp_path).await;
                return Err(e.into());
            }
            debug!("Committed variant {:?}", self.final_path);
            self.observers.notify_variant_written(&self.ops);
        } else {
            debug!("Discarding incomplete variant write {:?}", self.tmp_path);
            if let Err(e) = fs::remove_file(&self.tmp_path).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Could not delete temp file {:?}: {}", self.tmp_path, e);
                }
            }
        }
        Ok(())
    }
}

impl AsyncWrite for FileVariantSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}

#[async_trait]
impl VariantSink for FileVariantSink {
    fn mark_complete(&mut self) {
        self.complete = true;
    }

    async fn finish(mut self: Box<Self>) -> Result<(), CacheError> {
        let result = self.finish_inner().await;
        self.writes_in_flight.remove(&self.key);
        self.write_notify.notify_waiters();
        result
    }
}
