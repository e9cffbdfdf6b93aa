// src/core/cache/filesystem/paths.rs

//! Path derivation for the on-disk layout: MD5 shard directories and the
//! sibling temp-name scheme used by the atomic write protocol.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Subdirectory of the root holding info files.
pub(crate) const INFO_DIR: &str = "info";
/// Subdirectory of the root holding variant files.
pub(crate) const IMAGE_DIR: &str = "image";
/// Extension of in-progress write files.
pub(crate) const TEMP_EXTENSION: &str = "tmp";

/// Process-wide writer sequence, making sibling temp names unique across
/// concurrent writers.
static WRITER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Splits the first `depth * segment_len` characters of an MD5 hex digest
/// into `depth` path segments of `segment_len` characters each. This caps
/// the fan-out per directory while permitting millions of entries.
pub(crate) fn shard_path(digest: &str, depth: usize, segment_len: usize) -> PathBuf {
    let mut path = PathBuf::new();
    for i in 0..depth {
        let start = i * segment_len;
        if start >= digest.len() {
            break;
        }
        let end = (start + segment_len).min(digest.len());
        path.push(&digest[start..end]);
    }
    path
}

/// A sibling temp name for `final_path`: `<final>_<writer-seq>.tmp`, in the
/// same directory so the commit rename stays within one filesystem.
pub(crate) fn temp_path(final_path: &Path) -> PathBuf {
    let seq = WRITER_SEQ.fetch_add(1, Ordering::Relaxed);
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    final_path.with_file_name(format!("{name}_{seq}.{TEMP_EXTENSION}"))
}

/// Whether `path` names an in-progress write file.
pub(crate) fn is_temp(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == TEMP_EXTENSION)
        .unwrap_or(false)
}
