// src/core/errors.rs

//! Defines the primary error type for the crate.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all failures the cache layer can report.
/// Cache misses are never errors; read paths signal them with `Option::None`.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// A cache artifact was readable but could not be deserialized. The
    /// facade treats this as a miss; the offending file is deleted in the
    /// background.
    #[error("Corrupt cache artifact: {0}")]
    Corrupt(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for CacheError {
    fn clone(&self) -> Self {
        match self {
            CacheError::Io(e) => CacheError::Io(Arc::clone(e)),
            CacheError::Corrupt(s) => CacheError::Corrupt(s.clone()),
            CacheError::Config(s) => CacheError::Config(s.clone()),
            CacheError::Internal(s) => CacheError::Internal(s.clone()),
        }
    }
}

impl PartialEq for CacheError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CacheError::Io(e1), CacheError::Io(e2)) => e1.to_string() == e2.to_string(),
            (CacheError::Corrupt(s1), CacheError::Corrupt(s2)) => s1 == s2,
            (CacheError::Config(s1), CacheError::Config(s2)) => s1 == s2,
            (CacheError::Internal(s1), CacheError::Internal(s2)) => s1 == s2,
            _ => false,
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Corrupt(e.to_string())
    }
}
