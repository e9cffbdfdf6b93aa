// src/core/cache/key.rs

use crate::core::types::{Identifier, OperationList};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Key for an entry in a cache backend: either a source image's info or one
/// of its variants. Two keys are equal iff their canonical renderings are
/// equal.
#[derive(Debug, Clone)]
pub enum CacheKey {
    Info(Identifier),
    Variant(OperationList),
}

impl CacheKey {
    /// Canonical rendering: `id:<identifier>` or `op:<variant filename>`.
    pub fn rendering(&self) -> String {
        match self {
            CacheKey::Info(id) => format!("id:{id}"),
            CacheKey::Variant(ops) => format!("op:{}", ops.filename()),
        }
    }

    /// The source-image identifier behind the key.
    pub fn identifier(&self) -> &Identifier {
        match self {
            CacheKey::Info(id) => id,
            CacheKey::Variant(ops) => ops.identifier(),
        }
    }

    pub fn is_info(&self) -> bool {
        matches!(self, CacheKey::Info(_))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendering())
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.rendering() == other.rendering()
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rendering().hash(state);
    }
}
