// src/core/types/identifier.rs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque unique name for a source image.
///
/// Treated as an immutable string. It may contain characters that need
/// escaping in filesystem paths, which is why on-disk backends address it
/// through its MD5 digest rather than the raw string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase hex MD5 digest of the identifier string, used for shard
    /// paths and filename prefixes.
    pub fn md5(&self) -> String {
        format!("{:x}", md5::compute(self.0.as_bytes()))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}
