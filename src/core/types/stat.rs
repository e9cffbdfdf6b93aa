// src/core/types/stat.rs

use std::time::SystemTime;

/// Out-parameter carrying the last-modified instant of a retrieved artifact.
#[derive(Debug, Clone, Default)]
pub struct StatResult {
    pub last_modified: Option<SystemTime>,
}

impl StatResult {
    pub fn new() -> Self {
        Self::default()
    }
}
