// src/config.rs

//! Manages cache-layer configuration: loading, resolving dynamic values, and
//! validation. The host hands the core a [`SharedConfig`]; every cache
//! operation reads through it, so live edits take effect on the next
//! operation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tracing::{info, warn};

/// The live, reloadable configuration handle shared by the facade, the
/// factory, and the backends.
pub type SharedConfig = Arc<tokio::sync::Mutex<Config>>;

/// Backend implementation name for the on-disk cache.
pub const FILESYSTEM_CACHE_NAME: &str = "filesystem";
/// Backend implementation name for the in-memory cache.
pub const HEAP_CACHE_NAME: &str = "heap";

/// A size that may be given as raw bytes or as a human string such as
/// `"256M"` or `"5%"` (of available memory).
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum SizeSpec {
    Bytes(u64),
    Human(String),
}

impl SizeSpec {
    /// Resolves to a byte count. Percentages resolve against the detected
    /// available memory.
    pub fn resolve(&self) -> Result<u64> {
        match self {
            SizeSpec::Bytes(b) => Ok(*b),
            SizeSpec::Human(s) => {
                let lower = s.to_lowercase();
                if let Some(pct_str) = lower.strip_suffix('%') {
                    let pct: f64 = pct_str
                        .trim()
                        .parse()
                        .with_context(|| format!("Invalid percentage value '{s}'"))?;
                    if !(0.0..=100.0).contains(&pct) {
                        return Err(anyhow!("Percentage must be between 0 and 100, got '{s}'"));
                    }
                    Ok((available_memory()? as f64 * (pct / 100.0)) as u64)
                } else if let Some(v) = lower.strip_suffix("gb").or(lower.strip_suffix('g')) {
                    parse_size_number(s, v, 1024 * 1024 * 1024)
                } else if let Some(v) = lower.strip_suffix("mb").or(lower.strip_suffix('m')) {
                    parse_size_number(s, v, 1024 * 1024)
                } else if let Some(v) = lower.strip_suffix("kb").or(lower.strip_suffix('k')) {
                    parse_size_number(s, v, 1024)
                } else {
                    lower.trim().parse().with_context(|| {
                        format!(
                            "Invalid size value '{s}'. Must be a number (bytes), a percentage \
                             (e.g. '5%'), or have a unit (e.g. '256M')."
                        )
                    })
                }
            }
        }
    }
}

/// Parses a string number with a unit suffix and applies a multiplier.
fn parse_size_number(original: &str, value_str: &str, multiplier: u64) -> Result<u64> {
    let value: u64 = value_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid number in size value '{original}'"))?;
    Ok(value.saturating_mul(multiplier))
}

// Platform-specific module for detecting cgroup memory limits on Linux.
#[cfg(target_os = "linux")]
mod linux_memory {
    use super::*;

    pub fn get_cgroup_memory_limit() -> Option<u64> {
        // Cgroup v2
        if let Ok(limit_str) = fs::read_to_string("/sys/fs/cgroup/memory.max") {
            if let Ok(limit) = limit_str.trim().parse::<u64>() {
                if limit < u64::MAX / 2 {
                    info!("Detected cgroup v2 memory limit: {} bytes", limit);
                    return Some(limit);
                }
            }
        }

        // Cgroup v1
        if let Ok(limit_str) = fs::read_to_string("/sys/fs/cgroup/memory/memory.limit_in_bytes") {
            if let Ok(limit) = limit_str.trim().parse::<u64>() {
                if limit < u64::MAX / 2 {
                    info!("Detected cgroup v1 memory limit: {} bytes", limit);
                    return Some(limit);
                }
            }
        }

        None
    }
}

// Stub module for non-Linux operating systems.
#[cfg(not(target_os = "linux"))]
mod other_os_memory {
    pub fn get_cgroup_memory_limit() -> Option<u64> {
        None
    }
}

/// Gets the available memory, prioritizing cgroup limits on Linux over
/// system memory.
pub fn available_memory() -> Result<u64> {
    #[cfg(target_os = "linux")]
    let cgroup_limit = linux_memory::get_cgroup_memory_limit();

    #[cfg(not(target_os = "linux"))]
    let cgroup_limit = other_os_memory::get_cgroup_memory_limit();

    if let Some(limit) = cgroup_limit {
        return Ok(limit);
    }

    let mut sys = System::new();
    sys.refresh_memory();
    Ok(sys.total_memory())
}

/// Configuration of the cache subsystem.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheConfig {
    /// Toggles info backend selection.
    #[serde(default)]
    pub info_cache_enabled: bool,
    /// Implementation name of the info backend ("filesystem" or "heap").
    #[serde(default)]
    pub info_cache: Option<String>,
    /// Seconds; 0 = infinite.
    #[serde(default)]
    pub info_cache_ttl: u64,
    /// Toggles variant backend selection.
    #[serde(default)]
    pub variant_cache_enabled: bool,
    /// Implementation name of the variant backend ("filesystem" or "heap").
    #[serde(default)]
    pub variant_cache: Option<String>,
    /// Seconds; 0 = infinite.
    #[serde(default)]
    pub variant_cache_ttl: u64,
    /// Toggles consultation of the in-memory info index (L1).
    #[serde(default = "default_heap_info_cache_enabled")]
    pub heap_info_cache_enabled: bool,
    /// Target size of the heap backend; strict positive.
    #[serde(default = "default_heapcache_target_size")]
    pub heapcache_target_size: SizeSpec,
    /// Absolute path of the filesystem cache's root directory.
    #[serde(default)]
    pub filesystem_cache_pathname: String,
    /// Number of shard path segments under `info/` and `image/`.
    #[serde(default = "default_directory_depth")]
    pub filesystem_cache_directory_depth: usize,
    /// Hex characters per shard path segment.
    #[serde(default = "default_directory_name_length")]
    pub filesystem_cache_directory_name_length: usize,
    /// Seconds between periodic cache-worker ticks.
    #[serde(default = "default_cache_worker_interval")]
    pub cache_worker_interval: u64,
}

fn default_heap_info_cache_enabled() -> bool {
    true
}
fn default_heapcache_target_size() -> SizeSpec {
    SizeSpec::Human("256M".to_string())
}
fn default_directory_depth() -> usize {
    3
}
fn default_directory_name_length() -> usize {
    2
}
fn default_cache_worker_interval() -> u64 {
    // Galleries under steady load accumulate expired variants quickly;
    // an hourly pass keeps the walk cheap.
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            info_cache_enabled: false,
            info_cache: None,
            info_cache_ttl: 0,
            variant_cache_enabled: false,
            variant_cache: None,
            variant_cache_ttl: 0,
            heap_info_cache_enabled: default_heap_info_cache_enabled(),
            heapcache_target_size: default_heapcache_target_size(),
            filesystem_cache_pathname: String::new(),
            filesystem_cache_directory_depth: default_directory_depth(),
            filesystem_cache_directory_name_length: default_directory_name_length(),
            cache_worker_interval: default_cache_worker_interval(),
        }
    }
}

impl CacheConfig {
    /// The info TTL as a duration; `None` means entries never expire.
    pub fn info_ttl(&self) -> Option<Duration> {
        (self.info_cache_ttl > 0).then(|| Duration::from_secs(self.info_cache_ttl))
    }

    /// The variant TTL as a duration; `None` means entries never expire.
    pub fn variant_ttl(&self) -> Option<Duration> {
        (self.variant_cache_ttl > 0).then(|| Duration::from_secs(self.variant_cache_ttl))
    }
}

/// The root configuration of the cache layer.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Wraps the config in the shared, reloadable handle the core consumes.
    pub fn into_shared(self) -> SharedConfig {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Validates the configuration for logical consistency. Values that only
    /// matter to a particular backend (e.g. the heap target size) are
    /// re-checked when that backend is first demanded.
    pub fn validate(&self) -> Result<()> {
        let cache = &self.cache;

        if cache.filesystem_cache_directory_depth == 0 {
            return Err(anyhow!("filesystem_cache_directory_depth cannot be 0"));
        }
        if cache.filesystem_cache_directory_name_length == 0 {
            return Err(anyhow!("filesystem_cache_directory_name_length cannot be 0"));
        }
        // An MD5 digest yields 32 hex characters for sharding.
        if cache.filesystem_cache_directory_depth * cache.filesystem_cache_directory_name_length
            > 32
        {
            return Err(anyhow!(
                "directory depth x name length cannot exceed 32 hex characters"
            ));
        }
        if cache.cache_worker_interval == 0 {
            return Err(anyhow!("cache_worker_interval cannot be 0"));
        }

        if cache.info_cache_enabled && cache.info_cache.as_deref().unwrap_or("").is_empty() {
            warn!("info_cache_enabled is set but info_cache names no implementation");
        }
        if cache.variant_cache_enabled && cache.variant_cache.as_deref().unwrap_or("").is_empty() {
            warn!("variant_cache_enabled is set but variant_cache names no implementation");
        }

        Ok(())
    }
}
