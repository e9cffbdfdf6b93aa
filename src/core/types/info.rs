// src/core/types/info.rs

//! Serializable metadata describing a source image.

use crate::core::errors::CacheError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dimensions and tiling of one subimage (pyramidal sources carry several).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubImage {
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_height: Option<u32>,
}

impl SubImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tile_width: None,
            tile_height: None,
        }
    }
}

/// Structured image metadata, serializable to and from JSON text.
///
/// An `Info` retrieved from a cache backend always carries a populated
/// `serialization_timestamp`; backends fill it from the stored artifact's
/// last-modified time when the serialized form lacks one. That fill happens
/// on the returned value only, never on the persisted bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default = "default_num_resolutions")]
    pub num_resolutions: u32,
    #[serde(default)]
    pub images: Vec<SubImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serialization_timestamp: Option<DateTime<Utc>>,
}

fn default_num_resolutions() -> u32 {
    1
}

impl Info {
    pub fn new(media_type: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            media_type: Some(media_type.into()),
            num_resolutions: 1,
            images: vec![SubImage::new(width, height)],
            serialization_timestamp: None,
        }
    }

    /// Full-resolution width, if any subimage is present.
    pub fn width(&self) -> Option<u32> {
        self.images.first().map(|i| i.width)
    }

    /// Full-resolution height, if any subimage is present.
    pub fn height(&self) -> Option<u32> {
        self.images.first().map(|i| i.height)
    }

    pub fn to_json(&self) -> Result<String, CacheError> {
        serde_json::to_string(self).map_err(|e| CacheError::Internal(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, CacheError> {
        serde_json::from_str(text).map_err(|e| CacheError::Corrupt(e.to_string()))
    }

    /// Equality ignoring the serialization timestamp, for round-trip checks.
    pub fn same_content(&self, other: &Info) -> bool {
        self.media_type == other.media_type
            && self.num_resolutions == other.num_resolutions
            && self.images == other.images
    }
}
