// src/core/types/operation_list.rs

//! Describes a requested image variant as an ordered list of post-processing
//! operations plus an output format.

use crate::core::types::Identifier;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Output encoding for a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Jpeg,
    Png,
    Webp,
    Gif,
    Tiff,
}

impl Format {
    /// The filename extension for the format.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Jpeg => "jpg",
            Format::Png => "png",
            Format::Webp => "webp",
            Format::Gif => "gif",
            Format::Tiff => "tif",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A single post-processing step. Integer-valued parameters keep the
/// canonical rendering exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Crop { x: u32, y: u32, width: u32, height: u32 },
    ScaleToWidth(u32),
    ScaleToHeight(u32),
    /// Scale both edges by a percentage (100 = identity).
    ScalePercent(u32),
    /// Clockwise rotation in whole degrees.
    Rotate(u32),
    /// Output quality, 1-100.
    Quality(u8),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Crop {
                x,
                y,
                width,
                height,
            } => write!(f, "crop:{x},{y},{width},{height}"),
            Operation::ScaleToWidth(w) => write!(f, "scalew:{w}"),
            Operation::ScaleToHeight(h) => write!(f, "scaleh:{h}"),
            Operation::ScalePercent(p) => write!(f, "scalepct:{p}"),
            Operation::Rotate(deg) => write!(f, "rotate:{deg}"),
            Operation::Quality(q) => write!(f, "quality:{q}"),
        }
    }
}

/// Describes a requested variant: the source identifier, the operations to
/// apply, and the output format.
///
/// Two operation lists are equal iff their canonical filename renderings are
/// equal; equality and hashing both delegate to [`OperationList::filename`].
#[derive(Debug, Clone)]
pub struct OperationList {
    identifier: Identifier,
    operations: Vec<Operation>,
    format: Format,
}

impl OperationList {
    pub fn new(identifier: Identifier, format: Format) -> Self {
        Self {
            identifier,
            operations: Vec::new(),
            format,
        }
    }

    pub fn with_operations(
        identifier: Identifier,
        operations: Vec<Operation>,
        format: Format,
    ) -> Self {
        Self {
            identifier,
            operations,
            format,
        }
    }

    pub fn push(&mut self, op: Operation) {
        self.operations.push(op);
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Canonical filename-style rendering:
    /// `<md5(identifier)>_<md5(operations + format)>.<extension>`.
    ///
    /// The identifier digest leads so that every variant of a source image
    /// shares a filename prefix, which is what identifier-wide eviction on
    /// the filesystem backend keys off.
    pub fn filename(&self) -> String {
        let ops_key = self
            .operations
            .iter()
            .map(Operation::to_string)
            .collect::<Vec<_>>()
            .join("+");
        let ops_digest = md5::compute(format!("{ops_key}.{}", self.format).as_bytes());
        format!(
            "{}_{:x}.{}",
            self.identifier.md5(),
            ops_digest,
            self.format.extension()
        )
    }
}

impl fmt::Display for OperationList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filename())
    }
}

impl PartialEq for OperationList {
    fn eq(&self, other: &Self) -> bool {
        self.filename() == other.filename()
    }
}

impl Eq for OperationList {}

impl Hash for OperationList {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.filename().hash(state);
    }
}
