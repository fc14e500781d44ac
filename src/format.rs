// SPDX-License-Identifier: MIT
//! MCBZ container format definition
//!
//! Byte layout, version dispatch and defensive limits shared by the writer
//! and the reader. All integers are little-endian on every host.

use std::fmt;

/// Format marker at the start of every container
pub const MARKER: &[u8; 4] = b"MCBZ";

/// Fixed header prefix: marker (4) + version (1) + metadata length (4)
pub const HEADER_PREFIX_SIZE: usize = 4 + 1 + 4;

/// Size of a batch count prefix
pub const BATCH_COUNT_SIZE: usize = 4;

/// Size of a document length prefix
pub const DOCUMENT_LENGTH_SIZE: usize = 4;

/// Default size of the metadata region reserved by the writer
pub const DEFAULT_METADATA_RESERVE: u32 = 4096;

/// Hard per-document ceiling (16 MiB, the source database's document limit)
pub const DEFAULT_MAX_DOCUMENT_SIZE: u32 = 16 * 1024 * 1024;

/// Hard ceiling for a metadata region
pub const DEFAULT_MAX_METADATA_SIZE: u32 = 1024 * 1024;

/// Hard ceiling for the declared document count of one batch
pub const DEFAULT_MAX_BATCH_DOCUMENTS: u32 = 1 << 20;

/// Container format versions
///
/// The version byte selects how the body is encoded. A file is either
/// compressed end to end or not at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FormatVersion {
    /// Body is a single zstd stream
    Compressed = 1,
    /// Body is stored as-is
    Plain = 2,
}

impl FormatVersion {
    /// All versions this build can read
    pub const SUPPORTED: [FormatVersion; 2] = [FormatVersion::Compressed, FormatVersion::Plain];

    /// Decode a version byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(FormatVersion::Compressed),
            2 => Some(FormatVersion::Plain),
            _ => None,
        }
    }

    /// The on-disk version byte
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether the body passes through the compression adapter
    #[inline]
    pub fn is_compressed(self) -> bool {
        matches!(self, FormatVersion::Compressed)
    }

    /// Supported version bytes, for diagnostics
    pub fn supported_bytes() -> Vec<u8> {
        Self::SUPPORTED.iter().map(|v| v.as_byte()).collect()
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatVersion::Compressed => write!(f, "v1 (zstd body)"),
            FormatVersion::Plain => write!(f, "v2 (uncompressed body)"),
        }
    }
}

/// Fixed header written at the start of a finalized container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: FormatVersion,
    /// Length of the metadata region that follows the prefix
    pub metadata_len: u32,
}

impl ContainerHeader {
    pub fn new(version: FormatVersion, metadata_len: u32) -> Self {
        Self {
            version,
            metadata_len,
        }
    }

    /// Encode the header prefix
    pub fn to_bytes(&self) -> [u8; HEADER_PREFIX_SIZE] {
        let mut bytes = [0u8; HEADER_PREFIX_SIZE];
        bytes[0..4].copy_from_slice(MARKER);
        bytes[4] = self.version.as_byte();
        bytes[5..9].copy_from_slice(&self.metadata_len.to_le_bytes());
        bytes
    }

    /// Offset of the first body byte relative to the header start
    #[inline]
    pub fn body_offset(&self) -> u64 {
        HEADER_PREFIX_SIZE as u64 + self.metadata_len as u64
    }
}

/// Check the marker bytes
#[inline]
pub fn is_marker(bytes: &[u8]) -> bool {
    bytes == MARKER
}

/// Defensive ceilings applied to untrusted length fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_metadata_size: u32,
    pub max_batch_documents: u32,
    pub max_document_size: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_metadata_size: DEFAULT_MAX_METADATA_SIZE,
            max_batch_documents: DEFAULT_MAX_BATCH_DOCUMENTS,
            max_document_size: DEFAULT_MAX_DOCUMENT_SIZE,
        }
    }
}

/// An opaque document payload
///
/// The container never interprets the bytes; whatever the writer receives
/// the reader hands back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Document(Vec<u8>);

impl Document {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Document {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Document {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AsRef<[u8]> for Document {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Where in the container an operation was when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Header,
    Metadata,
    Body,
    BatchCount { batch: u64 },
    DocumentLength { batch: u64, document: u64 },
    DocumentBody { batch: u64, document: u64 },
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Header => write!(f, "header"),
            Stage::Metadata => write!(f, "metadata"),
            Stage::Body => write!(f, "body"),
            Stage::BatchCount { batch } => write!(f, "batch {} count", batch),
            Stage::DocumentLength { batch, document } => {
                write!(f, "batch {} document {} length", batch, document)
            }
            Stage::DocumentBody { batch, document } => {
                write!(f, "batch {} document {} payload", batch, document)
            }
        }
    }
}
