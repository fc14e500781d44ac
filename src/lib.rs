// SPDX-License-Identifier: MIT
//! # MCBZ document collection container
//!
//! A self-describing binary container for bulk document collections. A
//! container holds one collection: a header that identifies the format and
//! carries schemaless metadata, followed by a body of length-prefixed document
//! batches that is optionally zstd-compressed as a single stream.
//!
//! Documents are opaque byte payloads. The container never looks inside
//! them; whatever goes into the writer comes back out of the reader.
//!
//! ## Format Specification
//!
//! ```text
//! MCBZ container (all integers little-endian)
//! ===========================================
//!
//! Header:
//! - Marker: "MCBZ" (4 bytes)
//! - Version: 1 = zstd body, 2 = plain body (1 byte)
//! - Metadata length: size of the metadata region (u32)
//!
//! Metadata region (fixed size reserved at create time):
//! - MessagePack map keyed by field name
//! - zero padding up to the region length
//!
//! Body (one continuous stream, compressed as a whole for v1):
//! - Batch:    count (u32), then `count` documents
//! - Document: length (u32), then `length` bytes
//! ```
//!
//! ## Writing
//!
//! The writer reserves the header region up front, streams batches behind
//! it and, on finalize, seeks back to fill in the header and metadata with
//! the final totals. Output therefore has to be seekable.
//!
//! ## Reading
//!
//! Length fields are untrusted. Declared batch counts, document lengths and
//! metadata lengths are checked against [`Limits`] before they drive any
//! allocation, and a file cut off after a complete batch still yields every
//! document before the cut.
//!
//! ## Usage
//!
//! ```rust
//! use mcbz::{Compression, ContainerReader, ContainerWriter, Document, Metadata, WriterOptions};
//! use std::io::Cursor;
//!
//! let options = WriterOptions::default().with_compression(Compression::zstd());
//! let mut writer = ContainerWriter::new(Cursor::new(Vec::new()), options).unwrap();
//! writer
//!     .set_initial_metadata(Metadata::new("shop", "orders", "db1:27017", 1_700_000_000))
//!     .unwrap();
//! writer
//!     .write_batch(&[Document::from(b"{\"_id\":1}".as_slice())])
//!     .unwrap();
//! writer.finalize(&Metadata::default().with_document_count(1)).unwrap();
//! let bytes = writer.into_inner().unwrap().into_inner();
//!
//! let mut reader = ContainerReader::new(Cursor::new(bytes));
//! let metadata = reader.read_header().unwrap();
//! assert_eq!(metadata.collection, "orders");
//! assert_eq!(reader.read_batch(100).unwrap().len(), 1);
//! assert!(reader.read_batch(100).unwrap().is_empty());
//! ```

pub mod archive;
pub mod compression;
pub mod config;
pub mod format;
pub mod inspect;
pub mod metadata;
pub mod progress;
pub mod reader;
pub mod transfer;
pub mod writer;

// Re-export main types
pub use compression::{Compression, CompressionError};
pub use config::Config;
pub use format::{Document, FormatVersion, Limits, Stage, MARKER};
pub use inspect::{inspect, InspectReport};
pub use metadata::{Metadata, MetadataError};
pub use progress::Progress;
pub use reader::{ContainerReader, ReadError};
pub use transfer::{
    export_collection, import_collection, DocumentSink, DocumentSource, TransferError,
};
pub use writer::{ContainerWriter, WriteError, WriterOptions};
