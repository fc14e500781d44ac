// SPDX-License-Identifier: MIT
//! Container writer for creating MCBZ files
//!
//! Writing is two-pass. `create` reserves a zero-filled header region and
//! body batches stream straight after it; `finalize` seeks back once the
//! totals are known and overwrites the placeholder with the real header and
//! metadata.

use crate::compression::{BodyEncoder, Compression};
use crate::format::{
    ContainerHeader, Document, FormatVersion, BATCH_COUNT_SIZE, DEFAULT_MAX_BATCH_DOCUMENTS,
    DEFAULT_MAX_DOCUMENT_SIZE, DEFAULT_METADATA_RESERVE, DOCUMENT_LENGTH_SIZE,
    HEADER_PREFIX_SIZE,
};
use crate::metadata::{Metadata, MetadataError};
use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Errors that can occur during writing
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Metadata needs {size} bytes but only {reserved} are reserved")]
    MetadataTooLarge { size: usize, reserved: u32 },

    #[error("Batch {batch} document {document} is {size} bytes, limit is {limit}")]
    Oversize {
        batch: u64,
        document: usize,
        size: usize,
        limit: u32,
    },

    #[error("Batch {batch} has {count} documents, limit is {limit}")]
    BatchTooLarge { batch: u64, count: usize, limit: u32 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Invalid writer state: {0}")]
    InvalidState(&'static str),
}

/// Writer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    pub compression: Compression,
    /// Bytes reserved for the metadata region
    pub metadata_reserve: u32,
    pub max_document_size: u32,
    pub max_batch_documents: u32,
}

impl WriterOptions {
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_metadata_reserve(mut self, reserve: u32) -> Self {
        self.metadata_reserve = reserve;
        self
    }
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            metadata_reserve: DEFAULT_METADATA_RESERVE,
            max_document_size: DEFAULT_MAX_DOCUMENT_SIZE,
            max_batch_documents: DEFAULT_MAX_BATCH_DOCUMENTS,
        }
    }
}

enum WriterState<W: Write> {
    Streaming(BodyEncoder<W>),
    Finalized(W),
    Closed,
}

/// Streaming writer for one container
///
/// Owns its sink exclusively until closed. Closing before
/// [`finalize`](ContainerWriter::finalize) leaves the zero-filled
/// placeholder in place, which is not a valid container.
pub struct ContainerWriter<W: Write + Seek = BufWriter<File>> {
    state: WriterState<W>,
    options: WriterOptions,
    version: FormatVersion,
    header_offset: u64,
    metadata: Metadata,
    batches_written: u64,
    documents_written: u64,
    body_bytes: u64,
}

impl ContainerWriter<BufWriter<File>> {
    /// Create a container file at `path`
    pub fn create<P: AsRef<Path>>(path: P, options: WriterOptions) -> Result<Self, WriteError> {
        let file = File::create(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "created container file");
        Self::new(BufWriter::new(file), options)
    }
}

impl<W: Write + Seek> ContainerWriter<W> {
    /// Start a container at the sink's current position
    pub fn new(mut inner: W, options: WriterOptions) -> Result<Self, WriteError> {
        let header_offset = inner.stream_position()?;

        // Placeholder for header prefix + metadata region
        let placeholder_len = HEADER_PREFIX_SIZE + options.metadata_reserve as usize;
        inner.write_all(&vec![0u8; placeholder_len])?;

        let encoder = BodyEncoder::new(inner, options.compression)
            .map_err(|e| WriteError::Compression(format!("encoder init failed: {}", e)))?;

        Ok(Self {
            state: WriterState::Streaming(encoder),
            options,
            version: options.compression.format_version(),
            header_offset,
            metadata: Metadata::default(),
            batches_written: 0,
            documents_written: 0,
            body_bytes: 0,
        })
    }

    /// Store the identifying fields used at finalize time
    ///
    /// Fails early if the metadata could not fit the reserved region even
    /// with worst-case counters.
    pub fn set_initial_metadata(&mut self, metadata: Metadata) -> Result<(), WriteError> {
        if matches!(self.state, WriterState::Closed) {
            return Err(WriteError::InvalidState("writer is closed"));
        }

        self.check_worst_case(&metadata)?;

        self.metadata = metadata;
        Ok(())
    }

    /// Append one batch of documents
    ///
    /// A failure partway through leaves earlier batches intact and the
    /// current one partially written; batches are not transactional.
    pub fn write_batch(&mut self, documents: &[Document]) -> Result<(), WriteError> {
        let batch = self.batches_written;
        let limit = self.options.max_document_size;
        if documents.len() > self.options.max_batch_documents as usize {
            return Err(WriteError::BatchTooLarge {
                batch,
                count: documents.len(),
                limit: self.options.max_batch_documents,
            });
        }
        if let Some((document, doc)) = documents
            .iter()
            .enumerate()
            .find(|(_, doc)| doc.len() > limit as usize)
        {
            return Err(WriteError::Oversize {
                batch,
                document,
                size: doc.len(),
                limit,
            });
        }

        let encoder = match &mut self.state {
            WriterState::Streaming(encoder) => encoder,
            WriterState::Finalized(_) => {
                return Err(WriteError::InvalidState("write_batch called after finalize"))
            }
            WriterState::Closed => return Err(WriteError::InvalidState("writer is closed")),
        };

        encoder.write_all(&(documents.len() as u32).to_le_bytes())?;
        let mut written = BATCH_COUNT_SIZE as u64;
        for doc in documents {
            encoder.write_all(&(doc.len() as u32).to_le_bytes())?;
            encoder.write_all(doc.as_bytes())?;
            written += (DOCUMENT_LENGTH_SIZE + doc.len()) as u64;
        }

        self.batches_written += 1;
        self.documents_written += documents.len() as u64;
        self.body_bytes += written;
        debug!(
            batch,
            documents = documents.len(),
            bytes = written,
            "wrote batch"
        );
        Ok(())
    }

    /// Seal the container with final totals
    ///
    /// The document count comes from `metadata`; identifying fields left
    /// empty there fall back to those given to
    /// [`set_initial_metadata`](Self::set_initial_metadata). Size accounting
    /// is computed by the writer. Returns the metadata as written.
    pub fn finalize(&mut self, metadata: &Metadata) -> Result<Metadata, WriteError> {
        match &self.state {
            WriterState::Streaming(_) => {}
            WriterState::Finalized(_) => {
                return Err(WriteError::InvalidState("finalize called twice"))
            }
            WriterState::Closed => return Err(WriteError::InvalidState("writer is closed")),
        }
        if metadata.document_count < 0 {
            return Err(WriteError::InvalidArgument("document count must not be negative"));
        }

        // Anything that can reject the metadata runs while the writer can
        // still be finalized again
        let merged = self.merged(metadata);
        self.check_worst_case(&merged)?;
        self.metadata = merged;

        let encoder = match std::mem::replace(&mut self.state, WriterState::Closed) {
            WriterState::Streaming(encoder) => encoder,
            other => {
                self.state = other;
                return Err(WriteError::InvalidState("writer is not streaming"));
            }
        };

        // The compressed length is only known once the stream is closed
        let mut inner = encoder
            .finish()
            .map_err(|e| WriteError::Compression(format!("failed to finish body stream: {}", e)))?;
        let end = inner.stream_position()?;
        let body_start = self.header_offset + self.header().body_offset();

        self.metadata.original_size = self.body_bytes as i64;
        self.metadata.compressed_size = end.saturating_sub(body_start) as i64;
        self.metadata.total_size = end.saturating_sub(self.header_offset) as i64;

        let blob = self.metadata.encode()?;
        self.check_fits(&blob)?;
        let mut region = blob;
        region.resize(self.options.metadata_reserve as usize, 0);

        inner.seek(SeekFrom::Start(self.header_offset))?;
        inner.write_all(&self.header().to_bytes())?;
        inner.write_all(&region)?;
        inner.flush()?;
        inner.seek(SeekFrom::Start(end))?;

        self.state = WriterState::Finalized(inner);
        info!(
            database = %self.metadata.database,
            collection = %self.metadata.collection,
            documents = self.metadata.document_count,
            original_size = self.metadata.original_size,
            compressed_size = self.metadata.compressed_size,
            "finalized container"
        );
        Ok(self.metadata.clone())
    }

    /// Release the sink; safe to call more than once
    pub fn close(&mut self) -> Result<(), WriteError> {
        match std::mem::replace(&mut self.state, WriterState::Closed) {
            WriterState::Streaming(_) => {
                warn!(
                    batches = self.batches_written,
                    "closing writer before finalize; the container header is a placeholder"
                );
                Ok(())
            }
            WriterState::Finalized(mut inner) => {
                inner.flush()?;
                Ok(())
            }
            WriterState::Closed => Ok(()),
        }
    }

    /// Take the sink back after finalize
    pub fn into_inner(self) -> Result<W, WriteError> {
        match self.state {
            WriterState::Finalized(inner) => Ok(inner),
            WriterState::Streaming(_) => Err(WriteError::InvalidState("container not finalized")),
            WriterState::Closed => Err(WriteError::InvalidState("writer is closed")),
        }
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.state, WriterState::Finalized(_))
    }

    pub fn version(&self) -> FormatVersion {
        self.version
    }

    /// Documents written so far
    pub fn documents_written(&self) -> u64 {
        self.documents_written
    }

    /// Uncompressed body bytes written so far
    pub fn body_bytes(&self) -> u64 {
        self.body_bytes
    }

    /// Metadata as currently held (provisional until finalize)
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn header(&self) -> ContainerHeader {
        ContainerHeader::new(self.version, self.options.metadata_reserve)
    }

    fn check_fits(&self, blob: &[u8]) -> Result<(), WriteError> {
        if blob.len() > self.options.metadata_reserve as usize {
            return Err(WriteError::MetadataTooLarge {
                size: blob.len(),
                reserved: self.options.metadata_reserve,
            });
        }
        Ok(())
    }

    /// Fail if `metadata` could not fit the reserved region even with
    /// worst-case counters
    fn check_worst_case(&self, metadata: &Metadata) -> Result<(), WriteError> {
        let worst_case = Metadata {
            document_count: i64::MAX,
            original_size: i64::MAX,
            compressed_size: i64::MAX,
            total_size: i64::MAX,
            timestamp: i64::MIN,
            platform: Some(
                metadata
                    .platform
                    .clone()
                    .unwrap_or_else(Metadata::current_platform),
            ),
            ..metadata.clone()
        };
        self.check_fits(&worst_case.encode()?)
    }

    /// Stored metadata with the final count and any identifying fields the
    /// caller set at finalize time
    fn merged(&self, metadata: &Metadata) -> Metadata {
        if metadata.document_count != self.documents_written as i64 {
            warn!(
                reported = metadata.document_count,
                written = self.documents_written,
                "final document count differs from documents written"
            );
        }
        let mut merged = self.metadata.clone();
        merged.document_count = metadata.document_count;

        for (target, value) in [
            (&mut merged.database, &metadata.database),
            (&mut merged.collection, &metadata.collection),
            (&mut merged.source, &metadata.source),
        ] {
            if !value.is_empty() {
                target.clone_from(value);
            }
        }
        if metadata.timestamp != 0 {
            merged.timestamp = metadata.timestamp;
        }
        if metadata.platform.is_some() {
            merged.platform.clone_from(&metadata.platform);
        }
        if merged.platform.is_none() {
            merged.platform = Some(Metadata::current_platform());
        }
        merged
    }
}
