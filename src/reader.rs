// SPDX-License-Identifier: MIT
//! Container reader for MCBZ files
//!
//! Every length field in a container is treated as untrusted input. Declared
//! counts and sizes are checked against [`Limits`] before they influence an
//! allocation, and document payloads are pulled incrementally so a lying
//! length can never reserve more memory than the input actually holds.

use crate::compression::{read_full, BodyDecoder, CompressionError};
use crate::format::{
    is_marker, Document, FormatVersion, Limits, Stage, BATCH_COUNT_SIZE, DOCUMENT_LENGTH_SIZE,
    HEADER_PREFIX_SIZE, MARKER,
};
use crate::metadata::Metadata;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Take};
use std::path::Path;
use tracing::{debug, warn};

/// Errors that can occur during reading
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("Not an MCBZ container (found marker {found:02x?})")]
    Format { found: Vec<u8> },

    #[error("Unsupported format version {found} (supported: {supported:?})")]
    Version { found: u8, supported: Vec<u8> },

    #[error("Corrupt metadata: {reason}")]
    CorruptMetadata { reason: String },

    #[error("Input truncated at {stage}")]
    Truncated { stage: Stage },

    #[error("Oversize {field}: declared {declared}, limit {limit}")]
    Oversize {
        field: Stage,
        declared: u64,
        limit: u64,
    },

    #[error("Compressed stream error at {stage}: {source}")]
    CompressionStream {
        stage: Stage,
        #[source]
        source: CompressionError,
    },

    #[error("I/O error at {stage}: {source}")]
    Io {
        stage: Stage,
        #[source]
        source: io::Error,
    },

    #[error("Invalid reader state: {0}")]
    InvalidState(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl ReadError {
    /// The stage the error is attributed to, when it has one
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ReadError::Format { .. } | ReadError::Version { .. } => Some(Stage::Header),
            ReadError::CorruptMetadata { .. } => Some(Stage::Metadata),
            ReadError::Truncated { stage }
            | ReadError::CompressionStream { stage, .. }
            | ReadError::Io { stage, .. } => Some(*stage),
            ReadError::Oversize { field, .. } => Some(*field),
            ReadError::InvalidState(_) | ReadError::InvalidArgument(_) => None,
        }
    }
}

/// Map an I/O failure from the body stream to the reader taxonomy
fn classify(stage: Stage, compressed: bool, err: io::Error) -> ReadError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ReadError::Truncated { stage }
    } else if compressed {
        ReadError::CompressionStream {
            stage,
            source: CompressionError::Corrupted(err),
        }
    } else {
        ReadError::Io { stage, source: err }
    }
}

fn io_at(stage: Stage) -> impl FnOnce(io::Error) -> ReadError {
    move |source| ReadError::Io { stage, source }
}

enum ReaderState<R: Read> {
    Opened(R),
    Body(BodyDecoder<Take<R>>),
    Closed,
}

/// Streaming reader for one container
pub struct ContainerReader<R: Read + Seek = BufReader<File>> {
    state: ReaderState<R>,
    limits: Limits,
    version: Option<FormatVersion>,
    metadata: Option<Metadata>,
    /// Index of the on-disk batch currently being read
    batch_index: u64,
    /// Documents of the current on-disk batch not yet returned
    pending: u32,
    /// Documents of the current on-disk batch already returned
    read_in_batch: u64,
    documents_read: u64,
    exhausted: bool,
}

impl ContainerReader<BufReader<File>> {
    /// Open a container file; nothing is parsed yet
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ReadError> {
        let file = File::open(path.as_ref()).map_err(io_at(Stage::Header))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read + Seek> ContainerReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_limits(inner, Limits::default())
    }

    pub fn with_limits(inner: R, limits: Limits) -> Self {
        Self {
            state: ReaderState::Opened(inner),
            limits,
            version: None,
            metadata: None,
            batch_index: 0,
            pending: 0,
            read_in_batch: 0,
            documents_read: 0,
            exhausted: false,
        }
    }

    /// Validate the header and decode the metadata
    ///
    /// Checks run in order: marker, version, metadata length, metadata blob.
    /// On success the body stream is positioned right after the metadata
    /// region and, when the metadata carries final sizes, ends after
    /// `compressed_size` bytes.
    pub fn read_header(&mut self) -> Result<Metadata, ReadError> {
        let mut inner = match std::mem::replace(&mut self.state, ReaderState::Closed) {
            ReaderState::Opened(inner) => inner,
            ReaderState::Body(body) => {
                self.state = ReaderState::Body(body);
                return Err(ReadError::InvalidState("read_header called twice"));
            }
            ReaderState::Closed => return Err(ReadError::InvalidState("reader is closed")),
        };

        let start = inner.stream_position().map_err(io_at(Stage::Header))?;
        let end = inner.seek(SeekFrom::End(0)).map_err(io_at(Stage::Header))?;
        inner
            .seek(SeekFrom::Start(start))
            .map_err(io_at(Stage::Header))?;

        let mut marker = [0u8; 4];
        let n = read_full(&mut inner, &mut marker).map_err(io_at(Stage::Header))?;
        if !is_marker(&marker[..n]) {
            return Err(ReadError::Format {
                found: marker[..n].to_vec(),
            });
        }

        let mut version = [0u8; 1];
        if read_full(&mut inner, &mut version).map_err(io_at(Stage::Header))? == 0 {
            return Err(ReadError::Truncated {
                stage: Stage::Header,
            });
        }
        let version = FormatVersion::from_byte(version[0]).ok_or_else(|| ReadError::Version {
            found: version[0],
            supported: FormatVersion::supported_bytes(),
        })?;

        let mut prefix = [0u8; 4];
        if read_full(&mut inner, &mut prefix).map_err(io_at(Stage::Header))? < prefix.len() {
            return Err(ReadError::Truncated {
                stage: Stage::Header,
            });
        }
        let metadata_len = u32::from_le_bytes(prefix);
        if metadata_len > self.limits.max_metadata_size {
            return Err(ReadError::CorruptMetadata {
                reason: format!(
                    "metadata length {} exceeds ceiling {}",
                    metadata_len, self.limits.max_metadata_size
                ),
            });
        }
        let available = end.saturating_sub(start + HEADER_PREFIX_SIZE as u64);
        if metadata_len as u64 > available {
            return Err(ReadError::CorruptMetadata {
                reason: format!(
                    "metadata length {} exceeds remaining input {}",
                    metadata_len, available
                ),
            });
        }

        let mut region = vec![0u8; metadata_len as usize];
        if read_full(&mut inner, &mut region).map_err(io_at(Stage::Metadata))? < region.len() {
            return Err(ReadError::Truncated {
                stage: Stage::Metadata,
            });
        }
        let metadata = Metadata::decode(&region).map_err(|e| ReadError::CorruptMetadata {
            reason: e.to_string(),
        })?;

        // A finalized container records its body length; anything after it
        // is trailer data appended by the caller.
        let body_len = if metadata.total_size > 0 {
            metadata.compressed_size.max(0) as u64
        } else {
            u64::MAX
        };
        let body = BodyDecoder::open(inner.take(body_len), version.is_compressed())
            .map_err(|e| match e {
                CompressionError::EmptyStream => ReadError::Truncated { stage: Stage::Body },
                CompressionError::Io(source) => classify(Stage::Body, true, source),
                other => ReadError::CompressionStream {
                    stage: Stage::Body,
                    source: other,
                },
            })?;

        debug!(
            %version,
            metadata_len,
            database = %metadata.database,
            collection = %metadata.collection,
            "read container header"
        );

        self.state = ReaderState::Body(body);
        self.version = Some(version);
        self.metadata = Some(metadata.clone());
        Ok(metadata)
    }

    /// Read up to `max_size` documents
    ///
    /// An empty result means the body is exhausted. An on-disk batch larger
    /// than `max_size` is handed out across consecutive calls.
    pub fn read_batch(&mut self, max_size: usize) -> Result<Vec<Document>, ReadError> {
        if max_size == 0 {
            return Err(ReadError::InvalidArgument("max_size must be at least 1"));
        }
        let body = match &mut self.state {
            ReaderState::Body(body) => body,
            ReaderState::Opened(_) => {
                return Err(ReadError::InvalidState("read_batch called before read_header"))
            }
            ReaderState::Closed => return Err(ReadError::InvalidState("reader is closed")),
        };
        if self.exhausted {
            return Ok(Vec::new());
        }
        let compressed = body.is_compressed();

        // Empty on-disk batches carry nothing; skip to the next count prefix
        while self.pending == 0 {
            let stage = Stage::BatchCount {
                batch: self.batch_index,
            };
            let mut prefix = [0u8; BATCH_COUNT_SIZE];
            let n = read_full(&mut *body, &mut prefix).map_err(|e| classify(stage, compressed, e))?;
            if n == 0 {
                self.exhausted = true;
                return Ok(Vec::new());
            }
            if n < prefix.len() {
                return Err(ReadError::Truncated { stage });
            }

            let count = u32::from_le_bytes(prefix);
            if count > self.limits.max_batch_documents {
                return Err(ReadError::Oversize {
                    field: stage,
                    declared: count as u64,
                    limit: self.limits.max_batch_documents as u64,
                });
            }
            if count == 0 {
                self.batch_index += 1;
                continue;
            }
            self.pending = count;
            self.read_in_batch = 0;
        }

        let take = (self.pending as usize).min(max_size);
        let mut documents = Vec::with_capacity(take.min(1024));
        for _ in 0..take {
            let batch = self.batch_index;
            let document = self.read_in_batch;

            let stage = Stage::DocumentLength { batch, document };
            let mut prefix = [0u8; DOCUMENT_LENGTH_SIZE];
            let n = read_full(&mut *body, &mut prefix).map_err(|e| classify(stage, compressed, e))?;
            if n == 0 && self.read_in_batch > 0 {
                warn!(
                    batch,
                    declared = self.read_in_batch + self.pending as u64,
                    recovered = self.read_in_batch,
                    "input ends inside a batch, returning the documents read so far"
                );
                self.pending = 0;
                self.exhausted = true;
                return Ok(documents);
            }
            if n < prefix.len() {
                return Err(ReadError::Truncated { stage });
            }

            let len = u32::from_le_bytes(prefix);
            if len > self.limits.max_document_size {
                return Err(ReadError::Oversize {
                    field: stage,
                    declared: len as u64,
                    limit: self.limits.max_document_size as u64,
                });
            }

            let stage = Stage::DocumentBody { batch, document };
            let mut payload = Vec::new();
            let got = Read::take(&mut *body, len as u64)
                .read_to_end(&mut payload)
                .map_err(|e| classify(stage, compressed, e))?;
            if got < len as usize {
                return Err(ReadError::Truncated { stage });
            }

            documents.push(Document::new(payload));
            self.pending -= 1;
            self.read_in_batch += 1;
            self.documents_read += 1;
        }

        if self.pending == 0 {
            debug!(
                batch = self.batch_index,
                documents = self.read_in_batch,
                "read batch"
            );
            self.batch_index += 1;
        }
        Ok(documents)
    }

    /// Metadata decoded by [`read_header`](Self::read_header)
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn version(&self) -> Option<FormatVersion> {
        self.version
    }

    /// Total documents returned so far
    pub fn documents_read(&self) -> u64 {
        self.documents_read
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Release the source; safe to call more than once
    pub fn close(&mut self) {
        self.state = ReaderState::Closed;
    }
}

/// Cheap check whether `bytes` starts like a container
pub fn looks_like_container(bytes: &[u8]) -> bool {
    bytes.len() >= MARKER.len() && is_marker(&bytes[..MARKER.len()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn metadata_blob() -> Vec<u8> {
        Metadata::new("d", "c", "h:1", 1_700_000_000)
            .encode()
            .unwrap()
    }

    fn container(version: u8, body: &[u8]) -> Vec<u8> {
        let meta = metadata_blob();
        let mut out = Vec::new();
        out.extend_from_slice(MARKER);
        out.push(version);
        out.extend_from_slice(&(meta.len() as u32).to_le_bytes());
        out.extend_from_slice(&meta);
        out.extend_from_slice(body);
        out
    }

    fn batch(docs: &[&[u8]]) -> Vec<u8> {
        let mut out = (docs.len() as u32).to_le_bytes().to_vec();
        for doc in docs {
            out.extend_from_slice(&(doc.len() as u32).to_le_bytes());
            out.extend_from_slice(doc);
        }
        out
    }

    fn reader(bytes: Vec<u8>) -> ContainerReader<Cursor<Vec<u8>>> {
        ContainerReader::new(Cursor::new(bytes))
    }

    fn opened(bytes: Vec<u8>) -> ContainerReader<Cursor<Vec<u8>>> {
        let mut reader = reader(bytes);
        reader.read_header().unwrap();
        reader
    }

    #[test]
    fn test_read_plain_body() {
        let mut body = batch(&[b"one", b"two"]);
        body.extend(batch(&[b"three"]));
        let mut reader = opened(container(2, &body));

        assert_eq!(reader.metadata().unwrap().database, "d");
        assert_eq!(reader.version(), Some(FormatVersion::Plain));
        assert_eq!(reader.read_batch(10).unwrap().len(), 2);
        let last = reader.read_batch(10).unwrap();
        assert_eq!(last, vec![Document::from(b"three".as_slice())]);
        assert!(reader.read_batch(10).unwrap().is_empty());
        assert!(reader.is_exhausted());
        assert_eq!(reader.documents_read(), 3);
    }

    #[test]
    fn test_large_batch_split_across_calls() {
        let body = batch(&[b"a", b"b", b"c", b"d", b"e"]);
        let mut reader = opened(container(2, &body));

        let sizes: Vec<usize> = std::iter::from_fn(|| {
            let docs = reader.read_batch(2).unwrap();
            (!docs.is_empty()).then_some(docs.len())
        })
        .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_empty_batches_are_skipped() {
        let mut body = batch(&[]);
        body.extend(batch(&[b"x"]));
        body.extend(batch(&[]));
        let mut reader = opened(container(2, &body));
        assert_eq!(reader.read_batch(4).unwrap().len(), 1);
        assert!(reader.read_batch(4).unwrap().is_empty());
    }

    #[test]
    fn test_format_error() {
        let mut r = reader(b"NOPE\x02\x00\x00\x00\x00".to_vec());
        assert!(matches!(
            r.read_header(),
            Err(ReadError::Format { found }) if found == b"NOPE".to_vec()
        ));

        let mut r = reader(b"MC".to_vec());
        assert!(matches!(r.read_header(), Err(ReadError::Format { .. })));
    }

    #[test]
    fn test_version_error() {
        let mut bytes = container(2, &[]);
        bytes[4] = 7;
        let err = reader(bytes).read_header().unwrap_err();
        match err {
            ReadError::Version { found, supported } => {
                assert_eq!(found, 7);
                assert_eq!(supported, vec![1, 2]);
            }
            other => panic!("expected version error, got {other}"),
        }
    }

    #[test]
    fn test_header_cut_short() {
        let mut r = reader(b"MCBZ".to_vec());
        assert!(matches!(
            r.read_header(),
            Err(ReadError::Truncated {
                stage: Stage::Header
            })
        ));
        let mut r = reader(b"MCBZ\x02\x10\x00".to_vec());
        assert!(matches!(r.read_header(), Err(ReadError::Truncated { .. })));
    }

    #[test]
    fn test_metadata_length_above_ceiling() {
        let mut bytes = b"MCBZ\x02".to_vec();
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        let err = reader(bytes).read_header().unwrap_err();
        assert!(matches!(err, ReadError::CorruptMetadata { .. }));
        assert_eq!(err.stage(), Some(Stage::Metadata));
    }

    #[test]
    fn test_metadata_length_beyond_input() {
        let mut bytes = b"MCBZ\x02".to_vec();
        bytes.extend_from_slice(&4096u32.to_le_bytes());
        bytes.extend_from_slice(&metadata_blob());
        assert!(matches!(
            reader(bytes).read_header(),
            Err(ReadError::CorruptMetadata { .. })
        ));
    }

    #[test]
    fn test_undecodable_metadata() {
        let mut bytes = b"MCBZ\x02".to_vec();
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            reader(bytes).read_header(),
            Err(ReadError::CorruptMetadata { .. })
        ));
    }

    #[test]
    fn test_crafted_batch_count_is_oversize() {
        let body = u32::MAX.to_le_bytes();
        let mut reader = opened(container(2, &body));
        match reader.read_batch(100).unwrap_err() {
            ReadError::Oversize {
                field,
                declared,
                limit,
            } => {
                assert_eq!(field, Stage::BatchCount { batch: 0 });
                assert_eq!(declared, u32::MAX as u64);
                assert_eq!(limit, Limits::default().max_batch_documents as u64);
            }
            other => panic!("expected oversize, got {other}"),
        }
    }

    #[test]
    fn test_crafted_document_length_is_oversize() {
        let mut body = 1u32.to_le_bytes().to_vec();
        body.extend_from_slice(&u32::MAX.to_le_bytes());
        body.extend_from_slice(b"tiny");
        let mut reader = opened(container(2, &body));
        assert!(matches!(
            reader.read_batch(1),
            Err(ReadError::Oversize {
                field: Stage::DocumentLength {
                    batch: 0,
                    document: 0
                },
                ..
            })
        ));
    }

    #[test]
    fn test_custom_limits() {
        let limits = Limits {
            max_document_size: 2,
            ..Limits::default()
        };
        let body = batch(&[b"abc"]);
        let mut reader = ContainerReader::with_limits(Cursor::new(container(2, &body)), limits);
        reader.read_header().unwrap();
        assert!(matches!(
            reader.read_batch(1),
            Err(ReadError::Oversize { declared: 3, limit: 2, .. })
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let mut body = batch(&[b"complete"]);
        body.extend(batch(&[b"abcdef"]));
        body.truncate(body.len() - 3);
        let mut reader = opened(container(2, &body));
        assert_eq!(reader.read_batch(10).unwrap().len(), 1);
        assert!(matches!(
            reader.read_batch(10),
            Err(ReadError::Truncated {
                stage: Stage::DocumentBody {
                    batch: 1,
                    document: 0
                }
            })
        ));
    }

    #[test]
    fn test_partial_count_prefix_is_truncated() {
        let mut body = batch(&[b"x"]);
        body.extend_from_slice(&[1, 0]);
        let mut reader = opened(container(2, &body));
        reader.read_batch(10).unwrap();
        assert!(matches!(
            reader.read_batch(10),
            Err(ReadError::Truncated {
                stage: Stage::BatchCount { batch: 1 }
            })
        ));
    }

    #[test]
    fn test_eof_at_document_boundary_returns_partial_batch() {
        // declares three documents but only two are present
        let mut body = 3u32.to_le_bytes().to_vec();
        for doc in [b"aa", b"bb"] {
            body.extend_from_slice(&2u32.to_le_bytes());
            body.extend_from_slice(doc);
        }
        let mut reader = opened(container(2, &body));
        assert_eq!(reader.read_batch(10).unwrap().len(), 2);
        assert!(reader.is_exhausted());
        assert!(reader.read_batch(10).unwrap().is_empty());
    }

    #[test]
    fn test_eof_before_first_document_is_truncated() {
        let body = 2u32.to_le_bytes();
        let mut reader = opened(container(2, &body));
        assert!(matches!(
            reader.read_batch(10),
            Err(ReadError::Truncated {
                stage: Stage::DocumentLength {
                    batch: 0,
                    document: 0
                }
            })
        ));
    }

    #[test]
    fn test_compressed_version_over_plain_body() {
        let body = batch(&[b"not compressed"]);
        let err = reader(container(1, &body)).read_header().unwrap_err();
        assert!(matches!(
            err,
            ReadError::CompressionStream {
                stage: Stage::Body,
                source: CompressionError::InvalidSignature { .. }
            }
        ));
    }

    #[test]
    fn test_body_ends_at_recorded_size() {
        let body = batch(&[b"kept"]);
        let mut metadata = Metadata::new("d", "c", "h:1", 1);
        metadata.compressed_size = body.len() as i64;
        metadata.total_size = 1;
        let blob = metadata.encode().unwrap();

        let mut bytes = MARKER.to_vec();
        bytes.push(2);
        bytes.extend_from_slice(&(blob.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&blob);
        bytes.extend_from_slice(&body);
        bytes.extend_from_slice(&[0xff; 12]);

        let mut r = opened(bytes);
        assert_eq!(r.read_batch(10).unwrap(), vec![Document::from(&b"kept"[..])]);
        assert!(r.read_batch(10).unwrap().is_empty());
    }

    #[test]
    fn test_compressed_version_with_empty_body() {
        assert!(matches!(
            reader(container(1, &[])).read_header(),
            Err(ReadError::Truncated { stage: Stage::Body })
        ));
    }

    #[test]
    fn test_call_order_is_enforced() {
        let mut r = reader(container(2, &[]));
        assert!(matches!(r.read_batch(1), Err(ReadError::InvalidState(_))));
        r.read_header().unwrap();
        assert!(matches!(r.read_header(), Err(ReadError::InvalidState(_))));
        assert!(matches!(r.read_batch(0), Err(ReadError::InvalidArgument(_))));
        r.close();
        r.close();
        assert!(matches!(r.read_batch(1), Err(ReadError::InvalidState(_))));
    }

    #[test]
    fn test_looks_like_container() {
        assert!(looks_like_container(&container(2, &[])));
        assert!(!looks_like_container(b"MCB"));
        assert!(!looks_like_container(b"\x1f\x8b\x08\x00"));
    }
}
