// SPDX-License-Identifier: MIT
//! Moving documents between a collection and a container
//!
//! The database side is abstracted as a [`DocumentSource`] for export and a
//! [`DocumentSink`] for import. Line-delimited and in-memory implementations
//! are provided.

use crate::format::Document;
use crate::progress::Progress;
use crate::reader::{ContainerReader, ReadError};
use crate::writer::{ContainerWriter, WriteError};
use std::collections::VecDeque;
use std::io::{self, BufRead, Read, Seek, Write};
use tracing::{debug, info};

/// Errors raised while transferring documents
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Container write failed: {0}")]
    Write(#[from] WriteError),

    #[error("Container read failed: {0}")]
    Read(#[from] ReadError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Document {index} contains a line break and cannot be written as a line")]
    EmbeddedNewline { index: u64 },

    #[error("Batch size must be at least 1")]
    InvalidBatchSize,
}

/// Where exported documents come from
pub trait DocumentSource {
    /// Next batch of at most `max` documents; empty once exhausted
    fn next_batch(&mut self, max: usize) -> Result<Vec<Document>, TransferError>;
}

/// Where imported documents go
pub trait DocumentSink {
    fn insert_batch(&mut self, documents: Vec<Document>) -> Result<(), TransferError>;

    /// Called once after the last batch
    fn flush(&mut self) -> Result<(), TransferError> {
        Ok(())
    }
}

/// Copy every document from `source` into `writer`
///
/// Does not finalize the writer. Returns the number of documents written.
pub fn export_collection<S, W>(
    source: &mut S,
    writer: &mut ContainerWriter<W>,
    batch_size: usize,
    progress: &mut Progress,
) -> Result<u64, TransferError>
where
    S: DocumentSource + ?Sized,
    W: Write + Seek,
{
    if batch_size == 0 {
        return Err(TransferError::InvalidBatchSize);
    }

    let mut count = 0u64;
    loop {
        let batch = source.next_batch(batch_size)?;
        if batch.is_empty() {
            break;
        }
        writer.write_batch(&batch)?;
        count += batch.len() as u64;
        progress.add(batch.len() as u64);
    }

    progress.finish();
    info!(documents = count, "export complete");
    Ok(count)
}

/// Copy every remaining document from `reader` into `sink`
///
/// The header must already have been read. Its document count, when set,
/// becomes the progress total.
pub fn import_collection<R, K>(
    reader: &mut ContainerReader<R>,
    sink: &mut K,
    batch_size: usize,
    progress: &mut Progress,
) -> Result<u64, TransferError>
where
    R: Read + Seek,
    K: DocumentSink + ?Sized,
{
    if batch_size == 0 {
        return Err(TransferError::InvalidBatchSize);
    }
    if let Some(metadata) = reader.metadata() {
        progress.set_total(metadata.document_count.max(0) as u64);
    }

    let mut count = 0u64;
    loop {
        let batch = reader.read_batch(batch_size)?;
        if batch.is_empty() {
            break;
        }
        let n = batch.len() as u64;
        sink.insert_batch(batch)?;
        count += n;
        progress.add(n);
    }
    sink.flush()?;

    progress.finish();
    info!(documents = count, "import complete");
    Ok(count)
}

/// Newline-delimited documents from any buffered reader
///
/// Each non-empty line is one document; `\n` and `\r\n` terminators are
/// stripped.
pub struct LineSource<R: BufRead> {
    inner: R,
    lines_read: u64,
}

impl<R: BufRead> LineSource<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            lines_read: 0,
        }
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }
}

impl<R: BufRead> DocumentSource for LineSource<R> {
    fn next_batch(&mut self, max: usize) -> Result<Vec<Document>, TransferError> {
        let mut batch = Vec::with_capacity(max.min(1024));
        let mut line = Vec::new();
        while batch.len() < max {
            line.clear();
            if self.inner.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            self.lines_read += 1;
            if line.last() == Some(&b'\n') {
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
            }
            if line.is_empty() {
                continue;
            }
            batch.push(Document::from(line.as_slice()));
        }
        debug!(documents = batch.len(), "read line batch");
        Ok(batch)
    }
}

/// Writes each document as one line
pub struct LineSink<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> LineSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> DocumentSink for LineSink<W> {
    fn insert_batch(&mut self, documents: Vec<Document>) -> Result<(), TransferError> {
        for doc in &documents {
            if doc.as_bytes().contains(&b'\n') {
                return Err(TransferError::EmbeddedNewline {
                    index: self.written,
                });
            }
            self.inner.write_all(doc.as_bytes())?;
            self.inner.write_all(b"\n")?;
            self.written += 1;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransferError> {
        self.inner.flush()?;
        Ok(())
    }
}

/// In-memory source handing out documents in order
#[derive(Debug, Default)]
pub struct VecSource {
    documents: VecDeque<Document>,
}

impl VecSource {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents: documents.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.documents.len()
    }
}

impl DocumentSource for VecSource {
    fn next_batch(&mut self, max: usize) -> Result<Vec<Document>, TransferError> {
        let n = max.min(self.documents.len());
        Ok(self.documents.drain(..n).collect())
    }
}

/// In-memory sink that records batch boundaries
#[derive(Debug, Default)]
pub struct VecSink {
    pub documents: Vec<Document>,
    pub batches: usize,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentSink for VecSink {
    fn insert_batch(&mut self, documents: Vec<Document>) -> Result<(), TransferError> {
        self.batches += 1;
        self.documents.extend(documents);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::Compression;
    use crate::metadata::Metadata;
    use crate::writer::WriterOptions;
    use std::io::Cursor;

    fn docs(n: usize) -> Vec<Document> {
        (0..n)
            .map(|i| Document::new(format!("{{\"_id\":{}}}", i).into_bytes()))
            .collect()
    }

    #[test]
    fn test_export_then_import() {
        let options = WriterOptions::default().with_compression(Compression::zstd());
        let mut writer = ContainerWriter::new(Cursor::new(Vec::new()), options).unwrap();
        let mut source = VecSource::new(docs(25));
        let exported =
            export_collection(&mut source, &mut writer, 10, &mut Progress::new("Exporting"))
                .unwrap();
        assert_eq!(exported, 25);
        writer
            .finalize(&Metadata::new("d", "c", "h:1", 0).with_document_count(exported as i64))
            .unwrap();
        let bytes = writer.into_inner().unwrap().into_inner();

        let mut reader = ContainerReader::new(Cursor::new(bytes));
        reader.read_header().unwrap();
        let mut sink = VecSink::new();
        let imported =
            import_collection(&mut reader, &mut sink, 7, &mut Progress::new("Importing"))
                .unwrap();
        assert_eq!(imported, 25);
        assert_eq!(sink.documents, docs(25));
        // on-disk batches of 10, 10, 5 come back as 7+3, 7+3, 5
        assert_eq!(sink.batches, 5);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut writer =
            ContainerWriter::new(Cursor::new(Vec::new()), WriterOptions::default()).unwrap();
        assert!(matches!(
            export_collection(
                &mut VecSource::default(),
                &mut writer,
                0,
                &mut Progress::new("Exporting")
            ),
            Err(TransferError::InvalidBatchSize)
        ));
    }

    #[test]
    fn test_line_source_splits_and_skips_blank_lines() {
        let input = b"{\"a\":1}\r\n\n{\"b\":2}\n{\"c\":3}".to_vec();
        let mut source = LineSource::new(Cursor::new(input));
        let first = source.next_batch(2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].as_bytes(), b"{\"a\":1}");
        assert_eq!(first[1].as_bytes(), b"{\"b\":2}");
        let second = source.next_batch(2).unwrap();
        assert_eq!(second[0].as_bytes(), b"{\"c\":3}");
        assert!(source.next_batch(2).unwrap().is_empty());
        assert_eq!(source.lines_read(), 4);
    }

    #[test]
    fn test_line_sink() {
        let mut sink = LineSink::new(Vec::new());
        sink.insert_batch(vec![Document::from(b"x".as_slice()), Document::from(b"yz".as_slice())])
            .unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.written(), 2);
        assert_eq!(sink.into_inner(), b"x\nyz\n".to_vec());
    }

    #[test]
    fn test_line_sink_rejects_embedded_newline() {
        let mut sink = LineSink::new(Vec::new());
        let err = sink
            .insert_batch(vec![Document::from(b"a\nb".as_slice())])
            .unwrap_err();
        assert!(matches!(err, TransferError::EmbeddedNewline { index: 0 }));
    }

    #[test]
    fn test_vec_source_drains_in_order() {
        let mut source = VecSource::new(docs(3));
        assert_eq!(source.next_batch(2).unwrap(), docs(2));
        assert_eq!(source.remaining(), 1);
        assert_eq!(source.next_batch(2).unwrap().len(), 1);
        assert!(source.next_batch(2).unwrap().is_empty());
    }
}
