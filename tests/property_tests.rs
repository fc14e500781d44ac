// SPDX-License-Identifier: MIT
//! Property-based tests using proptest
//!
//! Random batches and random corruption: whatever the input, reading must
//! either reproduce what was written or fail with a typed error.

use proptest::prelude::*;
use std::io::Cursor;

use mcbz::format::HEADER_PREFIX_SIZE;
use mcbz::{
    Compression, ContainerReader, ContainerWriter, Document, Metadata, ReadError, WriterOptions,
};

const RESERVE: u32 = 512;

/// Strategy for generating batches of small documents
fn batches_strategy() -> impl Strategy<Value = Vec<Vec<Vec<u8>>>> {
    prop::collection::vec(
        prop::collection::vec(prop::collection::vec(any::<u8>(), 0..48), 0..6),
        0..6,
    )
}

fn compression_strategy() -> impl Strategy<Value = Compression> {
    prop_oneof![
        Just(Compression::None),
        (1..=9i32).prop_map(|level| Compression::Zstd { level }),
    ]
}

fn to_docs(batch: &[Vec<u8>]) -> Vec<Document> {
    batch.iter().cloned().map(Document::from).collect()
}

fn write(batches: &[Vec<Vec<u8>>], compression: Compression) -> Vec<u8> {
    let options = WriterOptions::default()
        .with_compression(compression)
        .with_metadata_reserve(RESERVE);
    let mut writer = ContainerWriter::new(Cursor::new(Vec::new()), options).unwrap();
    writer
        .set_initial_metadata(Metadata::new("db", "coll", "host:1", 42))
        .unwrap();
    let mut count = 0;
    for batch in batches {
        writer.write_batch(&to_docs(batch)).unwrap();
        count += batch.len();
    }
    writer
        .finalize(&Metadata::default().with_document_count(count as i64))
        .unwrap();
    writer.into_inner().unwrap().into_inner()
}

/// Read every document; on error return what was read before it
fn drain(bytes: Vec<u8>, max_size: usize) -> Result<Vec<Document>, (Vec<Document>, ReadError)> {
    let mut reader = ContainerReader::new(Cursor::new(bytes));
    if let Err(e) = reader.read_header() {
        return Err((Vec::new(), e));
    }
    let mut docs = Vec::new();
    loop {
        match reader.read_batch(max_size) {
            Ok(batch) if batch.is_empty() => return Ok(docs),
            Ok(batch) => docs.extend(batch),
            Err(e) => return Err((docs, e)),
        }
    }
}

proptest! {
    /// Everything written comes back unchanged and in order
    #[test]
    fn round_trip_preserves_documents(
        batches in batches_strategy(),
        compression in compression_strategy(),
        max_size in 1..10usize,
    ) {
        let bytes = write(&batches, compression);
        let expected: Vec<Document> = batches.iter().flat_map(|b| to_docs(b)).collect();

        let mut reader = ContainerReader::new(Cursor::new(bytes.clone()));
        let metadata = reader.read_header().unwrap();
        prop_assert_eq!(metadata.document_count as usize, expected.len());
        prop_assert_eq!(metadata.total_size as usize, bytes.len());

        let read = drain(bytes, max_size);
        prop_assert!(read.is_ok(), "valid container failed to read");
        prop_assert_eq!(read.unwrap(), expected);
    }

    /// Cutting a plain body anywhere yields a prefix of the documents, and
    /// any error is a truncation error
    #[test]
    fn truncated_plain_body_yields_prefix(
        batches in batches_strategy(),
        cut in any::<prop::sample::Index>(),
    ) {
        let bytes = write(&batches, Compression::None);
        let body_start = HEADER_PREFIX_SIZE + RESERVE as usize;
        let cut = body_start + cut.index(bytes.len() - body_start + 1);
        let expected: Vec<Document> = batches.iter().flat_map(|b| to_docs(b)).collect();

        let docs = match drain(bytes[..cut].to_vec(), 4) {
            Ok(docs) => docs,
            Err((docs, e)) => {
                prop_assert!(matches!(e, ReadError::Truncated { .. }), "unexpected error {}", e);
                docs
            }
        };
        prop_assert!(docs.len() <= expected.len());
        prop_assert_eq!(&docs[..], &expected[..docs.len()]);
    }

    /// Cuts exactly at a batch boundary are not errors
    #[test]
    fn truncation_at_batch_boundary_is_clean(
        batches in batches_strategy(),
        keep in any::<prop::sample::Index>(),
    ) {
        let bytes = write(&batches, Compression::None);
        let keep = keep.index(batches.len() + 1);
        let kept_len: usize = batches[..keep]
            .iter()
            .map(|b| 4 + b.iter().map(|d| 4 + d.len()).sum::<usize>())
            .sum();
        let cut = HEADER_PREFIX_SIZE + RESERVE as usize + kept_len;
        let expected: Vec<Document> = batches[..keep].iter().flat_map(|b| to_docs(b)).collect();

        let read = drain(bytes[..cut].to_vec(), 3);
        prop_assert!(read.is_ok());
        prop_assert_eq!(read.unwrap(), expected);
    }

    /// Any byte flip or cut anywhere in the file must not panic
    #[test]
    fn arbitrary_damage_never_panics(
        batches in batches_strategy(),
        compression in compression_strategy(),
        flip in any::<prop::sample::Index>(),
        mask in 1..=255u8,
        cut in any::<prop::sample::Index>(),
    ) {
        let mut bytes = write(&batches, compression);
        let at = flip.index(bytes.len());
        bytes[at] ^= mask;
        let cut = cut.index(bytes.len() + 1);
        bytes.truncate(cut);
        let _ = drain(bytes, 5);
    }

    /// Metadata decoding of arbitrary bytes never panics
    #[test]
    fn metadata_decode_never_panics(blob in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = Metadata::decode(&blob);
    }

    /// Metadata survives encoding with arbitrary field values
    #[test]
    fn metadata_encode_decode(
        database in "[a-z]{0,32}",
        collection in "[a-zA-Z0-9_.]{0,32}",
        count in 0..i64::MAX,
        timestamp in any::<i64>(),
    ) {
        let metadata = Metadata::new(database, collection, "h:1", timestamp)
            .with_document_count(count)
            .with_platform("x86_64-linux");
        let decoded = Metadata::decode(&metadata.encode().unwrap()).unwrap();
        prop_assert_eq!(decoded, metadata);
    }
}
