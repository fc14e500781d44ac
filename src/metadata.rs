// SPDX-License-Identifier: MIT
//! Container metadata and its schemaless codec
//!
//! Metadata is stored as a MessagePack map keyed by field name rather than as
//! a fixed-offset struct. Readers recover the fields they recognize and fall
//! back to zero values for anything missing or mistyped, which is what lets
//! files written by older or newer builds open cleanly.

use std::collections::BTreeMap;

use rmpv::Value;
use tracing::warn;

/// Metadata keys as they appear in the encoded record
pub mod keys {
    pub const DATABASE: &str = "database";
    pub const COLLECTION: &str = "collection";
    pub const DOCUMENT_COUNT: &str = "documentCount";
    pub const TIMESTAMP: &str = "timestamp";
    pub const SOURCE: &str = "source";
    pub const ORIGINAL_SIZE: &str = "originalSize";
    pub const COMPRESSED_SIZE: &str = "compressedSize";
    pub const TOTAL_SIZE: &str = "totalSize";
    pub const PLATFORM: &str = "platform";
}

/// Errors from the metadata codec
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("failed to encode metadata: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode metadata: {0}")]
    Decode(#[from] rmpv::decode::Error),

    #[error("metadata is not a record: found {found}")]
    NotARecord { found: &'static str },
}

/// Provenance and size accounting for one container
///
/// `document_count` and the size fields are only authoritative once the
/// writer has finalized the container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub database: String,
    pub collection: String,
    pub document_count: i64,
    /// Export time, seconds since the Unix epoch
    pub timestamp: i64,
    /// Where the documents came from, e.g. `host:port`
    pub source: String,
    /// Uncompressed body bytes
    pub original_size: i64,
    /// Body bytes as stored on disk
    pub compressed_size: i64,
    /// Whole container bytes, header included
    pub total_size: i64,
    pub platform: Option<String>,
}

impl Metadata {
    /// Metadata carrying the identifying fields of an export
    pub fn new(
        database: impl Into<String>,
        collection: impl Into<String>,
        source: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            source: source.into(),
            timestamp,
            ..Default::default()
        }
    }

    pub fn with_document_count(mut self, document_count: i64) -> Self {
        self.document_count = document_count;
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// Encode into a self-describing binary blob
    pub fn encode(&self) -> Result<Vec<u8>, MetadataError> {
        self.to_record().to_vec()
    }

    /// Decode from a blob, tolerating missing and mistyped fields
    pub fn decode(blob: &[u8]) -> Result<Self, MetadataError> {
        let record = MetadataRecord::from_slice(blob)?;
        Ok(Self::from_record(&record))
    }

    /// Build the keyed record for this metadata
    pub fn to_record(&self) -> MetadataRecord {
        let mut record = MetadataRecord::new();
        record.insert(keys::DATABASE, Value::from(self.database.as_str()));
        record.insert(keys::COLLECTION, Value::from(self.collection.as_str()));
        record.insert(keys::DOCUMENT_COUNT, Value::from(self.document_count));
        record.insert(keys::TIMESTAMP, Value::from(self.timestamp));
        record.insert(keys::SOURCE, Value::from(self.source.as_str()));
        record.insert(keys::ORIGINAL_SIZE, Value::from(self.original_size));
        record.insert(keys::COMPRESSED_SIZE, Value::from(self.compressed_size));
        record.insert(keys::TOTAL_SIZE, Value::from(self.total_size));
        if let Some(platform) = &self.platform {
            record.insert(keys::PLATFORM, Value::from(platform.as_str()));
        }
        record
    }

    /// Recover metadata from a record, defaulting anything unusable
    pub fn from_record(record: &MetadataRecord) -> Self {
        let text = |key| record.get_str(key).unwrap_or_default().to_string();
        let count = |key| match record.get_i64(key) {
            Some(value) if value < 0 => {
                warn!(key, value, "negative metadata counter, treating as absent");
                0
            }
            Some(value) => value,
            None => 0,
        };

        Self {
            database: text(keys::DATABASE),
            collection: text(keys::COLLECTION),
            document_count: count(keys::DOCUMENT_COUNT),
            timestamp: record.get_i64(keys::TIMESTAMP).unwrap_or_default(),
            source: text(keys::SOURCE),
            original_size: count(keys::ORIGINAL_SIZE),
            compressed_size: count(keys::COMPRESSED_SIZE),
            total_size: count(keys::TOTAL_SIZE),
            platform: record.get_str(keys::PLATFORM).map(str::to_string),
        }
    }

    /// Platform tag for the running build, e.g. `x86_64-linux`
    pub fn current_platform() -> String {
        format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
    }
}

/// A flat, schemaless key/value record
///
/// Typed accessors return `None` both for missing keys and for keys holding
/// a value of another type; the latter is logged as a soft anomaly. Any
/// MessagePack value is accepted under any key, so binary and extension
/// values written by other tools do not fail the decode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRecord {
    fields: BTreeMap<String, Value>,
}

impl MetadataRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the first encoded value of `blob` as a record
    ///
    /// Bytes after the encoded map (padding) are ignored, as are entries
    /// whose key is not a UTF-8 string.
    pub fn from_slice(blob: &[u8]) -> Result<Self, MetadataError> {
        let mut input = blob;
        let entries = match rmpv::decode::read_value(&mut input)? {
            Value::Map(entries) => entries,
            other => {
                return Err(MetadataError::NotARecord {
                    found: type_name(&other),
                })
            }
        };

        let mut fields = BTreeMap::new();
        for (key, value) in entries {
            match key.as_str() {
                Some(key) => {
                    fields.insert(key.to_string(), value);
                }
                None => warn!(key = %key, "skipping metadata entry with non-string key"),
            }
        }
        Ok(Self { fields })
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, MetadataError> {
        let entries = self
            .fields
            .iter()
            .map(|(key, value)| (Value::from(key.as_str()), value.clone()))
            .collect::<Vec<_>>();
        Ok(rmp_serde::to_vec(&Value::Map(entries))?)
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        let value = self.fields.get(key)?;
        match value.as_str() {
            Some(s) => Some(s),
            None => {
                mistyped(key, "string", value);
                None
            }
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        let value = self.fields.get(key)?;
        match value.as_i64() {
            Some(n) => Some(n),
            None => {
                mistyped(key, "integer", value);
                None
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Nil => "nil",
        Value::Boolean(_) => "bool",
        Value::Integer(_) => "integer",
        Value::F32(_) | Value::F64(_) => "float",
        Value::String(s) if s.is_str() => "string",
        Value::String(_) => "invalid utf-8 string",
        Value::Binary(_) => "binary",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        Value::Ext(..) => "extension",
    }
}

fn mistyped(key: &str, expected: &str, found: &Value) {
    warn!(
        key,
        expected,
        found = type_name(found),
        "metadata field has unexpected type, treating as absent"
    );
}
