// SPDX-License-Identifier: MIT
//! Human-readable inspection of a container file

use crate::format::{Document, FormatVersion};
use crate::metadata::Metadata;
use crate::progress::format_byte_size;
use crate::reader::{ContainerReader, ReadError};
use chrono::{DateTime, Utc};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

/// Documents read when validating
pub const VALIDATION_SAMPLE_SIZE: usize = 10;

const PREVIEW_LEN: usize = 60;

/// Everything `inspect` learned about a file
#[derive(Debug)]
pub struct InspectReport {
    pub path: PathBuf,
    pub file_size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub header: HeaderOutcome,
}

/// Result of reading the header
#[derive(Debug)]
pub enum HeaderOutcome {
    Valid {
        version: FormatVersion,
        metadata: Metadata,
        validation: Option<Validation>,
    },
    Invalid(ReadError),
}

/// Result of the sample read
#[derive(Debug)]
pub enum Validation {
    Passed { sample: Vec<Document> },
    Failed(ReadError),
}

impl InspectReport {
    pub fn is_valid(&self) -> bool {
        match &self.header {
            HeaderOutcome::Valid { validation, .. } => {
                !matches!(validation, Some(Validation::Failed(_)))
            }
            HeaderOutcome::Invalid(_) => false,
        }
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        match &self.header {
            HeaderOutcome::Valid { metadata, .. } => Some(metadata),
            HeaderOutcome::Invalid(_) => None,
        }
    }
}

/// Inspect the container at `path`
///
/// Only failing to open or stat the file is an error; header and sample
/// problems are recorded in the report.
pub fn inspect<P: AsRef<Path>>(path: P, validate: bool) -> io::Result<InspectReport> {
    let path = path.as_ref();
    let stat = std::fs::metadata(path)?;
    let modified = stat.modified().ok().map(DateTime::<Utc>::from);
    let file = File::open(path)?;

    let mut reader = ContainerReader::new(BufReader::new(file));
    let header = match reader.read_header() {
        Ok(metadata) => {
            let version = reader.version().unwrap_or(FormatVersion::Compressed);
            let validation = validate.then(|| match reader.read_batch(VALIDATION_SAMPLE_SIZE) {
                Ok(sample) => Validation::Passed { sample },
                Err(e) => Validation::Failed(e),
            });
            HeaderOutcome::Valid {
                version,
                metadata,
                validation,
            }
        }
        Err(e) => HeaderOutcome::Invalid(e),
    };
    reader.close();

    Ok(InspectReport {
        path: path.to_path_buf(),
        file_size: stat.len(),
        modified,
        header,
    })
}

fn render_time(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|t| t.to_rfc2822())
        .unwrap_or_else(|| format!("invalid timestamp {}", timestamp))
}

fn preview(doc: &Document) -> String {
    match std::str::from_utf8(doc.as_bytes()) {
        Ok(text) if text.chars().count() > PREVIEW_LEN => {
            let cut: String = text.chars().take(PREVIEW_LEN).collect();
            format!("{}...", cut)
        }
        Ok(text) => text.to_string(),
        Err(_) => format!("<{} binary bytes>", doc.len()),
    }
}

impl fmt::Display for InspectReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (version, metadata, validation) = match &self.header {
            HeaderOutcome::Valid {
                version,
                metadata,
                validation,
            } => (version, metadata, validation),
            HeaderOutcome::Invalid(e) => {
                writeln!(f, "=== File Header Error ===")?;
                writeln!(f, "File path: {}", self.path.display())?;
                return writeln!(f, "Error: {}", e);
            }
        };

        writeln!(f, "=== File Information ===")?;
        writeln!(f, "File path: {}", self.path.display())?;
        writeln!(
            f,
            "File size: {} ({} bytes)",
            format_byte_size(self.file_size as i64),
            self.file_size
        )?;
        if let Some(modified) = self.modified {
            writeln!(f, "File modified: {}", modified.to_rfc2822())?;
        }
        writeln!(f, "Format: {}", version)?;
        writeln!(f)?;

        writeln!(f, "=== Collection Information ===")?;
        writeln!(f, "Database: {}", metadata.database)?;
        writeln!(f, "Collection: {}", metadata.collection)?;
        writeln!(f, "Document count: {}", metadata.document_count)?;
        writeln!(f, "Source: {}", metadata.source)?;
        writeln!(f, "Export time: {}", render_time(metadata.timestamp))?;
        writeln!(f)?;

        writeln!(f, "=== Platform Information ===")?;
        writeln!(
            f,
            "Source platform: {}",
            metadata.platform.as_deref().unwrap_or("unknown")
        )?;
        writeln!(f, "Current platform: {}", Metadata::current_platform())?;
        writeln!(
            f,
            "Data size: {} ({} bytes)",
            format_byte_size(metadata.total_size),
            metadata.total_size
        )?;
        writeln!(
            f,
            "Body: {} uncompressed, {} stored",
            format_byte_size(metadata.original_size),
            format_byte_size(metadata.compressed_size)
        )?;

        match validation {
            None => {}
            Some(Validation::Passed { sample }) => {
                writeln!(f)?;
                writeln!(f, "=== Validation Results ===")?;
                writeln!(
                    f,
                    "Status: OK (Read {} sample documents successfully)",
                    sample.len()
                )?;
                if let Some(first) = sample.first() {
                    writeln!(f, "First document: {}", preview(first))?;
                }
            }
            Some(Validation::Failed(e)) => {
                writeln!(f)?;
                writeln!(f, "=== Validation Results ===")?;
                writeln!(f, "Status: FAILED")?;
                writeln!(f, "Error: {}", e)?;
            }
        }
        Ok(())
    }
}
