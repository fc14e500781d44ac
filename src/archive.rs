// SPDX-License-Identifier: MIT
//! Whole-file gzip for moving finished containers around
//!
//! Independent of the container's own body compression: any file can be
//! wrapped, typically an uncompressed (v2) container.

use crate::progress::{format_byte_size, Progress};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Copy buffer size (4 MiB)
pub const COPY_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// gzip level used when none is given
pub const DEFAULT_GZIP_LEVEL: u32 = 6;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Errors from the gzip commands
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Invalid compression level: {0} (must be between 1-9)")]
    InvalidLevel(u32),

    #[error("Output file already exists: {}", .0.display())]
    OutputExists(PathBuf),

    #[error("Input file is not in gzip format: {}", .0.display())]
    NotGzip(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Byte counts for one compress or uncompress run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveStats {
    pub input_bytes: u64,
    pub output_bytes: u64,
}

impl ArchiveStats {
    /// input / output, e.g. 4.0 for a file shrunk to a quarter
    pub fn ratio(&self) -> f64 {
        if self.output_bytes == 0 {
            return 0.0;
        }
        self.input_bytes as f64 / self.output_bytes as f64
    }

    /// Size reduction in percent (negative when the output grew)
    pub fn reduction_percent(&self) -> f64 {
        if self.input_bytes == 0 {
            return 0.0;
        }
        (1.0 - self.output_bytes as f64 / self.input_bytes as f64) * 100.0
    }
}

/// `INPUT.gz`
pub fn default_compressed_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

/// `INPUT` without `.gz`, or `INPUT.uncompressed`
pub fn default_uncompressed_path(input: &Path) -> PathBuf {
    match input.extension() {
        Some(ext) if ext == "gz" => input.with_extension(""),
        _ => {
            let mut name = input.as_os_str().to_owned();
            name.push(".uncompressed");
            PathBuf::from(name)
        }
    }
}

/// Gzip `input` into a new file at `output`
pub fn compress_file(input: &Path, output: &Path, level: u32) -> Result<ArchiveStats, ArchiveError> {
    if !(1..=9).contains(&level) {
        return Err(ArchiveError::InvalidLevel(level));
    }
    let source = File::open(input)?;
    let input_bytes = source.metadata()?.len();
    let target = create_output(output)?;

    let mut progress = Progress::new("Compressing");
    progress.set_total(input_bytes);
    let copied = gzip(source, target, level, &mut progress);
    discard_on_error(output, copied)?;
    progress.finish();

    let stats = ArchiveStats {
        input_bytes,
        output_bytes: fs::metadata(output)?.len(),
    };
    info!(
        input = %input.display(),
        output = %output.display(),
        input_size = %format_byte_size(stats.input_bytes as i64),
        output_size = %format_byte_size(stats.output_bytes as i64),
        ratio = %format!("{:.2}:1 ({:.1}% reduction)", stats.ratio(), stats.reduction_percent()),
        "compression completed"
    );
    Ok(stats)
}

/// Gunzip `input` into a new file at `output`
pub fn uncompress_file(input: &Path, output: &Path) -> Result<ArchiveStats, ArchiveError> {
    let source = File::open(input)?;
    let input_bytes = source.metadata()?.len();

    let mut buffered = BufReader::with_capacity(COPY_BUFFER_SIZE, source);
    let head = buffered.fill_buf()?;
    if head.len() < GZIP_MAGIC.len() || head[..GZIP_MAGIC.len()] != GZIP_MAGIC {
        return Err(ArchiveError::NotGzip(input.to_path_buf()));
    }
    let target = create_output(output)?;

    let mut progress = Progress::new("Uncompressing");
    let copied = gunzip(buffered, target, &mut progress);
    discard_on_error(output, copied)?;
    progress.finish();

    let stats = ArchiveStats {
        input_bytes,
        output_bytes: fs::metadata(output)?.len(),
    };
    let expansion = if input_bytes == 0 {
        0.0
    } else {
        stats.output_bytes as f64 / input_bytes as f64
    };
    info!(
        input = %input.display(),
        output = %output.display(),
        input_size = %format_byte_size(stats.input_bytes as i64),
        output_size = %format_byte_size(stats.output_bytes as i64),
        expansion_ratio = %format!("{:.2}x", expansion),
        "uncompression completed"
    );
    Ok(stats)
}

/// Create `output` and its parent directory, refusing to overwrite
fn create_output(output: &Path) -> Result<File, ArchiveError> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(output)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => ArchiveError::OutputExists(output.to_path_buf()),
            _ => ArchiveError::Io(e),
        })
}

fn gzip(source: File, target: File, level: u32, progress: &mut Progress) -> io::Result<()> {
    let mut encoder = GzEncoder::new(BufWriter::new(target), flate2::Compression::new(level));
    copy_with_progress(&mut BufReader::new(source), &mut encoder, progress)?;
    encoder.finish()?.flush()
}

fn gunzip<R: Read>(source: R, target: File, progress: &mut Progress) -> io::Result<()> {
    let mut decoder = GzDecoder::new(source);
    let mut sink = BufWriter::new(target);
    copy_with_progress(&mut decoder, &mut sink, progress)?;
    sink.flush()
}

/// Remove a partially written `output` so a retry is not refused
fn discard_on_error(output: &Path, result: io::Result<()>) -> io::Result<()> {
    if let Err(e) = &result {
        warn!(output = %output.display(), error = %e, "removing partial output");
        if let Err(remove) = fs::remove_file(output) {
            warn!(output = %output.display(), error = %remove, "failed to remove partial output");
        }
    }
    result
}

fn copy_with_progress<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    progress: &mut Progress,
) -> io::Result<u64> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..n])?;
        total += n as u64;
        progress.set_current(total);
    }
    Ok(total)
}
