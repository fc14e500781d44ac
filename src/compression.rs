// SPDX-License-Identifier: MIT
//! Streaming compression adapter for the container body
//!
//! The body is one continuous stream: either a single zstd stream or the raw
//! bytes. Both sides expose plain `Write`/`Read` so the batch codec does not
//! care which one is in use.

use crate::format::FormatVersion;
use std::io::{self, BufReader, Chain, Cursor, Read, Write};

/// zstd frame signature (0xFD2FB528, little-endian)
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Body compression choice for a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Pass-through
    None,
    /// zstd at the given level
    Zstd { level: i32 },
}

impl Compression {
    /// zstd at the library's default level
    pub fn zstd() -> Self {
        Compression::Zstd {
            level: zstd::DEFAULT_COMPRESSION_LEVEL,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Compression::None)
    }

    /// The format version that records this choice
    pub fn format_version(&self) -> FormatVersion {
        match self {
            Compression::None => FormatVersion::Plain,
            Compression::Zstd { .. } => FormatVersion::Compressed,
        }
    }
}

impl Default for Compression {
    fn default() -> Self {
        Self::zstd()
    }
}

/// Errors raised when opening or reading a compressed body
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("not valid compressed data: expected zstd signature {expected:02x?}, found {found:02x?}")]
    InvalidSignature { expected: [u8; 4], found: Vec<u8> },

    #[error("compressed stream is empty")]
    EmptyStream,

    #[error("compressed stream is corrupted: {0}")]
    Corrupted(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Write side of the adapter
pub enum BodyEncoder<W: Write> {
    Plain(W),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> BodyEncoder<W> {
    pub fn new(inner: W, compression: Compression) -> io::Result<Self> {
        match compression {
            Compression::None => Ok(BodyEncoder::Plain(inner)),
            Compression::Zstd { level } => {
                let encoder = zstd::stream::write::Encoder::new(inner, level)?;
                Ok(BodyEncoder::Zstd(encoder))
            }
        }
    }

    /// Flush everything still buffered, write the stream trailer and hand
    /// back the sink
    ///
    /// The compressed length of the body is only known after this returns.
    pub fn finish(self) -> io::Result<W> {
        match self {
            BodyEncoder::Plain(mut inner) => {
                inner.flush()?;
                Ok(inner)
            }
            BodyEncoder::Zstd(encoder) => {
                let mut inner = encoder.finish()?;
                inner.flush()?;
                Ok(inner)
            }
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, BodyEncoder::Zstd(_))
    }
}

impl<W: Write> Write for BodyEncoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            BodyEncoder::Plain(inner) => inner.write(buf),
            BodyEncoder::Zstd(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BodyEncoder::Plain(inner) => inner.flush(),
            BodyEncoder::Zstd(encoder) => encoder.flush(),
        }
    }
}

type ZstdSource<R> = BufReader<Chain<Cursor<[u8; 4]>, R>>;

/// Read side of the adapter
pub enum BodyDecoder<R: Read> {
    Plain(R),
    Zstd(zstd::stream::read::Decoder<'static, ZstdSource<R>>),
}

impl<R: Read> BodyDecoder<R> {
    /// Open a body stream
    ///
    /// For compressed bodies the frame signature is checked up front so that
    /// foreign data fails here with [`CompressionError::InvalidSignature`]
    /// instead of surfacing later as a generic read error.
    pub fn open(mut inner: R, compressed: bool) -> Result<Self, CompressionError> {
        if !compressed {
            return Ok(BodyDecoder::Plain(inner));
        }

        let mut signature = [0u8; 4];
        let n = read_full(&mut inner, &mut signature)?;
        if n == 0 {
            return Err(CompressionError::EmptyStream);
        }
        if n < signature.len() || signature != ZSTD_MAGIC {
            return Err(CompressionError::InvalidSignature {
                expected: ZSTD_MAGIC,
                found: signature[..n].to_vec(),
            });
        }

        // Put the signature back in front of the stream
        let source = Cursor::new(signature).chain(inner);
        let decoder = zstd::stream::read::Decoder::new(source)?;
        Ok(BodyDecoder::Zstd(decoder))
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, BodyDecoder::Zstd(_))
    }
}

impl<R: Read> Read for BodyDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BodyDecoder::Plain(inner) => inner.read(buf),
            BodyDecoder::Zstd(decoder) => decoder.read(buf),
        }
    }
}

/// Read until `buf` is full or the source reports end of input
///
/// Returns how many bytes were read. Unlike `read_exact`, a short count is
/// not an error, so callers can tell a clean end from a cut-off one.
pub fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
