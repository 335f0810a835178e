//! Chunk file codec — the on-disk dictionary format.
//!
//! A chunk (`dict_NNNN.bin`) is a 4-byte little-endian entry count followed
//! by that many `(u16 length, word bytes, u16 rank)` records. No magic
//! number, no padding; the format is detected by filename pattern and header
//! plausibility. Records appear in ascending-rank order on disk, but nothing
//! here relies on that.

use crate::Score;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Size of the entry-count header in bytes.
pub const HEADER_LEN: u64 = 4;

/// Derive the frequency score from a stored rank. Stored rank 0 is reserved;
/// the decoder treats it as rank 1 (most frequent) rather than overflowing
/// the score band.
pub fn score_from_rank(rank: u16) -> Score {
    65536 - u32::from(rank.max(1))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("{}: file too small ({len} bytes)", .path.display())]
    TooSmall { path: PathBuf, len: u64 },

    #[error("{}: expected a `.{expected}` file", .path.display())]
    WrongExtension { path: PathBuf, expected: &'static str },

    #[error("{}: could not read entry-count header", .path.display())]
    HeaderUnreadable { path: PathBuf, source: io::Error },

    #[error("entry count {count} has the sign bit set")]
    CountNegative { count: u32 },

    #[error("entry count {count} exceeds validation limit {limit}")]
    CountTooLarge { count: u32, limit: u32 },

    #[error("read error")]
    Read(#[from] io::Error),

    #[error("truncated record {index} of {total}")]
    TruncatedRecord { index: u32, total: u32 },

    #[error("zero-length word at record {index}")]
    LengthZero { index: u32 },
}

/// What [`validate`] should expect at the given path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedFormat {
    /// Binary chunk file (`.bin`): count header plus records.
    Binary,
    /// Plain word list (`.txt`), one word per line.
    PlainText,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Cheap sanity checks before a file is handed to [`ChunkReader`]: existence,
/// minimum size, extension, and (for binary) a plausible count header.
pub fn validate(path: &Path, format: ExpectedFormat, max_count: u32) -> Result<(), FormatError> {
    let meta = std::fs::metadata(path).map_err(|_| FormatError::NotFound(path.to_path_buf()))?;

    let (min_len, ext) = match format {
        ExpectedFormat::Binary => (HEADER_LEN, "bin"),
        ExpectedFormat::PlainText => (1, "txt"),
    };
    if meta.len() < min_len {
        return Err(FormatError::TooSmall { path: path.to_path_buf(), len: meta.len() });
    }
    if path.extension().and_then(|e| e.to_str()) != Some(ext) {
        return Err(FormatError::WrongExtension { path: path.to_path_buf(), expected: ext });
    }

    if format == ExpectedFormat::Binary {
        let count = read_entry_count(path)?;
        check_count(count, max_count)?;
    }
    Ok(())
}

/// Read only the 4-byte count header of a chunk file.
pub fn read_entry_count(path: &Path) -> Result<u32, FormatError> {
    let mut file = File::open(path)
        .map_err(|e| FormatError::HeaderUnreadable { path: path.to_path_buf(), source: e })?;
    let mut header = [0u8; 4];
    file.read_exact(&mut header)
        .map_err(|e| FormatError::HeaderUnreadable { path: path.to_path_buf(), source: e })?;
    Ok(u32::from_le_bytes(header))
}

fn check_count(count: u32, max_count: u32) -> Result<(), FormatError> {
    // The header is signed in the original pipeline's writer; a set sign bit
    // means garbage, not a very large dictionary.
    if count > i32::MAX as u32 {
        return Err(FormatError::CountNegative { count });
    }
    if count > max_count {
        return Err(FormatError::CountTooLarge { count, limit: max_count });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// A single `(word, stored rank)` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEntry {
    pub word: Vec<u8>,
    pub rank: u16,
}

/// Lazy record iterator over an open chunk file.
///
/// Yields exactly `entry_count()` records and then `None`; a short file
/// produces one `TruncatedRecord` error and the iterator fuses.
pub struct ChunkReader {
    inner: BufReader<File>,
    total: u32,
    next_index: u32,
}

impl ChunkReader {
    pub fn open(path: &Path, max_count: u32) -> Result<Self, FormatError> {
        let file = File::open(path)
            .map_err(|e| FormatError::HeaderUnreadable { path: path.to_path_buf(), source: e })?;
        let mut inner = BufReader::new(file);
        let mut header = [0u8; 4];
        inner
            .read_exact(&mut header)
            .map_err(|e| FormatError::HeaderUnreadable { path: path.to_path_buf(), source: e })?;
        let total = u32::from_le_bytes(header);
        check_count(total, max_count)?;
        Ok(ChunkReader { inner, total, next_index: 0 })
    }

    /// Entry count declared by the header.
    pub fn entry_count(&self) -> u32 {
        self.total
    }

    fn read_record(&mut self) -> Result<ChunkEntry, FormatError> {
        let index = self.next_index;
        let len = u16::from_le_bytes(self.read_array::<2>(index)?);
        if len == 0 {
            return Err(FormatError::LengthZero { index });
        }
        let mut word = vec![0u8; len as usize];
        self.inner.read_exact(&mut word).map_err(|e| self.eof_as_truncation(e, index))?;
        let rank = u16::from_le_bytes(self.read_array::<2>(index)?);
        Ok(ChunkEntry { word, rank })
    }

    fn read_array<const N: usize>(&mut self, index: u32) -> Result<[u8; N], FormatError> {
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf).map_err(|e| self.eof_as_truncation(e, index))?;
        Ok(buf)
    }

    fn eof_as_truncation(&self, e: io::Error, index: u32) -> FormatError {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FormatError::TruncatedRecord { index, total: self.total }
        } else {
            FormatError::Read(e)
        }
    }
}

impl Iterator for ChunkReader {
    type Item = Result<ChunkEntry, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.total {
            return None;
        }
        let record = self.read_record();
        if record.is_err() {
            // Fuse: one error ends the stream.
            self.next_index = self.total;
        } else {
            self.next_index += 1;
        }
        Some(record)
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write a chunk file from `(word, rank)` records — the exact inverse of
/// [`ChunkReader`]. Used by the offline corpus pipeline and by tests.
pub fn write_entries<W>(path: &Path, entries: &[(W, u16)]) -> Result<(), FormatError>
where
    W: AsRef<[u8]>,
{
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&(entries.len() as u32).to_le_bytes())?;
    for (index, (word, rank)) in entries.iter().enumerate() {
        let word = word.as_ref();
        if word.is_empty() {
            return Err(FormatError::LengthZero { index: index as u32 });
        }
        out.write_all(&(word.len() as u16).to_le_bytes())?;
        out.write_all(word)?;
        out.write_all(&rank.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
