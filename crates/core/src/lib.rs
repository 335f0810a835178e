//! WordServe core — the pure algorithms behind the completion server.
//!
//! Three modules, leaves-first: [`codec`] translates the on-disk chunked
//! dictionary format, [`trie`] is the radix trie the loaded words live in,
//! and [`complete`] is the hot-path prefix completion engine that traverses
//! the trie. None of them own threads or policy; the `wordserve-server`
//! crate wires them to disk, config, and the wire protocol.

pub mod codec;
pub mod complete;
pub mod trie;

/// Frequency-ordering value derived from a stored 16-bit rank.
///
/// Higher is more frequent: `score = 65536 - rank`, so stored rank 1 (the
/// most frequent word) maps to 65535.
pub type Score = u32;

pub use codec::{score_from_rank, ChunkEntry, ChunkReader, ExpectedFormat, FormatError};
pub use complete::{CompleteError, Completer, EngineOptions, Suggestion};
pub use trie::Trie;
