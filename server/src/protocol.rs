//! Wire protocol — self-delimiting MessagePack maps over a byte stream.
//!
//! One request map in, one response map out. Field keys are the short
//! literals editors already speak (`p`, `l`, `s`, `w`, `r`, `c`, `t`), so
//! structs here serialize as named maps rather than rmp-serde's default
//! tuple encoding.

use serde::{Deserialize, Serialize};
use std::io::Read;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A decoded request map before routing. Every field is optional; the
/// routing rules in [`RawRequest::classify`] decide what the message means.
/// Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRequest {
    pub id: Option<String>,
    /// Dictionary-admin action name.
    pub action: Option<String>,
    pub chunk_count: Option<u32>,
    /// Legacy admin spelling: a bare `dictionary_size` means `set_size`.
    pub dictionary_size: Option<u32>,
    /// Legacy admin spelling: presence means `get_chunk_count`.
    pub get_chunk_count: Option<bool>,
    /// Completion prefix.
    pub p: Option<String>,
    /// Completion limit; 0 or absent means the server default.
    pub l: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAction {
    GetInfo,
    SetSize { chunk_count: Option<u32> },
    GetOptions,
    GetChunkCount,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Completion { id: String, prefix: String, limit: usize },
    Admin { id: String, action: AdminAction },
}

impl RawRequest {
    /// Apply the routing rules, in order: an `action` string makes this a
    /// dictionary-admin request; else the legacy `dictionary_size` /
    /// `get_chunk_count` fields do; anything else is a completion request.
    pub fn classify(self) -> Request {
        let id = self.id.unwrap_or_default();
        if let Some(action) = self.action {
            let action = match action.as_str() {
                "get_info" => AdminAction::GetInfo,
                "set_size" => AdminAction::SetSize {
                    chunk_count: self.chunk_count.or(self.dictionary_size),
                },
                "get_options" => AdminAction::GetOptions,
                "get_chunk_count" => AdminAction::GetChunkCount,
                _ => AdminAction::Unknown(action),
            };
            return Request::Admin { id, action };
        }
        if let Some(n) = self.dictionary_size {
            return Request::Admin { id, action: AdminAction::SetSize { chunk_count: Some(n) } };
        }
        if self.get_chunk_count.is_some() {
            return Request::Admin { id, action: AdminAction::GetChunkCount };
        }
        Request::Completion {
            id,
            prefix: self.p.unwrap_or_default(),
            limit: self.l.unwrap_or(0) as usize,
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// One suggestion: the word and its 1-based position in the returned list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionEntry {
    pub w: String,
    pub r: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReply {
    pub id: String,
    pub s: Vec<SuggestionEntry>,
    pub c: u32,
    /// Elapsed time serving the request, in microseconds.
    pub t: u64,
}

/// Completion failure: `c` is 400 for validation, 500 for internal faults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub id: String,
    pub e: String,
    pub c: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeOption {
    pub chunk_count: u32,
    pub word_count: u64,
    pub size_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminReply {
    pub id: String,
    /// `"ok"` or `"error"`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_chunks: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_chunks: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<SizeOption>>,
}

impl AdminReply {
    pub fn ok(id: String) -> Self {
        AdminReply {
            id,
            status: "ok".to_string(),
            error: None,
            current_chunks: None,
            available_chunks: None,
            options: None,
        }
    }

    pub fn error(id: String, message: impl Into<String>) -> Self {
        AdminReply {
            id,
            status: "error".to_string(),
            error: Some(message.into()),
            current_chunks: None,
            available_chunks: None,
            options: None,
        }
    }
}

/// Any single response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Completion(CompletionReply),
    Error(ErrorReply),
    Admin(AdminReply),
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Read one self-delimiting request map from the stream.
pub fn read_message<R: Read>(reader: &mut R) -> Result<RawRequest, rmp_serde::decode::Error> {
    rmp_serde::decode::from_read(reader)
}

/// Encode one response as a MessagePack map. The whole buffer is written to
/// the stream in a single call so responses never interleave.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    let mut buf = Vec::new();
    value.serialize(&mut rmp_serde::Serializer::new(&mut buf).with_struct_map())?;
    Ok(buf)
}

/// End-of-stream (clean shutdown) as opposed to a malformed frame.
pub fn is_eof(error: &rmp_serde::decode::Error) -> bool {
    use rmp_serde::decode::Error;
    match error {
        Error::InvalidMarkerRead(e) | Error::InvalidDataRead(e) => {
            e.kind() == std::io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
