//! Outbound messages
//!
//! Every source turns accepted entries into [`Message`] values. The payload
//! shape depends on the configured read mode; headers describe where the
//! payload came from.

use std::collections::BTreeMap;
use std::path::PathBuf;

use base64::Engine;
use serde::{Deserialize, Serialize, Serializer};

/// Header names attached to file-derived messages
pub mod headers {
    pub const SOURCE: &str = "source";
    pub const FILE_NAME: &str = "file_name";
    pub const FILE_RELATIVE_PATH: &str = "file_relative_path";
    pub const FILE_ORIGINAL_PATH: &str = "file_original_path";
    pub const FILE_SIZE: &str = "file_size";
    pub const FILE_MODIFIED: &str = "file_modified";
    pub const REMOTE_DIRECTORY: &str = "remote_directory";
    pub const CORRELATION_ID: &str = "correlation_id";
    pub const SEQUENCE_NUMBER: &str = "sequence_number";
}

/// Start or end of a file in line mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mark {
    Start,
    End,
}

/// Marker emitted around the lines of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMarker {
    pub file_name: String,
    pub mark: Mark,
    pub line_count: u64,
}

impl FileMarker {
    pub fn start(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            mark: Mark::Start,
            line_count: 0,
        }
    }

    pub fn end(file_name: impl Into<String>, line_count: u64) -> Self {
        Self {
            file_name: file_name.into(),
            mark: Mark::End,
            line_count,
        }
    }
}

/// Message body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// Whole file contents
    #[serde(serialize_with = "serialize_base64")]
    Bytes(Vec<u8>),
    /// One line of a file, or a JSON-rendered marker
    Text(String),
    /// Local path; a downstream stage reads the file
    Reference(PathBuf),
    /// Structured start/end marker
    Marker(FileMarker),
    /// Metadata of an entry in listing-only mode
    Json(serde_json::Value),
}

fn serialize_base64<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// A payload plus string headers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub payload: Payload,
    pub headers: BTreeMap<String, String>,
}

impl Message {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            headers: BTreeMap::new(),
        }
    }

    /// Adds or replaces a header
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    /// Copies every header from `headers`, replacing existing ones
    pub fn with_headers(mut self, headers: &BTreeMap<String, String>) -> Self {
        self.headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Returns the payload as text for `Text` payloads
    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }
}
