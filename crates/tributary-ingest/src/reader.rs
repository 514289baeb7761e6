//! Content reader
//!
//! Turns a complete local file into outbound messages according to the
//! configured [`ReadMode`]. Messages are sent as they are produced, so
//! `lines` mode never holds a whole file in memory.

use std::collections::BTreeMap;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::Sender;
use tributary_core::config::{ConsumerConfig, ReadMode};
use tributary_core::domain::{headers, FileMarker, Message, Payload};

use crate::IngestError;

#[derive(Debug, Clone, Copy)]
pub struct ContentReader {
    mode: ReadMode,
    with_markers: bool,
    markers_json: bool,
}

impl ContentReader {
    pub fn new(mode: ReadMode) -> Self {
        Self {
            mode,
            with_markers: false,
            markers_json: true,
        }
    }

    pub fn from_config(config: &ConsumerConfig) -> Result<Self, IngestError> {
        if config.with_markers && config.mode != ReadMode::Lines {
            return Err(IngestError::Configuration(
                "markers are only emitted in lines mode".to_string(),
            ));
        }
        Ok(Self {
            mode: config.mode,
            with_markers: config.with_markers,
            markers_json: config.markers_json,
        })
    }

    pub fn with_markers(mut self, json: bool) -> Self {
        self.with_markers = true;
        self.markers_json = json;
        self
    }

    /// Reads `path` and sends its messages, each carrying `base` headers
    ///
    /// Returns the number of messages sent.
    pub async fn emit(
        &self,
        path: &Path,
        base: &BTreeMap<String, String>,
        tx: &Sender<Message>,
    ) -> Result<usize, IngestError> {
        match self.mode {
            ReadMode::Contents => {
                let bytes = tokio::fs::read(path).await?;
                send(tx, Message::new(Payload::Bytes(bytes)).with_headers(base)).await?;
                Ok(1)
            }
            ReadMode::Ref => {
                send(
                    tx,
                    Message::new(Payload::Reference(path.to_path_buf())).with_headers(base),
                )
                .await?;
                Ok(1)
            }
            ReadMode::Lines => self.emit_lines(path, base, tx).await,
        }
    }

    async fn emit_lines(
        &self,
        path: &Path,
        base: &BTreeMap<String, String>,
        tx: &Sender<Message>,
    ) -> Result<usize, IngestError> {
        let file_name = base
            .get(headers::FILE_NAME)
            .cloned()
            .unwrap_or_else(|| path.display().to_string());
        let correlation = path.display().to_string();
        let mut sent = 0usize;
        let mut sequence = 0u64;

        let mut sequenced = |payload: Payload| {
            sequence += 1;
            Message::new(payload)
                .with_headers(base)
                .with_header(headers::CORRELATION_ID, correlation.clone())
                .with_header(headers::SEQUENCE_NUMBER, sequence.to_string())
        };

        if self.with_markers {
            let marker = self.marker_payload(FileMarker::start(file_name.clone()))?;
            send(tx, sequenced(marker)).await?;
            sent += 1;
        }

        let file = tokio::fs::File::open(path).await?;
        let mut input = BufReader::new(file);
        let mut raw = Vec::new();
        let mut line_count = 0u64;
        while input.read_until(b'\n', &mut raw).await? > 0 {
            line_count += 1;
            let line = decode_line(std::mem::take(&mut raw));
            send(tx, sequenced(Payload::Text(line))).await?;
            sent += 1;
        }

        if self.with_markers {
            let marker = self.marker_payload(FileMarker::end(file_name, line_count))?;
            send(tx, sequenced(marker)).await?;
            sent += 1;
        }

        Ok(sent)
    }

    fn marker_payload(&self, marker: FileMarker) -> Result<Payload, IngestError> {
        if self.markers_json {
            Ok(Payload::Text(serde_json::to_string(&marker)?))
        } else {
            Ok(Payload::Marker(marker))
        }
    }
}

/// Strips the line terminator (`\n` or `\r\n`) and decodes lossily
///
/// Bytes that are not valid UTF-8 become U+FFFD so one bad line never
/// aborts the rest of the file.
pub(crate) fn decode_line(mut raw: Vec<u8>) -> String {
    if raw.last() == Some(&b'\n') {
        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
    }
    match String::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

pub(crate) async fn send(tx: &Sender<Message>, message: Message) -> Result<(), IngestError> {
    tx.send(message).await.map_err(|_| IngestError::Closed)
}
