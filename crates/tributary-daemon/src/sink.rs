//! Stdout sink
//!
//! Writes every outbound message as one JSON object per line:
//! `{"source": ..., "headers": {...}, "payload": {"type": ..., "value": ...}}`.
//! Downstream tooling reads the stream from the daemon's stdout; logs go to
//! stderr so the two never interleave.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::Receiver;
use tributary_core::domain::{headers, Message, Payload};

#[derive(Serialize)]
struct Record<'a> {
    source: Option<&'a str>,
    headers: &'a BTreeMap<String, String>,
    payload: &'a Payload,
}

/// Renders one message as a JSON line, terminator included
pub fn render(message: &Message) -> Result<Vec<u8>> {
    let record = Record {
        source: message.header(headers::SOURCE),
        headers: &message.headers,
        payload: &message.payload,
    };
    let mut line = serde_json::to_vec(&record).context("Failed to serialize message")?;
    line.push(b'\n');
    Ok(line)
}

/// Writes messages until every sender is dropped; returns the count written
pub async fn drain<W>(mut rx: Receiver<Message>, mut out: W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(message) = rx.recv().await {
        out.write_all(&render(&message)?)
            .await
            .context("Failed to write message")?;
        // one flush per line keeps `tail -f`-style consumers current
        out.flush().await?;
        written += 1;
    }
    Ok(written)
}
