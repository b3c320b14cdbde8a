//! Incremental decoder for the chat endpoint's server-sent event stream.
//!
//! The body is a sequence of `event: <type>` / `data: <json>` line pairs.
//! Chunks may split lines (and UTF-8 sequences) anywhere, so incomplete
//! trailing bytes are carried over to the next chunk. The pending event type
//! applies to exactly one following `data:` line.

use serde_json::Value;
use tracing::debug;

use super::message::ToolCall;

/// One decoded frame of a streaming turn.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Delta { text: String },
    ToolUse(ToolCall),
    MessageId { id: String },
    Error { error: Option<String> },
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk, returning every frame completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        // Carried-over bytes hold no newline, so only the new chunk is scanned.
        let scanned = self.buf.len();
        self.buf.extend_from_slice(chunk);
        let Some(last) = chunk.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.buf.drain(..=scanned + last).collect();
        complete[..complete.len() - 1]
            .split(|&b| b == b'\n')
            .filter_map(|line| self.line(line))
            .collect()
    }

    /// Flush a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<StreamFrame> {
        if self.buf.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buf);
        self.line(&line).into_iter().collect()
    }

    fn line(&mut self, raw: &[u8]) -> Option<StreamFrame> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw);

        if let Some(rest) = line.strip_prefix("event:") {
            self.event = rest.trim().to_string();
            return None;
        }
        let rest = line.strip_prefix("data:")?;
        let data = rest.strip_prefix(' ').unwrap_or(rest);
        let event = std::mem::take(&mut self.event);

        match serde_json::from_str::<Value>(data) {
            Ok(value) => frame(&event, value),
            Err(e) => {
                debug!(event = %event, error = %e, "Skipping unparseable stream frame");
                None
            }
        }
    }
}

fn frame(event: &str, data: Value) -> Option<StreamFrame> {
    match event {
        "delta" => {
            let text = data.get("text")?.as_str()?;
            if text.is_empty() {
                return None;
            }
            Some(StreamFrame::Delta {
                text: text.to_string(),
            })
        }
        "tool_use" => {
            let tool = data.get("tool").filter(|t| !t.is_null())?.clone();
            match serde_json::from_value::<ToolCall>(tool) {
                Ok(call) => Some(StreamFrame::ToolUse(call)),
                Err(e) => {
                    debug!(error = %e, "Skipping malformed tool_use frame");
                    None
                }
            }
        }
        "message_id" => {
            let id = data.get("id")?.as_str()?;
            if id.is_empty() {
                return None;
            }
            Some(StreamFrame::MessageId { id: id.to_string() })
        }
        "error" => {
            let error = match data.get("error") {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
            };
            Some(StreamFrame::Error { error })
        }
        _ => None,
    }
}
