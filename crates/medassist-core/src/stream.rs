//! Decoder for `text/event-stream` response bodies
//!
//! The backend writes one frame per line as `data: <json>`, where the JSON is
//! a tagged object (`{"type": "text", ...}`). `data: [DONE]` marks the end of
//! the stream. Everything else (`event:` lines, `:` comments, blank
//! separators) is ignored.
//!
//! Decoding is a pure function of the bytes left over from the previous chunk
//! and the next chunk: [`decode_chunk`] returns the increments found in all
//! complete lines plus the unterminated tail, which is carried into the next
//! call untouched. Splitting on `\n` at the byte level keeps multi-byte UTF-8
//! sequences intact across network chunks.
//!
//! Frames that fail to parse are dropped with a log line and never abort the
//! stream.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::types::{deserialize_optional_id, ActivityPhase, LogLevel, PatientReference, SessionId};

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// One typed increment carried by a stream frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Text appended to the open message content
    Text { content: String },

    /// Text appended to the reasoning trace
    Reasoning { content: String },

    /// Tool call started, or updated while still pending
    ToolCall {
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default, deserialize_with = "deserialize_arguments")]
        arguments: Map<String, Value>,
    },

    /// Result for a previously announced tool call
    ToolResult {
        id: String,
        #[serde(default)]
        result: Value,
    },

    Log {
        message: String,
        #[serde(default)]
        level: LogLevel,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },

    /// Activity change; a missing or `none` phase resets it
    Activity {
        #[serde(default, deserialize_with = "deserialize_phase")]
        phase: Option<ActivityPhase>,
        #[serde(default)]
        detail: String,
    },

    Usage {
        prompt_tokens: u32,
        completion_tokens: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_tokens: Option<u32>,
    },

    /// Terminal: the turn completed
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            deserialize_with = "deserialize_optional_id"
        )]
        message_id: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        patient_references: Vec<PatientReference>,
    },

    /// Terminal: the backend gave up on the turn
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl StreamEvent {
    pub fn text(content: impl Into<String>) -> Self {
        StreamEvent::Text {
            content: content.into(),
        }
    }

    /// Completion without any metadata, as produced by `[DONE]`
    pub fn done() -> Self {
        StreamEvent::Done {
            session_id: None,
            message_id: None,
            patient_references: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }

    /// Format as a single stream frame line
    pub fn to_frame(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("{}{}\n", DATA_PREFIX, data)
    }
}

/// Tool arguments arrive as an object, a JSON-encoded object string, or null
fn deserialize_arguments<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        Value::String(raw) if raw.trim().is_empty() => Ok(Map::new()),
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(de::Error::custom("tool arguments must be a JSON object")),
        },
        other => Err(de::Error::custom(format!(
            "tool arguments must be a JSON object, got {}",
            other
        ))),
    }
}

fn deserialize_phase<'de, D>(deserializer: D) -> Result<Option<ActivityPhase>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => match raw.as_str() {
            "" | "none" | "idle" => Ok(None),
            other => other.parse().map(Some).map_err(de::Error::custom),
        },
    }
}

/// What a single line turned out to be
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Not a data line
    Ignored,
    Event(StreamEvent),
    /// A data line whose payload could not be decoded
    Malformed(String),
}

/// Decode one complete line (without its terminating newline)
pub fn decode_line(line: &str) -> LineOutcome {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return LineOutcome::Ignored;
    };
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return LineOutcome::Event(StreamEvent::done());
    }

    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(event) => LineOutcome::Event(event),
        Err(e) => {
            match e.classify() {
                Category::Data => warn!(error = %e, "Dropping stream frame with unrecognized shape"),
                _ => debug!(error = %e, "Dropping unparseable stream frame"),
            }
            LineOutcome::Malformed(e.to_string())
        }
    }
}

/// Output of [`decode_chunk`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    /// Increments from every complete line, in order
    pub events: Vec<StreamEvent>,
    /// Unterminated tail to carry into the next call
    pub rest: Vec<u8>,
    /// Data lines that were dropped
    pub malformed: usize,
}

fn decode_lines(bytes: &[u8], decoded: &mut Decoded) {
    for raw in bytes.split(|b| *b == b'\n') {
        if raw.is_empty() {
            continue;
        }
        match decode_line(&String::from_utf8_lossy(raw)) {
            LineOutcome::Event(event) => decoded.events.push(event),
            LineOutcome::Malformed(_) => decoded.malformed += 1,
            LineOutcome::Ignored => {}
        }
    }
}

/// Decode `chunk` given the partial line left over from the previous call
pub fn decode_chunk(partial: &[u8], chunk: &[u8]) -> Decoded {
    let mut buffer = Vec::with_capacity(partial.len() + chunk.len());
    buffer.extend_from_slice(partial);
    buffer.extend_from_slice(chunk);

    let mut decoded = Decoded::default();
    match buffer.iter().rposition(|b| *b == b'\n') {
        Some(last_newline) => {
            decode_lines(&buffer[..last_newline], &mut decoded);
            decoded.rest = buffer[last_newline + 1..].to_vec();
        }
        None => decoded.rest = buffer,
    }
    decoded
}

/// Per-request wrapper holding only the carried partial line
#[derive(Debug, Default)]
pub struct StreamDecoder {
    partial: Vec<u8>,
    malformed: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next network chunk
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let decoded = decode_chunk(&self.partial, chunk);
        self.partial = decoded.rest;
        self.malformed += decoded.malformed;
        decoded.events
    }

    /// Flush the trailing line once the stream has closed
    ///
    /// A final frame without a terminating newline is complete at this point.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let tail = std::mem::take(&mut self.partial);
        let mut decoded = Decoded::default();
        decode_lines(&tail, &mut decoded);
        self.malformed += decoded.malformed;
        decoded.events
    }

    /// Bytes of the current unterminated line
    pub fn pending(&self) -> &[u8] {
        &self.partial
    }

    /// Number of data lines dropped so far
    pub fn malformed_count(&self) -> usize {
        self.malformed
    }
}
