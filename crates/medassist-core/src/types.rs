//! Conversation data model

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Server-assigned session identifier
///
/// The backend hands out integers, but deep links carry strings, so both
/// forms are accepted. Numeric ids serialize back as JSON numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionId {
    Numeric(i64),
    Opaque(String),
}

impl FromStr for SessionId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(match s.parse::<i64>() {
            Ok(n) => SessionId::Numeric(n),
            Err(_) => SessionId::Opaque(s.to_string()),
        })
    }
}

impl From<i64> for SessionId {
    fn from(id: i64) -> Self {
        SessionId::Numeric(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        match id.parse() {
            Ok(parsed) => parsed,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionId::Numeric(n) => write!(f, "{}", n),
            SessionId::Opaque(s) => write!(f, "{}", s),
        }
    }
}

/// Lifecycle of a single message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Receiving stream increments. At most one message is in this state.
    Streaming,
    #[default]
    Complete,
    /// Stream stopped early (cancelled or failed); content is partial
    Interrupted,
    /// Synthetic notice describing a failed turn
    Failed,
}

/// A tool invocation reported by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// What happened when a tool result was offered to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolResultOutcome {
    Applied,
    /// The call already had a result; the new one was ignored
    AlreadySet,
    /// No call with that id exists on the message
    UnknownCall,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            result: None,
        }
    }

    /// A call without a result is still pending
    pub fn is_pending(&self) -> bool {
        self.result.is_none()
    }

    /// Set the result once. Later results for the same call are refused.
    pub fn set_result(&mut self, result: Value) -> ToolResultOutcome {
        if self.result.is_some() {
            return ToolResultOutcome::AlreadySet;
        }
        self.result = Some(result);
        ToolResultOutcome::Applied
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

/// Backend log line attached to an assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogItem {
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Token accounting for one assistant turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Zero when the backend leaves it out; see [`TokenUsage::normalized`]
    #[serde(default)]
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Build a usage summary, deriving the total when the backend omits it
    pub fn new(prompt_tokens: u32, completion_tokens: u32, total_tokens: Option<u32>) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: total_tokens.unwrap_or(prompt_tokens.saturating_add(completion_tokens)),
        }
    }

    /// Fill in a missing total from its parts
    pub fn normalized(self) -> Self {
        if self.total_tokens == 0 {
            Self::new(self.prompt_tokens, self.completion_tokens, None)
        } else {
            self
        }
    }
}

/// Accept an optional id written either as a JSON string or a number
pub fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

/// Cross-link from a span of message content to a patient record
///
/// Offsets count characters, not bytes, and `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientReference {
    pub start: usize,
    pub end: usize,
    pub patient_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl PatientReference {
    /// Whether the span lies inside `content`
    pub fn is_valid_for(&self, content: &str) -> bool {
        self.start < self.end && self.end <= content.chars().count()
    }

    /// The referenced text, if the span is valid for `content`
    pub fn slice<'a>(&self, content: &'a str) -> Option<&'a str> {
        if !self.is_valid_for(content) {
            return None;
        }
        let mut indices = content.char_indices().map(|(i, _)| i).chain(std::iter::once(content.len()));
        let start = indices.nth(self.start)?;
        let end = indices.nth(self.end - self.start - 1)?;
        content.get(start..end)
    }
}

/// Phase tag for what the agent is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityPhase {
    Thinking,
    ToolCalling,
    Analyzing,
    Searching,
    Processing,
}

impl FromStr for ActivityPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thinking" => Ok(ActivityPhase::Thinking),
            "tool_calling" => Ok(ActivityPhase::ToolCalling),
            "analyzing" => Ok(ActivityPhase::Analyzing),
            "searching" => Ok(ActivityPhase::Searching),
            "processing" => Ok(ActivityPhase::Processing),
            other => Err(format!("unknown activity phase '{}'", other)),
        }
    }
}

impl fmt::Display for ActivityPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActivityPhase::Thinking => "thinking",
            ActivityPhase::ToolCalling => "tool_calling",
            ActivityPhase::Analyzing => "analyzing",
            ActivityPhase::Searching => "searching",
            ActivityPhase::Processing => "processing",
        };
        f.write_str(label)
    }
}

/// Activity of the most recent assistant message
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivityState {
    pub phase: Option<ActivityPhase>,
    #[serde(default)]
    pub detail: String,
}

impl ActivityState {
    pub fn new(phase: Option<ActivityPhase>, detail: impl Into<String>) -> Self {
        Self {
            phase,
            detail: detail.into(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase.is_some()
    }
}

/// One conversation turn entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patient_references: Vec<PatientReference>,
    #[serde(default)]
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: String, status: MessageStatus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            reasoning: None,
            tool_calls: Vec::new(),
            logs: Vec::new(),
            usage: None,
            patient_references: Vec::new(),
            status,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into(), MessageStatus::Complete)
    }

    /// A finished assistant message, as loaded from history
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into(), MessageStatus::Complete)
    }

    /// An empty assistant message ready to receive increments
    pub fn assistant_open() -> Self {
        Self::with_role(Role::Assistant, String::new(), MessageStatus::Streaming)
    }

    /// Synthetic assistant message carrying a failure notice
    pub fn notice(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into(), MessageStatus::Failed)
    }

    pub fn is_open(&self) -> bool {
        self.status == MessageStatus::Streaming
    }

    pub fn push_reasoning(&mut self, delta: &str) {
        self.reasoning.get_or_insert_with(String::new).push_str(delta);
    }

    pub fn tool_call(&self, id: &str) -> Option<&ToolCall> {
        self.tool_calls.iter().find(|call| call.id == id)
    }

    pub fn pending_tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.tool_calls.iter().filter(|call| call.is_pending())
    }

    /// Start a tool call, or update a pending one with the same id
    ///
    /// Arguments are merged key by key. A call that already has a result is
    /// left untouched and `false` is returned.
    pub fn upsert_tool_call(&mut self, id: &str, name: &str, arguments: Map<String, Value>) -> bool {
        match self.tool_calls.iter_mut().find(|call| call.id == id) {
            Some(call) if !call.is_pending() => false,
            Some(call) => {
                if !name.is_empty() {
                    call.name = name.to_string();
                }
                call.arguments.extend(arguments);
                true
            }
            None => {
                self.tool_calls.push(ToolCall::new(id, name, arguments));
                true
            }
        }
    }

    pub fn set_tool_result(&mut self, id: &str, result: Value) -> ToolResultOutcome {
        match self.tool_calls.iter_mut().find(|call| call.id == id) {
            Some(call) => call.set_result(result),
            None => ToolResultOutcome::UnknownCall,
        }
    }

    /// Keep only the references whose spans fit the final content
    ///
    /// Returns how many were dropped.
    pub fn attach_patient_references(&mut self, references: Vec<PatientReference>) -> usize {
        let offered = references.len();
        let content = &self.content;
        let valid: Vec<PatientReference> = references
            .into_iter()
            .filter(|r| r.is_valid_for(content))
            .collect();
        let dropped = offered - valid.len();
        self.patient_references.extend(valid);
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_id_parses_numeric_and_opaque() {
        assert_eq!("42".parse::<SessionId>().unwrap(), SessionId::Numeric(42));
        assert_eq!(
            "abc-1".parse::<SessionId>().unwrap(),
            SessionId::Opaque("abc-1".to_string())
        );
        assert_eq!(SessionId::from(" 7 "), SessionId::Numeric(7));
    }

    #[test]
    fn numeric_session_id_serializes_as_number() {
        let value = serde_json::to_value(SessionId::Numeric(42)).unwrap();
        assert_eq!(value, json!(42));

        let parsed: SessionId = serde_json::from_value(json!("s-9")).unwrap();
        assert_eq!(parsed.to_string(), "s-9");
    }

    #[test]
    fn tool_result_is_set_at_most_once() {
        let mut call = ToolCall::new("t1", "lookup_labs", Map::new());
        assert!(call.is_pending());
        assert_eq!(call.set_result(json!("first")), ToolResultOutcome::Applied);
        assert_eq!(call.set_result(json!("second")), ToolResultOutcome::AlreadySet);
        assert_eq!(call.result, Some(json!("first")));
    }

    #[test]
    fn upsert_merges_arguments_of_pending_call() {
        let mut msg = Message::assistant_open();
        let mut first = Map::new();
        first.insert("patient".into(), json!(3));
        assert!(msg.upsert_tool_call("t1", "search", first));

        let mut second = Map::new();
        second.insert("query".into(), json!("hba1c"));
        assert!(msg.upsert_tool_call("t1", "", second));

        let call = msg.tool_call("t1").unwrap();
        assert_eq!(call.name, "search");
        assert_eq!(call.arguments.len(), 2);
        assert_eq!(msg.tool_calls.len(), 1);
    }

    #[test]
    fn upsert_refuses_completed_call() {
        let mut msg = Message::assistant_open();
        msg.upsert_tool_call("t1", "search", Map::new());
        msg.set_tool_result("t1", json!({"rows": 0}));

        assert!(!msg.upsert_tool_call("t1", "renamed", Map::new()));
        assert_eq!(msg.tool_call("t1").unwrap().name, "search");
        assert_eq!(msg.pending_tool_calls().count(), 0);
    }

    #[test]
    fn tool_result_for_unknown_call_is_reported() {
        let mut msg = Message::assistant_open();
        assert_eq!(
            msg.set_tool_result("missing", json!(null)),
            ToolResultOutcome::UnknownCall
        );
    }

    #[test]
    fn patient_reference_slices_by_characters() {
        let content = "Résumé for Jane Doe";
        let reference = PatientReference {
            start: 11,
            end: 19,
            patient_id: 5,
            label: None,
        };
        assert_eq!(reference.slice(content), Some("Jane Doe"));

        let out_of_range = PatientReference {
            start: 11,
            end: 40,
            patient_id: 5,
            label: None,
        };
        assert_eq!(out_of_range.slice(content), None);
    }

    #[test]
    fn invalid_patient_references_are_dropped() {
        let mut msg = Message::assistant("See John");
        let dropped = msg.attach_patient_references(vec![
            PatientReference {
                start: 4,
                end: 8,
                patient_id: 1,
                label: Some("John".into()),
            },
            PatientReference {
                start: 6,
                end: 3,
                patient_id: 2,
                label: None,
            },
        ]);
        assert_eq!(dropped, 1);
        assert_eq!(msg.patient_references.len(), 1);
    }

    #[test]
    fn usage_total_is_derived_when_missing() {
        assert_eq!(TokenUsage::new(10, 5, None).total_tokens, 15);
        assert_eq!(TokenUsage::new(10, 5, Some(20)).total_tokens, 20);

        let parsed: TokenUsage =
            serde_json::from_value(json!({"prompt_tokens": 3, "completion_tokens": 4})).unwrap();
        assert_eq!(parsed.normalized().total_tokens, 7);
    }

    #[test]
    fn usage_total_saturates_on_huge_counts() {
        let usage = TokenUsage::new(4_000_000_000, 1_000_000_000, None);
        assert_eq!(usage.total_tokens, u32::MAX);

        let parsed: TokenUsage = serde_json::from_value(
            json!({"prompt_tokens": u32::MAX, "completion_tokens": 1}),
        )
        .unwrap();
        assert_eq!(parsed.normalized().total_tokens, u32::MAX);
    }

    #[test]
    fn message_round_trips_through_history_shape() {
        let json = json!({
            "id": "m1",
            "role": "assistant",
            "content": "Labs look stable.",
            "created_at": "2026-01-02T03:04:05Z"
        });
        let msg: Message = serde_json::from_value(json).unwrap();
        assert_eq!(msg.status, MessageStatus::Complete);
        assert!(msg.tool_calls.is_empty());
        assert!(!msg.is_open());
    }
}
