//! Backend seam for sending turns and loading persisted sessions
//!
//! The controller only talks to [`ChatBackend`]. [`crate::HttpBackend`] is the
//! production implementation; tests script their own.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use medassist_core::types::deserialize_optional_id;
use medassist_core::{
    ChatResult, LogItem, Message, MessageStatus, PatientReference, Role, SessionId, StreamEvent,
    TokenUsage, ToolCall,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Body of a send-turn request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub stream: bool,
}

/// Raw body chunks of a streaming reply
pub type ByteStream = BoxStream<'static, ChatResult<Vec<u8>>>;

/// What the backend answered a turn with
pub enum TurnResponse {
    /// `text/event-stream` body still being received
    Streaming(ByteStream),
    /// Single JSON reply
    Complete(TurnReply),
}

impl fmt::Debug for TurnResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnResponse::Streaming(_) => f.write_str("TurnResponse::Streaming(..)"),
            TurnResponse::Complete(reply) => f.debug_tuple("TurnResponse::Complete").field(reply).finish(),
        }
    }
}

/// Non-streaming reply to a turn
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TurnReply {
    #[serde(default, alias = "response")]
    pub content: String,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub patient_references: Vec<PatientReference>,
}

impl TurnReply {
    /// Replay the reply as the increments a stream would have carried
    pub fn into_events(self) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if let Some(reasoning) = self.reasoning.filter(|r| !r.is_empty()) {
            events.push(StreamEvent::Reasoning { content: reasoning });
        }
        for call in self.tool_calls {
            let id = call.id.clone();
            events.push(StreamEvent::ToolCall {
                id: call.id,
                name: call.name,
                arguments: call.arguments,
            });
            if let Some(result) = call.result {
                events.push(StreamEvent::ToolResult { id, result });
            }
        }
        if !self.content.is_empty() {
            events.push(StreamEvent::text(self.content));
        }
        if let Some(usage) = self.usage {
            let usage = usage.normalized();
            events.push(StreamEvent::Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: Some(usage.total_tokens),
            });
        }
        events.push(StreamEvent::Done {
            session_id: self.session_id,
            message_id: self.message_id,
            patient_references: self.patient_references,
        });
        events
    }
}

/// One message as stored by the backend
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PersistedMessage {
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub id: Option<String>,
    /// Kept as text so that roles this client does not display can be skipped
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub logs: Vec<LogItem>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub patient_references: Vec<PatientReference>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl PersistedMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: None,
            role: role.to_string(),
            content: content.into(),
            reasoning: None,
            tool_calls: Vec::new(),
            logs: Vec::new(),
            usage: None,
            patient_references: Vec::new(),
            created_at: None,
        }
    }

    /// Convert into a closed store message; `None` for roles other than user and assistant
    pub fn into_message(self) -> Option<Message> {
        let role = match self.role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => {
                debug!(role = %other, "Skipping persisted message with unsupported role");
                return None;
            }
        };

        let mut message = match role {
            Role::User => Message::user(self.content),
            Role::Assistant => Message::assistant(self.content),
        };
        if let Some(id) = self.id {
            message.id = id;
        }
        if let Some(created_at) = self.created_at {
            message.created_at = created_at;
        }
        message.reasoning = self.reasoning.filter(|r| !r.is_empty());
        message.tool_calls = self.tool_calls;
        message.logs = self.logs;
        message.usage = self.usage.map(TokenUsage::normalized);
        message.attach_patient_references(self.patient_references);
        message.status = MessageStatus::Complete;
        Some(message)
    }
}

/// Resume endpoint body: a bare array or `{"messages": [...]}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum SessionPayload {
    List(Vec<PersistedMessage>),
    Wrapped { messages: Vec<PersistedMessage> },
}

impl SessionPayload {
    pub(crate) fn into_messages(self) -> Vec<PersistedMessage> {
        match self {
            SessionPayload::List(messages) | SessionPayload::Wrapped { messages } => messages,
        }
    }
}

/// Transport used by the controller and session synchronizer
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send one user turn
    async fn send_turn(&self, request: TurnRequest) -> ChatResult<TurnResponse>;

    /// Load the persisted transcript of a session, in order
    ///
    /// Any non-success status is reported as `SessionNotFound`.
    async fn fetch_session(&self, id: &SessionId) -> ChatResult<Vec<PersistedMessage>>;

    /// Delete server-side history for a session
    async fn delete_session(&self, id: &SessionId) -> ChatResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn turn_request_skips_missing_scope() {
        let request = TurnRequest {
            message: "hello".into(),
            patient_id: None,
            session_id: Some(SessionId::Numeric(7)),
            stream: true,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"message": "hello", "session_id": 7, "stream": true})
        );
    }

    #[test]
    fn reply_replays_in_stream_order() {
        let reply: TurnReply = serde_json::from_value(json!({
            "response": "Done.",
            "reasoning": "look it up",
            "tool_calls": [{"id": "t1", "name": "lookup", "arguments": {"q": "x"}, "result": 3}],
            "usage": {"prompt_tokens": 2, "completion_tokens": 3},
            "session_id": 12,
            "message_id": 99
        }))
        .unwrap();

        let events = reply.into_events();
        assert!(matches!(events[0], StreamEvent::Reasoning { .. }));
        assert!(matches!(events[1], StreamEvent::ToolCall { .. }));
        assert!(matches!(events[2], StreamEvent::ToolResult { .. }));
        assert_eq!(events[3], StreamEvent::text("Done."));
        assert_eq!(
            events[4],
            StreamEvent::Usage {
                prompt_tokens: 2,
                completion_tokens: 3,
                total_tokens: Some(5)
            }
        );
        assert_eq!(
            events[5],
            StreamEvent::Done {
                session_id: Some(SessionId::Numeric(12)),
                message_id: Some("99".into()),
                patient_references: vec![],
            }
        );
    }

    #[test]
    fn empty_reply_is_just_done() {
        let events = TurnReply::default().into_events();
        assert_eq!(events, vec![StreamEvent::done()]);
    }

    #[test]
    fn session_payload_accepts_both_shapes() {
        let bare: SessionPayload =
            serde_json::from_value(json!([{"role": "user", "content": "a"}])).unwrap();
        let wrapped: SessionPayload =
            serde_json::from_value(json!({"messages": [{"role": "user", "content": "a"}]})).unwrap();
        assert_eq!(bare.into_messages().len(), 1);
        assert_eq!(wrapped.into_messages().len(), 1);
    }

    #[test]
    fn persisted_message_becomes_closed_message() {
        let persisted: PersistedMessage = serde_json::from_value(json!({
            "id": 5,
            "role": "assistant",
            "content": "Patient Jane",
            "patient_references": [
                {"start": 8, "end": 12, "patient_id": 1},
                {"start": 8, "end": 40, "patient_id": 2}
            ],
            "created_at": "2025-01-02T03:04:05Z"
        }))
        .unwrap();

        let message = persisted.into_message().unwrap();
        assert_eq!(message.id, "5");
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.status, MessageStatus::Complete);
        assert_eq!(message.patient_references.len(), 1);
        assert_eq!(message.created_at.to_rfc3339(), "2025-01-02T03:04:05+00:00");
    }

    #[test]
    fn system_messages_are_skipped() {
        assert!(PersistedMessage::new(Role::User, "x").into_message().is_some());
        let system = PersistedMessage {
            role: "system".into(),
            ..PersistedMessage::new(Role::User, "prompt")
        };
        assert!(system.into_message().is_none());
    }
}
