//! Error taxonomy for conversation handling

use std::time::Duration;

use thiserror::Error;

use crate::types::SessionId;

/// Violations of the message store contract
///
/// These indicate a controller bug, not a runtime condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no assistant message is open")]
    NoOpenMessage,

    #[error("an assistant message is already open")]
    AlreadyOpen,
}

/// Errors from submitting turns, loading sessions, and reading streams
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    #[error("Input is empty")]
    EmptyInput,

    #[error("A request is already in flight")]
    Busy,

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Backend reported an error: {message}")]
    Backend {
        message: String,
        code: Option<String>,
    },

    #[error("Stream stalled: no data for {0:?}")]
    StreamStalled(Duration),

    #[error("Stream ended unexpectedly: {0}")]
    StreamInterrupted(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;

impl ChatError {
    /// Text shown to the user in the synthetic assistant message for this failure
    pub fn user_notice(&self) -> String {
        match self {
            ChatError::BackendUnavailable(_) => {
                "I couldn't reach the assistant service. Check your connection or the backend \
                 configuration and try again."
                    .to_string()
            }
            ChatError::Network(detail) | ChatError::StreamInterrupted(detail) => format!(
                "The connection to the assistant service was lost ({}). Please try again.",
                detail
            ),
            ChatError::Status { status, .. } => format!(
                "The assistant service responded with an error (HTTP {}). Please try again.",
                status
            ),
            ChatError::Backend { message, .. } => {
                format!("The assistant ran into a problem: {}", message)
            }
            ChatError::StreamStalled(after) => format!(
                "The assistant stopped responding (no data for {} seconds). Please try again.",
                after.as_secs()
            ),
            ChatError::SessionNotFound(id) => format!(
                "Conversation {} could not be found. Starting a new conversation.",
                id
            ),
            ChatError::InvalidResponse(_) | ChatError::MalformedFrame(_) => {
                "The assistant sent a response that could not be read. Please try again."
                    .to_string()
            }
            ChatError::EmptyInput
            | ChatError::Busy
            | ChatError::Cancelled
            | ChatError::Store(_) => self.to_string(),
        }
    }

    /// Whether this failure is reported to the user as a chat message
    ///
    /// Rejections and contract violations are not; transport failures are.
    pub fn is_user_visible(&self) -> bool {
        !matches!(
            self,
            ChatError::EmptyInput
                | ChatError::Busy
                | ChatError::Cancelled
                | ChatError::MalformedFrame(_)
                | ChatError::Store(_)
        )
    }
}
