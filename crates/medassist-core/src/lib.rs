//! Core types for the assistant conversation panel
//!
//! This crate holds everything that does not touch the network:
//!
//! - [`types`]: messages, tool calls, log items, activity state, session ids
//! - [`store`]: the ordered message log with a single open assistant message
//! - [`stream`]: the `data: <json>` frame decoder producing typed increments
//! - [`error`]: the error taxonomy shared with the client crate
//!
//! The controller that drives these lives in `medassist-client`.

pub mod error;
pub mod store;
pub mod stream;
pub mod types;

pub use error::{ChatError, ChatResult, StoreError};
pub use store::MessageStore;
pub use stream::{decode_chunk, Decoded, StreamDecoder, StreamEvent};
pub use types::{
    ActivityPhase, ActivityState, LogItem, LogLevel, Message, MessageStatus, PatientReference,
    Role, SessionId, TokenUsage, ToolCall, ToolResultOutcome,
};
