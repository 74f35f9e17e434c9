//! Network side of the assistant conversation panel
//!
//! [`ConversationController`] is the entry point. It sends turns through a
//! [`ChatBackend`] (normally [`HttpBackend`]), decodes the streamed reply and
//! keeps the message store, activity state, session context and panel layout
//! in one place. Presentation layers read [`ConversationSnapshot`]s and listen
//! for [`ConversationEvent`]s.
//!
//! [`RegistryClient`] covers the tool and sub-agent collections, which are
//! independent of any conversation.

pub mod backend;
pub mod controller;
pub mod events;
pub mod http;
pub mod layout;
pub mod registry;
pub mod session;

pub use backend::{ByteStream, ChatBackend, PersistedMessage, TurnReply, TurnRequest, TurnResponse};
pub use controller::{
    ControllerOptions, ConversationController, ConversationPhase, ResumeOutcome, TurnOutcome,
};
pub use events::{ConversationEvent, ConversationSnapshot};
pub use http::HttpBackend;
pub use layout::PanelLayout;
pub use registry::{RegistryClient, RegistryError, SubAgent, Tool};
pub use session::{PersistedSession, SessionContext, SessionSynchronizer};
