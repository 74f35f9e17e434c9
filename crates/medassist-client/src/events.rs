//! Change notifications and snapshots for presentation layers

use medassist_core::{ActivityState, ChatError, Message, MessageStatus, ToolCall};

use crate::controller::ConversationPhase;
use crate::layout::PanelLayout;
use crate::session::SessionContext;

/// One observable change, broadcast after it has been applied
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    PhaseChanged(ConversationPhase),

    /// A message was added at `index`
    MessageAppended { index: usize, message: Box<Message> },

    /// Text appended to the open message
    ContentDelta { index: usize, delta: String },

    ReasoningDelta { index: usize, delta: String },

    /// A tool call started, changed, or got its result
    ToolCallUpdated { index: usize, call: ToolCall },

    /// Logs, usage, or id of the open message changed
    OpenMessageUpdated { index: usize },

    MessageClosed { index: usize, status: MessageStatus },

    /// The store was bulk-replaced by a loaded session
    StoreReplaced { len: usize },

    Cleared,

    ActivityChanged(ActivityState),

    SessionChanged(SessionContext),

    LayoutChanged(PanelLayout),
}

/// Consistent copy of the controller state
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSnapshot {
    pub phase: ConversationPhase,
    pub messages: Vec<Message>,
    pub activity: ActivityState,
    pub session: SessionContext,
    pub layout: PanelLayout,
    pub last_error: Option<ChatError>,
    /// Bumped on every change
    pub revision: u64,
}

impl ConversationSnapshot {
    pub fn open_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_open())
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}
