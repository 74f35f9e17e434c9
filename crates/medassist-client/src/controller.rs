//! Conversation controller
//!
//! Drives one conversation: appends the user turn, reads the backend reply
//! through the stream decoder, applies each increment to the message store and
//! announces every change on a broadcast channel.
//!
//! Only one request (turn or session load) runs at a time. A submission or
//! resume while one is in flight is rejected with [`ChatError::Busy`].
//! [`ConversationController::cancel`] and [`ConversationController::clear`]
//! abort the in-flight read. Each request carries a generation number; an
//! increment from an older generation is discarded, so a read that settles
//! after a clear never touches the new store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use medassist_config::AssistantConfig;
use medassist_core::{
    ActivityState, ChatError, ChatResult, LogItem, Message, MessageStatus, MessageStore,
    PatientReference, SessionId, StreamDecoder, StreamEvent, TokenUsage, ToolResultOutcome,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{ChatBackend, TurnRequest, TurnResponse};
use crate::events::{ConversationEvent, ConversationSnapshot};
use crate::http::HttpBackend;
use crate::layout::PanelLayout;
use crate::session::{SessionContext, SessionSynchronizer};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Where the conversation is in its request cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationPhase {
    #[default]
    Idle,
    /// Fetching a persisted session
    LoadingSession,
    /// Turn sent, no increment applied yet
    AwaitingResponse,
    /// An assistant message is open and receiving increments
    Streaming,
    /// The last stream broke off mid-message
    Error,
}

impl ConversationPhase {
    /// A request is in flight
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ConversationPhase::LoadingSession
                | ConversationPhase::AwaitingResponse
                | ConversationPhase::Streaming
        )
    }
}

/// How a submitted turn ended
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed,
    /// The failure is already in the store as a notice
    Failed(ChatError),
    /// Aborted by `cancel`, `clear`, or `new_session`
    Cancelled,
    /// A newer request took over before this one settled
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    Resumed { count: usize },
    /// The session could not be loaded; the conversation starts empty
    Fresh,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Ask for an event stream rather than a single reply
    pub stream: bool,
    /// Fail a stream that delivers nothing for this long
    pub stall_timeout: Option<Duration>,
    pub layout: PanelLayout,
    pub patient_id: Option<i64>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            stream: true,
            stall_timeout: Some(DEFAULT_STALL_TIMEOUT),
            layout: PanelLayout::default(),
            patient_id: None,
        }
    }
}

impl ControllerOptions {
    pub fn from_config(config: &AssistantConfig) -> Self {
        Self {
            stream: config.backend.stream,
            stall_timeout: config.backend.stall_timeout(),
            layout: PanelLayout::from_config(&config.panel),
            patient_id: None,
        }
    }
}

struct State {
    phase: ConversationPhase,
    store: MessageStore,
    activity: ActivityState,
    session: SessionContext,
    layout: PanelLayout,
    last_error: Option<ChatError>,
    revision: u64,
    generation: u64,
    in_flight: Option<CancellationToken>,
}

/// Result of applying one increment
enum Flow {
    Continue,
    Completed,
    Failed(ChatError),
    Superseded,
}

/// Interrupts the request if its future is dropped before settling
struct InFlightGuard<'a> {
    controller: &'a ConversationController,
    generation: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.controller.abandon(self.generation);
    }
}

/// Cloneable handle to one conversation
#[derive(Clone)]
pub struct ConversationController {
    backend: Arc<dyn ChatBackend>,
    sessions: SessionSynchronizer,
    options: ControllerOptions,
    state: Arc<Mutex<State>>,
    events: broadcast::Sender<ConversationEvent>,
}

impl ConversationController {
    pub fn new(backend: Arc<dyn ChatBackend>, options: ControllerOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state = State {
            phase: ConversationPhase::Idle,
            store: MessageStore::new(),
            activity: ActivityState::default(),
            session: SessionContext::new(None, options.patient_id),
            layout: options.layout,
            last_error: None,
            revision: 0,
            generation: 0,
            in_flight: None,
        };
        Self {
            sessions: SessionSynchronizer::new(backend.clone()),
            backend,
            options,
            state: Arc::new(Mutex::new(state)),
            events,
        }
    }

    /// Controller talking HTTP to the configured backend
    pub fn from_config(config: &AssistantConfig) -> Self {
        let backend = Arc::new(HttpBackend::new(config.backend.clone()));
        Self::new(backend, ControllerOptions::from_config(config))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        let state = self.state.lock();
        ConversationSnapshot {
            phase: state.phase,
            messages: state.store.messages().to_vec(),
            activity: state.activity.clone(),
            session: state.session.clone(),
            layout: state.layout,
            last_error: state.last_error.clone(),
            revision: state.revision,
        }
    }

    pub fn phase(&self) -> ConversationPhase {
        self.state.lock().phase
    }

    pub fn session(&self) -> SessionContext {
        self.state.lock().session.clone()
    }

    pub fn layout(&self) -> PanelLayout {
        self.state.lock().layout
    }

    /// Replace the panel layout with `update(current)`
    pub fn update_layout(&self, update: impl FnOnce(PanelLayout) -> PanelLayout) -> PanelLayout {
        let mut state = self.state.lock();
        let layout = update(state.layout);
        if layout != state.layout {
            state.layout = layout;
            self.emit(&mut state, ConversationEvent::LayoutChanged(layout));
        }
        layout
    }

    /// Scope subsequent turns to a patient
    pub fn set_patient(&self, patient_id: Option<i64>) {
        let mut state = self.state.lock();
        if state.session.patient_id != patient_id {
            state.session.patient_id = patient_id;
            let session = state.session.clone();
            self.emit(&mut state, ConversationEvent::SessionChanged(session));
        }
    }

    /// Send a user turn and apply the reply
    ///
    /// Empty input and submissions while busy are rejected without touching
    /// the store. Every other failure is reported in the store as a notice
    /// and returned as [`TurnOutcome::Failed`].
    pub async fn submit(&self, text: &str) -> ChatResult<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let (generation, token, request) = {
            let mut state = self.state.lock();
            if state.phase.is_busy() {
                debug!(phase = ?state.phase, "Rejecting submission while busy");
                return Err(ChatError::Busy);
            }

            let message = Message::user(text);
            let index = state.store.append(message.clone())?;
            self.emit(
                &mut state,
                ConversationEvent::MessageAppended {
                    index,
                    message: Box::new(message),
                },
            );

            state.generation += 1;
            let token = CancellationToken::new();
            state.in_flight = Some(token.clone());
            state.last_error = None;
            self.set_phase(&mut state, ConversationPhase::AwaitingResponse);

            let request = TurnRequest {
                message: text.to_string(),
                patient_id: state.session.patient_id,
                session_id: state.session.session_id.clone(),
                stream: self.options.stream,
            };
            (state.generation, token, request)
        };

        let _guard = InFlightGuard {
            controller: self,
            generation,
        };

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(TurnOutcome::Cancelled),
            result = self.run_turn(generation, request) => result,
        };

        match result {
            Ok(Flow::Completed) | Ok(Flow::Continue) => Ok(TurnOutcome::Completed),
            Ok(Flow::Failed(error)) => Ok(TurnOutcome::Failed(error)),
            Ok(Flow::Superseded) => Ok(TurnOutcome::Superseded),
            Err(error) => {
                let mut state = self.state.lock();
                if state.generation != generation {
                    return Ok(TurnOutcome::Superseded);
                }
                warn!(error = %error, "Turn failed");
                let phase = if state.store.has_open() {
                    ConversationPhase::Error
                } else {
                    ConversationPhase::Idle
                };
                self.fail_turn(&mut state, &error, phase);
                Ok(TurnOutcome::Failed(error))
            }
        }
    }

    async fn run_turn(&self, generation: u64, request: TurnRequest) -> ChatResult<Flow> {
        let response = match self.options.stall_timeout {
            Some(limit) => tokio::time::timeout(limit, self.backend.send_turn(request))
                .await
                .map_err(|_| ChatError::StreamStalled(limit))??,
            None => self.backend.send_turn(request).await?,
        };
        match response {
            TurnResponse::Complete(reply) => {
                debug!("Applying non-streaming reply");
                Ok(self.apply_all(generation, reply.into_events()))
            }
            TurnResponse::Streaming(mut body) => {
                let mut decoder = StreamDecoder::new();
                loop {
                    let next = match self.options.stall_timeout {
                        Some(limit) => tokio::time::timeout(limit, body.next())
                            .await
                            .map_err(|_| ChatError::StreamStalled(limit))?,
                        None => body.next().await,
                    };
                    let chunk = match next {
                        Some(chunk) => chunk?,
                        None => break,
                    };
                    match self.apply_all(generation, decoder.feed(&chunk)) {
                        Flow::Continue => {}
                        settled => return Ok(settled),
                    }
                }

                if decoder.malformed_count() > 0 {
                    debug!(dropped = decoder.malformed_count(), "Stream had malformed frames");
                }
                match self.apply_all(generation, decoder.finish()) {
                    Flow::Continue => {}
                    settled => return Ok(settled),
                }
                debug!("Stream closed without a terminal frame");
                Ok(self.apply(generation, StreamEvent::done()))
            }
        }
    }

    fn apply_all(&self, generation: u64, events: Vec<StreamEvent>) -> Flow {
        for event in events {
            match self.apply(generation, event) {
                Flow::Continue => {}
                settled => return settled,
            }
        }
        Flow::Continue
    }

    /// Apply one increment in arrival order
    fn apply(&self, generation: u64, event: StreamEvent) -> Flow {
        let mut state = self.state.lock();
        if state.generation != generation {
            return Flow::Superseded;
        }

        match event {
            StreamEvent::Done {
                session_id,
                message_id,
                patient_references,
            } => {
                self.complete_turn(&mut state, session_id, message_id, patient_references);
                Flow::Completed
            }
            StreamEvent::Error { message, code } => {
                let error = ChatError::Backend { message, code };
                warn!(error = %error, "Backend ended the turn with an error");
                self.fail_turn(&mut state, &error, ConversationPhase::Idle);
                Flow::Failed(error)
            }
            // Activity describes the backend, not the reply; it never opens a message
            StreamEvent::Activity { phase, detail } => {
                state.activity = ActivityState::new(phase, detail);
                let activity = state.activity.clone();
                self.emit(&mut state, ConversationEvent::ActivityChanged(activity));
                Flow::Continue
            }
            increment => {
                self.apply_increment(&mut state, increment);
                Flow::Continue
            }
        }
    }

    fn apply_increment(&self, state: &mut State, event: StreamEvent) {
        let Some(index) = self.ensure_open(state) else {
            return;
        };

        match event {
            StreamEvent::Text { content } => {
                if self.patch_open(state, |m| m.content.push_str(&content)).is_some() {
                    self.emit(state, ConversationEvent::ContentDelta { index, delta: content });
                }
            }
            StreamEvent::Reasoning { content } => {
                if self.patch_open(state, |m| m.push_reasoning(&content)).is_some() {
                    self.emit(state, ConversationEvent::ReasoningDelta { index, delta: content });
                }
            }
            StreamEvent::ToolCall { id, name, arguments } => {
                match self.patch_open(state, |m| m.upsert_tool_call(&id, &name, arguments)) {
                    Some(true) => self.emit_tool_call(state, index, &id),
                    Some(false) => warn!(call = %id, "Ignoring update to a finished tool call"),
                    None => {}
                }
            }
            StreamEvent::ToolResult { id, result } => {
                match self.patch_open(state, |m| m.set_tool_result(&id, result)) {
                    Some(ToolResultOutcome::Applied) => self.emit_tool_call(state, index, &id),
                    Some(ToolResultOutcome::AlreadySet) => {
                        warn!(call = %id, "Ignoring second result for tool call")
                    }
                    Some(ToolResultOutcome::UnknownCall) => {
                        warn!(call = %id, "Ignoring result for unknown tool call")
                    }
                    None => {}
                }
            }
            StreamEvent::Log {
                message,
                level,
                timestamp,
            } => {
                let item = LogItem {
                    level,
                    message,
                    timestamp: timestamp.unwrap_or_else(Utc::now),
                };
                if self.patch_open(state, |m| m.logs.push(item)).is_some() {
                    self.emit(state, ConversationEvent::OpenMessageUpdated { index });
                }
            }
            StreamEvent::Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens,
            } => {
                let usage = TokenUsage::new(prompt_tokens, completion_tokens, total_tokens);
                if self.patch_open(state, |m| m.usage = Some(usage)).is_some() {
                    self.emit(state, ConversationEvent::OpenMessageUpdated { index });
                }
            }
            StreamEvent::Done { .. } | StreamEvent::Error { .. } | StreamEvent::Activity { .. } => {
                error!("Frame routed to increment handling");
            }
        }
    }

    fn emit_tool_call(&self, state: &mut State, index: usize, id: &str) {
        let call = state
            .store
            .get(index)
            .and_then(|m| m.tool_call(id))
            .cloned();
        if let Some(call) = call {
            self.emit(state, ConversationEvent::ToolCallUpdated { index, call });
        }
    }

    /// Index of the open assistant message, creating it on the first increment
    fn ensure_open(&self, state: &mut State) -> Option<usize> {
        if let Some(index) = state.store.open_index() {
            return Some(index);
        }
        let message = Message::assistant_open();
        match state.store.append(message.clone()) {
            Ok(index) => {
                self.emit(
                    state,
                    ConversationEvent::MessageAppended {
                        index,
                        message: Box::new(message),
                    },
                );
                self.set_phase(state, ConversationPhase::Streaming);
                Some(index)
            }
            Err(e) => {
                error!(error = %e, "Could not open assistant message");
                None
            }
        }
    }

    fn patch_open<R>(&self, state: &mut State, patch: impl FnOnce(&mut Message) -> R) -> Option<R> {
        match state.store.mutate_open(patch) {
            Ok(result) => Some(result),
            Err(e) => {
                error!(error = %e, "Increment arrived without an open message");
                None
            }
        }
    }

    fn complete_turn(
        &self,
        state: &mut State,
        session_id: Option<SessionId>,
        message_id: Option<String>,
        patient_references: Vec<PatientReference>,
    ) {
        if state.store.has_open() {
            let dropped = self.patch_open(state, |m| {
                if let Some(id) = message_id {
                    m.id = id;
                }
                m.attach_patient_references(patient_references)
            });
            if let Some(dropped) = dropped.filter(|d| *d > 0) {
                warn!(dropped, "Dropped patient references outside the message content");
            }
            if let Some(index) = state.store.close_open(MessageStatus::Complete) {
                self.emit(
                    state,
                    ConversationEvent::MessageClosed {
                        index,
                        status: MessageStatus::Complete,
                    },
                );
            }
        } else {
            debug!("Turn completed without any increments");
        }

        if state.session.adopt(session_id) {
            let session = state.session.clone();
            self.emit(state, ConversationEvent::SessionChanged(session));
        }
        self.reset_activity(state);
        state.in_flight = None;
        self.set_phase(state, ConversationPhase::Idle);
    }

    /// Close any partial message and append a notice for `error`
    fn fail_turn(&self, state: &mut State, error: &ChatError, phase: ConversationPhase) {
        if let Some(index) = state.store.close_open(MessageStatus::Interrupted) {
            self.emit(
                state,
                ConversationEvent::MessageClosed {
                    index,
                    status: MessageStatus::Interrupted,
                },
            );
        }
        if error.is_user_visible() {
            self.append_notice(state, error);
        }
        state.last_error = Some(error.clone());
        self.reset_activity(state);
        state.in_flight = None;
        self.set_phase(state, phase);
    }

    fn append_notice(&self, state: &mut State, error: &ChatError) {
        let notice = Message::notice(error.user_notice());
        match state.store.append(notice.clone()) {
            Ok(index) => self.emit(
                state,
                ConversationEvent::MessageAppended {
                    index,
                    message: Box::new(notice),
                },
            ),
            Err(e) => error!(error = %e, "Could not append failure notice"),
        }
    }

    /// Abort the in-flight request, keeping whatever content arrived
    ///
    /// Returns false when nothing was in flight.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        let Some(token) = state.in_flight.take() else {
            return false;
        };
        token.cancel();
        state.generation += 1;
        info!("Cancelled in-flight request");
        self.interrupt(&mut state);
        true
    }

    /// Called when a request future goes away without settling
    fn abandon(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        if let Some(token) = state.in_flight.take() {
            token.cancel();
            state.generation += 1;
            debug!("Request dropped before it settled");
            self.interrupt(&mut state);
        }
    }

    fn interrupt(&self, state: &mut State) {
        if let Some(index) = state.store.close_open(MessageStatus::Interrupted) {
            self.emit(
                state,
                ConversationEvent::MessageClosed {
                    index,
                    status: MessageStatus::Interrupted,
                },
            );
        }
        self.reset_activity(state);
        self.set_phase(state, ConversationPhase::Idle);
    }

    /// Empty the local transcript; server history and the session id are kept
    pub fn clear(&self) {
        let mut state = self.state.lock();
        self.reset(&mut state);
    }

    fn reset(&self, state: &mut State) {
        if let Some(token) = state.in_flight.take() {
            token.cancel();
        }
        state.generation += 1;
        state.store.clear();
        state.last_error = None;
        self.emit(state, ConversationEvent::Cleared);
        self.reset_activity(state);
        self.set_phase(state, ConversationPhase::Idle);
    }

    /// Start over without a session id; the patient scope is kept
    pub fn new_session(&self) {
        let mut state = self.state.lock();
        self.reset(&mut state);
        let context = self.sessions.new_session(state.session.patient_id);
        if context != state.session {
            state.session = context.clone();
            self.emit(&mut state, ConversationEvent::SessionChanged(context));
        }
    }

    /// Clear locally and delete the current session on the server
    pub async fn clear_server_history(&self) -> ChatResult<()> {
        let id = {
            let mut state = self.state.lock();
            self.reset(&mut state);
            state.session.session_id.clone()
        };
        let Some(id) = id else {
            debug!("No session to delete");
            return Ok(());
        };

        self.sessions.delete(&id).await?;

        let mut state = self.state.lock();
        if state.session.session_id.as_ref() == Some(&id) {
            state.session.session_id = None;
            let session = state.session.clone();
            self.emit(&mut state, ConversationEvent::SessionChanged(session));
        }
        Ok(())
    }

    /// Load a persisted session into the store
    ///
    /// A session that cannot be loaded leaves an empty conversation with no
    /// session id; only failures other than not-found add a notice.
    pub async fn resume(&self, id: SessionId) -> ChatResult<ResumeOutcome> {
        let (generation, token) = {
            let mut state = self.state.lock();
            if state.phase.is_busy() {
                return Err(ChatError::Busy);
            }
            state.generation += 1;
            let token = CancellationToken::new();
            state.in_flight = Some(token.clone());
            self.set_phase(&mut state, ConversationPhase::LoadingSession);
            (state.generation, token)
        };

        let _guard = InFlightGuard {
            controller: self,
            generation,
        };

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(ResumeOutcome::Cancelled),
            result = self.sessions.resume(&id) => result,
        };

        let mut state = self.state.lock();
        if state.generation != generation {
            return Ok(ResumeOutcome::Cancelled);
        }
        state.in_flight = None;
        self.reset_activity(&mut state);

        match result {
            Ok(session) => {
                let count = session.install(&mut state.store);
                state.last_error = None;
                self.emit(&mut state, ConversationEvent::StoreReplaced { len: count });
                state.session.session_id = Some(id);
                let context = state.session.clone();
                self.emit(&mut state, ConversationEvent::SessionChanged(context));
                self.set_phase(&mut state, ConversationPhase::Idle);
                Ok(ResumeOutcome::Resumed { count })
            }
            Err(error) => {
                warn!(session = %id, error = %error, "Falling back to a fresh session");
                state.store.clear();
                self.emit(&mut state, ConversationEvent::Cleared);
                state.session.session_id = None;
                let context = state.session.clone();
                self.emit(&mut state, ConversationEvent::SessionChanged(context));
                if !matches!(error, ChatError::SessionNotFound(_)) {
                    if error.is_user_visible() {
                        self.append_notice(&mut state, &error);
                    }
                    state.last_error = Some(error);
                }
                self.set_phase(&mut state, ConversationPhase::Idle);
                Ok(ResumeOutcome::Fresh)
            }
        }
    }

    fn reset_activity(&self, state: &mut State) {
        if state.activity != ActivityState::default() {
            state.activity = ActivityState::default();
            self.emit(state, ConversationEvent::ActivityChanged(ActivityState::default()));
        }
    }

    fn set_phase(&self, state: &mut State, phase: ConversationPhase) {
        if state.phase != phase {
            debug!(from = ?state.phase, to = ?phase, "Conversation phase changed");
            state.phase = phase;
            self.emit(state, ConversationEvent::PhaseChanged(phase));
        }
    }

    fn emit(&self, state: &mut State, event: ConversationEvent) {
        state.revision += 1;
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
