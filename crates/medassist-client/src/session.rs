//! Session synchronizer
//!
//! Owns the link between a server session id and its persisted transcript.
//! Loading a transcript is the only path that bulk-replaces the message store.

use std::sync::Arc;

use medassist_core::{ChatResult, Message, MessageStore, SessionId};
use tracing::{debug, info, warn};

use crate::backend::ChatBackend;

/// Server session id plus the patient scope attached to outgoing turns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: Option<SessionId>,
    pub patient_id: Option<i64>,
}

impl SessionContext {
    pub fn new(session_id: Option<SessionId>, patient_id: Option<i64>) -> Self {
        Self {
            session_id,
            patient_id,
        }
    }

    /// Take over an id reported by a completion frame
    ///
    /// Returns true when the context changed.
    pub fn adopt(&mut self, reported: Option<SessionId>) -> bool {
        let Some(reported) = reported else {
            return false;
        };
        match &self.session_id {
            Some(current) if *current == reported => false,
            Some(current) => {
                warn!(current = %current, reported = %reported, "Backend switched session id");
                self.session_id = Some(reported);
                true
            }
            None => {
                debug!(session = %reported, "Backend assigned session id");
                self.session_id = Some(reported);
                true
            }
        }
    }
}

/// Transcript loaded for a session
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedSession {
    pub id: SessionId,
    pub messages: Vec<Message>,
}

impl PersistedSession {
    /// Replace the store contents with this transcript; returns the message count
    pub fn install(self, store: &mut MessageStore) -> usize {
        let count = self.messages.len();
        store.replace_all(self.messages);
        count
    }
}

#[derive(Clone)]
pub struct SessionSynchronizer {
    backend: Arc<dyn ChatBackend>,
}

impl SessionSynchronizer {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    /// Fetch the full ordered history of `id`
    pub async fn resume(&self, id: &SessionId) -> ChatResult<PersistedSession> {
        let persisted = self.backend.fetch_session(id).await?;
        let total = persisted.len();
        let messages: Vec<Message> = persisted
            .into_iter()
            .filter_map(|m| m.into_message())
            .collect();
        info!(session = %id, messages = messages.len(), skipped = total - messages.len(), "Resumed session");
        Ok(PersistedSession {
            id: id.clone(),
            messages,
        })
    }

    /// A fresh context; the id stays unset until the backend assigns one
    pub fn new_session(&self, patient_id: Option<i64>) -> SessionContext {
        SessionContext::new(None, patient_id)
    }

    pub async fn delete(&self, id: &SessionId) -> ChatResult<()> {
        self.backend.delete_session(id).await?;
        info!(session = %id, "Deleted server session history");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adopt_takes_first_id_and_ignores_repeats() {
        let mut context = SessionContext::default();
        assert!(!context.adopt(None));
        assert!(context.adopt(Some(SessionId::Numeric(3))));
        assert!(!context.adopt(Some(SessionId::Numeric(3))));
        assert!(context.adopt(Some(SessionId::Numeric(4))));
        assert_eq!(context.session_id, Some(SessionId::Numeric(4)));
    }

    #[test]
    fn install_replaces_store() {
        let mut store = MessageStore::new();
        store.append(Message::user("old")).unwrap();
        let session = PersistedSession {
            id: SessionId::Numeric(1),
            messages: vec![Message::user("a"), Message::assistant("b")],
        };
        assert_eq!(session.install(&mut store), 2);
        assert_eq!(store.len(), 2);
        assert!(!store.has_open());
        assert_eq!(store.messages()[0].content, "a");
    }
}
