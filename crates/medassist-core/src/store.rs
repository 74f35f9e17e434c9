//! Ordered message log for one displayed conversation
//!
//! The store tracks which assistant message (if any) is open. Only that
//! message can be mutated after it has been appended; every other message is
//! frozen once closed.

use crate::error::StoreError;
use crate::types::{Message, MessageStatus};

#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    open: Option<usize>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn open_index(&self) -> Option<usize> {
        self.open
    }

    pub fn open_message(&self) -> Option<&Message> {
        self.open.and_then(|idx| self.messages.get(idx))
    }

    pub fn has_open(&self) -> bool {
        self.open.is_some()
    }

    /// Replace the whole log, e.g. with a loaded session transcript
    ///
    /// Loaded messages are history: anything still marked as streaming is
    /// closed as interrupted so no message ends up open.
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        for message in &mut self.messages {
            if message.is_open() {
                message.status = MessageStatus::Interrupted;
            }
        }
        self.open = None;
    }

    /// Append a message and return its index
    ///
    /// A message in the streaming state becomes the open message, which
    /// fails if one is already open.
    pub fn append(&mut self, message: Message) -> Result<usize, StoreError> {
        if message.is_open() && self.open.is_some() {
            return Err(StoreError::AlreadyOpen);
        }
        let index = self.messages.len();
        if message.is_open() {
            self.open = Some(index);
        }
        self.messages.push(message);
        Ok(index)
    }

    /// Apply a patch to the open assistant message
    pub fn mutate_open<R>(&mut self, patch: impl FnOnce(&mut Message) -> R) -> Result<R, StoreError> {
        let index = self.open.ok_or(StoreError::NoOpenMessage)?;
        let message = self
            .messages
            .get_mut(index)
            .ok_or(StoreError::NoOpenMessage)?;
        let result = patch(message);
        // The open flag is owned by the store, not by patches.
        message.status = MessageStatus::Streaming;
        Ok(result)
    }

    /// Close the open message with a terminal status
    ///
    /// Returns the index of the closed message, or `None` if nothing was open.
    pub fn close_open(&mut self, status: MessageStatus) -> Option<usize> {
        let index = self.open.take()?;
        if let Some(message) = self.messages.get_mut(index) {
            message.status = match status {
                MessageStatus::Streaming => MessageStatus::Complete,
                other => other,
            };
        }
        Some(index)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.open = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn mutate_without_open_message_fails() {
        let mut store = MessageStore::new();
        store.append(Message::user("hi")).unwrap();

        let err = store.mutate_open(|m| m.content.push('x')).unwrap_err();
        assert_eq!(err, StoreError::NoOpenMessage);
        assert_eq!(store.messages()[0].content, "hi");
    }

    #[test]
    fn only_one_message_can_be_open() {
        let mut store = MessageStore::new();
        assert_eq!(store.append(Message::assistant_open()).unwrap(), 0);
        assert_eq!(
            store.append(Message::assistant_open()).unwrap_err(),
            StoreError::AlreadyOpen
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn close_freezes_the_open_message() {
        let mut store = MessageStore::new();
        store.append(Message::user("q")).unwrap();
        store.append(Message::assistant_open()).unwrap();
        store.mutate_open(|m| m.content.push_str("answer")).unwrap();

        assert_eq!(store.close_open(MessageStatus::Complete), Some(1));
        assert!(!store.has_open());
        assert_eq!(store.messages()[1].status, MessageStatus::Complete);
        assert!(store.mutate_open(|m| m.content.push('!')).is_err());
        assert_eq!(store.close_open(MessageStatus::Complete), None);
    }

    #[test]
    fn patches_cannot_close_the_message() {
        let mut store = MessageStore::new();
        store.append(Message::assistant_open()).unwrap();
        store
            .mutate_open(|m| m.status = MessageStatus::Complete)
            .unwrap();
        assert!(store.open_message().unwrap().is_open());
    }

    #[test]
    fn replace_all_leaves_nothing_open() {
        let mut store = MessageStore::new();
        store.append(Message::assistant_open()).unwrap();

        let mut stale = Message::assistant_open();
        stale.content = "partial".into();
        store.replace_all(vec![Message::user("a"), Message::assistant("b"), stale]);

        assert_eq!(store.len(), 3);
        assert!(!store.has_open());
        assert_eq!(store.messages()[0].role, Role::User);
        assert_eq!(store.messages()[2].status, MessageStatus::Interrupted);
    }

    #[test]
    fn notice_can_follow_an_open_message() {
        let mut store = MessageStore::new();
        store.append(Message::assistant_open()).unwrap();
        let idx = store.append(Message::notice("failed")).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(store.open_index(), Some(0));
    }
}
