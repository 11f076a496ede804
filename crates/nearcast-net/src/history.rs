//! Message history with idempotent inserts.
//!
//! The host holds the authoritative copy and snapshots its text messages
//! for SYNC_HISTORY; guests hold a derived copy replaced wholesale at
//! connection time. Either way, redelivery of an already-seen message id is
//! silently absorbed.

use std::collections::HashSet;

use uuid::Uuid;

use nearcast_shared::protocol::{Message, MessageKind};

#[derive(Default)]
pub struct HistoryLog {
    messages: Vec<Message>,
    seen: HashSet<Uuid>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message unless its id was already seen.
    /// Returns true if the message was actually added.
    pub fn insert(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Replace the whole log with the host's authoritative snapshot.
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.seen = messages.iter().map(|m| m.id).collect();
        self.messages = messages;
    }

    /// Text messages only, in order: the SYNC_HISTORY payload. File payloads
    /// are not replayable after the fact, so they stay out of the snapshot.
    pub fn text_snapshot(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| m.kind == MessageKind::Text)
            .cloned()
            .collect()
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
}
