//! Decoded messages waiting to be consumed.

use std::collections::HashMap;

use crate::bridge::protocol::{Message, MessageType};

/// At most one unconsumed message per [`MessageType`].
///
/// Inserting a message whose type is already pending replaces the older one:
/// the last arrival of a type wins and the earlier message is lost.
#[derive(Debug, Default)]
pub struct PendingMessages {
    messages: HashMap<MessageType, Message>,
}

impl PendingMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `message`, returning the message of the same type it replaced.
    pub fn insert(&mut self, message: Message) -> Option<Message> {
        let kind = message.kind();
        let replaced = self.messages.insert(kind, message);
        if replaced.is_some() {
            tracing::warn!(message_type = ?kind, "Overwrote unconsumed pending message");
        }
        replaced
    }

    pub fn take(&mut self, kind: MessageType) -> Option<Message> {
        self.messages.remove(&kind)
    }

    pub fn contains(&self, kind: MessageType) -> bool {
        self.messages.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
