use super::client::{Message, Role};
use serde_json::{json, Value};
use std::collections::VecDeque;

/// Bounded conversation history with pinned leading entries.
///
/// Trimming keeps the first `anchor_messages` entries and the most recent
/// `max_messages - anchor_messages`, dropping only the interior. The tail is
/// never shorter than two entries, so the latest user and assistant entries
/// always survive.
#[derive(Debug, Clone)]
pub struct ConversationWindow {
    messages: VecDeque<Message>,
    max_messages: usize,
    anchor_messages: usize,
}

impl ConversationWindow {
    pub fn new(max_messages: usize, anchor_messages: usize) -> Self {
        let max_messages = max_messages.max(2);
        let anchor_messages = anchor_messages.min(max_messages - 2);
        Self {
            messages: VecDeque::new(),
            max_messages,
            anchor_messages,
        }
    }

    /// 20 messages, first exchange pinned
    pub fn with_defaults() -> Self {
        Self::new(20, 2)
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn anchor_messages(&self) -> usize {
        self.anchor_messages
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push_back(message);
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.push(Message::user(content));
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.push(Message::assistant(content));
    }

    /// Append a completed user/assistant pair
    pub fn add_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.add_user_message(user);
        self.add_assistant_message(assistant);
        self.trim();
    }

    /// Drop interior entries until the window is within bound. Idempotent.
    pub fn trim(&mut self) {
        let len = self.messages.len();
        if len <= self.max_messages {
            return;
        }
        let excess = len - self.max_messages;
        let dropped: Vec<Message> = self
            .messages
            .drain(self.anchor_messages..self.anchor_messages + excess)
            .collect();
        log::debug!(
            "LLM: Trimmed {} interior messages ({} anchors kept)",
            dropped.len(),
            self.anchor_messages
        );
    }

    /// Replace the most recent assistant entry, or append one if there is none
    pub fn patch_last_assistant(&mut self, content: impl Into<String>) {
        let content = content.into();
        match self
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.role == Role::Assistant)
        {
            Some(message) => message.content = content,
            None => self.add_assistant_message(content),
        }
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// System instruction followed by the window, ready to send
    pub fn to_request(&self, system_prompt: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        messages.push(Message::system(system_prompt));
        messages.extend(self.messages.iter().cloned());
        messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Get context summary for debugging
    pub fn summary(&self) -> String {
        let chars: usize = self.messages.iter().map(|m| m.content.len()).sum();
        format!(
            "Context: {} messages, {} chars (limits: {} messages, {} anchored)",
            self.len(),
            chars,
            self.max_messages,
            self.anchor_messages
        )
    }

    /// Export the window for diagnostics
    pub fn to_json(&self) -> Value {
        json!({
            "max_messages": self.max_messages,
            "anchor_messages": self.anchor_messages,
            "messages": self.messages,
        })
    }
}

impl Default for ConversationWindow {
    fn default() -> Self {
        Self::with_defaults()
    }
}
