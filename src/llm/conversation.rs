use super::client::{ChatBackend, ReplyStream};
use super::context::ConversationWindow;
use super::prompts::SystemPrompts;

/// Conversation state driven by the turn controller.
///
/// `submit_turn` records the user entry and returns the reply stream; the
/// caller hands the assembled reply back through `complete_turn` once the
/// stream ends, so the history is only ever touched through `&mut self`.
pub trait Conversation: Send {
    fn submit_turn(&mut self, user_text: &str) -> ReplyStream;
    fn complete_turn(&mut self, reply: &str);
    fn clear_history(&mut self);
    fn patch_last_assistant_message(&mut self, text: &str);
    fn history_length(&self) -> usize;
}

/// Bounded window in front of a streaming chat backend
pub struct ConversationContext<B: ChatBackend> {
    backend: B,
    window: ConversationWindow,
    system_prompt: String,
}

impl<B: ChatBackend> ConversationContext<B> {
    pub fn new(backend: B, window: ConversationWindow) -> Self {
        Self::with_system_prompt(backend, window, SystemPrompts::voice_assistant())
    }

    pub fn with_system_prompt(
        backend: B,
        window: ConversationWindow,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            window,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn window(&self) -> &ConversationWindow {
        &self.window
    }

    pub fn add_exchange(&mut self, user: &str, assistant: &str) {
        self.window.add_exchange(user, assistant);
    }

    pub fn summary(&self) -> String {
        self.window.summary()
    }
}

impl<B: ChatBackend> Conversation for ConversationContext<B> {
    fn submit_turn(&mut self, user_text: &str) -> ReplyStream {
        self.window.add_user_message(user_text);
        self.window.trim();
        log::debug!("LLM: {}", self.window.summary());
        self.backend
            .stream_completion(self.window.to_request(&self.system_prompt))
    }

    fn complete_turn(&mut self, reply: &str) {
        // An empty reply leaves no assistant entry behind
        if reply.trim().is_empty() {
            return;
        }
        self.window.add_assistant_message(reply);
        self.window.trim();
    }

    fn clear_history(&mut self) {
        self.window.clear();
        log::info!("🧹 Conversation history cleared");
    }

    fn patch_last_assistant_message(&mut self, text: &str) {
        self.window.patch_last_assistant(text);
    }

    fn history_length(&self) -> usize {
        self.window.len()
    }
}
