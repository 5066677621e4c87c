use crate::llm::model::Message;

/// prior turns of a chat, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
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

    /// the most recent `max_history` exchanges, two entries each
    pub fn window(&self, max_history: usize) -> &[Message] {
        let keep = max_history.saturating_mul(2);
        let start = self.messages.len().saturating_sub(keep);
        &self.messages[start..]
    }

    /// windowed history followed by the new user turn
    pub fn prompt_messages(&self, max_history: usize, user_message: &str) -> Vec<Message> {
        let window = self.window(max_history);
        let mut messages = Vec::with_capacity(window.len() + 1);
        messages.extend_from_slice(window);
        messages.push(Message::user(user_message));
        messages
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self::new(messages)
    }
}
