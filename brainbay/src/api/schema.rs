use crate::api::error::ApiError;
use common::llm::Message;
use common::Conversation;
use serde::{Deserialize, Serialize};

pub const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
}

impl From<HistoryEntry> for Message {
    fn from(entry: HistoryEntry) -> Self {
        match entry.role {
            HistoryRole::User => Message::user(entry.content),
            HistoryRole::Assistant => Message::assistant(entry.content),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl ChatRequest {
    /// checks the message bounds and returns the trimmed message with its history
    pub fn validate(self) -> Result<(String, Conversation), ApiError> {
        let chars = self.message.chars().count();
        if chars == 0 || chars > MAX_MESSAGE_CHARS {
            return Err(ApiError::Validation(format!(
                "message must be between 1 and {} characters",
                MAX_MESSAGE_CHARS
            )));
        }

        let message = self.message.trim();
        if message.is_empty() {
            return Err(ApiError::Validation(
                "message cannot be empty or whitespace".to_string(),
            ));
        }

        let history = self.history.into_iter().map(Message::from).collect::<Vec<_>>();
        Ok((message.to_string(), Conversation::new(history)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
}
