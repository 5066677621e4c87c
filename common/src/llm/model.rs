use crate::error::Result;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// token ids of a single, unpadded prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPrompt {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
}

impl EncodedPrompt {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// keeps the leading `max_len` tokens
    pub fn truncate(&mut self, max_len: usize) {
        self.input_ids.truncate(max_len);
        self.attention_mask.truncate(max_len);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub repetition_penalty: f32,
    pub eos_token_id: u32,
    pub pad_token_id: u32,
    pub use_cache: bool,
}

/// tokenizer side of a chat model
pub trait ChatTokenizer: Send + Sync {
    /// renders messages into a prompt that ends with the assistant's turn
    fn apply_chat_template(&self, messages: &[Message]) -> Result<String>;

    fn encode(&self, text: &str) -> Result<EncodedPrompt>;

    /// decodes ids, skipping special tokens
    fn decode(&self, ids: &[u32]) -> Result<String>;

    fn eos_token_id(&self) -> u32;

    fn pad_token_id(&self) -> Option<u32>;
}

/// a causal language model that can only be driven by one caller at a time
pub trait CausalLm: Send {
    /// returns the prompt followed by the newly generated ids
    fn generate(&mut self, prompt: &EncodedPrompt, params: &GenerationParams) -> Result<Vec<u32>>;

    /// drops any cached key/value state
    fn clear_kv_cache(&mut self) -> Result<()>;

    /// waits for queued device work and releases cached device buffers
    fn flush_device(&mut self) -> Result<()>;

    fn device_name(&self) -> &str;
}

/// a model and its tokenizer, as returned by a loader
pub struct LoadedModel {
    pub model: Box<dyn CausalLm>,
    pub tokenizer: Arc<dyn ChatTokenizer>,
}

pub trait ModelLoader: Send + Sync {
    fn load(&self, model_name: &str) -> Result<LoadedModel>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("test");
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.content, "test");
        assert_eq!(Message::assistant("x").role.as_str(), "assistant");
    }

    #[test]
    fn test_message_serializes_lowercase_role() {
        let value = serde_json::to_value(Message::system("be brief")).unwrap();
        assert_eq!(value["role"], "system");
        assert_eq!(value["content"], "be brief");
    }

    #[test]
    fn test_encoded_prompt_truncate_keeps_prefix() {
        let mut prompt = EncodedPrompt {
            input_ids: vec![1, 2, 3, 4],
            attention_mask: vec![1; 4],
        };
        prompt.truncate(2);
        assert_eq!(prompt.input_ids, vec![1, 2]);
        assert_eq!(prompt.attention_mask, vec![1, 1]);
    }
}
