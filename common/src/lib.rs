pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod tracing;

pub use chat::{ChatService, Conversation, ModelContext};
pub use config::{GenerationSettings, Settings};
pub use error::{ChatError, Result};
