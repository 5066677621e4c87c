pub mod cleanup;
pub mod context;
pub mod conversation;
pub mod service;

pub use cleanup::PeriodicCleanup;
pub use context::ModelContext;
pub use conversation::Conversation;
pub use service::{ChatService, FALLBACK_RESPONSE, MAX_INPUT_TOKENS, REPETITION_PENALTY};
