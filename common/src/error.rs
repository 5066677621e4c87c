use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("model not initialized")]
    Uninitialized,

    #[error("model download failed: {0}")]
    ModelDownload(String),

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("chat template error: {0}")]
    Template(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("memory cleanup failed: {0}")]
    Cleanup(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("tracing initialization failed: {0}")]
    Tracing(String),
}

impl From<candle_core::Error> for ChatError {
    fn from(e: candle_core::Error) -> Self {
        ChatError::Generation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
