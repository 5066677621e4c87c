use crate::error::{ChatError, Result};
use crate::llm::memory::MemoryLimits;
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// service settings, read from flags with environment fallbacks
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Display name used in logs and trace resources
    #[arg(long, env = "APP_NAME", default_value = "BrainBay Chatbot")]
    pub app_name: String,

    /// Deployment environment label
    #[arg(long, env = "ENVIRONMENT", default_value = "development")]
    pub environment: String,

    /// HuggingFace model repository ID
    #[arg(long, env = "MODEL_NAME", default_value = "HuggingFaceTB/SmolLM2-1.7B-Instruct")]
    pub model_name: String,

    /// Model cache directory
    #[arg(long, env = "MODEL_CACHE_DIR")]
    pub model_cache_dir: Option<PathBuf>,

    /// Memory cap for weights on an accelerator (cuda or metal)
    #[arg(long, env = "MAX_MEMORY_ACCELERATOR", default_value = "4GB")]
    pub max_memory_accelerator: String,

    /// Memory cap for weights on the cpu
    #[arg(long, env = "MAX_MEMORY_CPU", default_value = "8GB")]
    pub max_memory_cpu: String,

    /// Maximum number of tokens generated per reply
    #[arg(long, env = "MAX_NEW_TOKENS", default_value = "256")]
    pub max_new_tokens: usize,

    /// Sampling temperature
    #[arg(long, env = "TEMPERATURE", default_value = "0.7")]
    pub temperature: f64,

    /// Nucleus sampling probability mass
    #[arg(long, env = "TOP_P", default_value = "0.9")]
    pub top_p: f64,

    /// Number of past exchanges (user + assistant) kept in the prompt
    #[arg(long, env = "MAX_HISTORY", default_value = "3")]
    pub max_history: usize,

    /// Allowed CORS origins, comma separated
    #[arg(
        long,
        env = "CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:3000"
    )]
    pub cors_origins: Vec<String>,

    /// Request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "60")]
    pub request_timeout: u64,

    /// Interval between periodic memory cleanups, in seconds
    #[arg(long, env = "CLEANUP_INTERVAL_SECONDS", default_value = "60")]
    pub cleanup_interval_seconds: u64,

    /// Address the http server binds to
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,
}

impl Settings {
    pub fn generation(&self) -> GenerationSettings {
        GenerationSettings {
            max_new_tokens: self.max_new_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            max_history: self.max_history,
        }
    }

    pub fn memory_limits(&self) -> Result<MemoryLimits> {
        MemoryLimits::parse(&self.max_memory_accelerator, &self.max_memory_cpu)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    /// reject values that would make generation or the reclaimer misbehave
    pub fn validate(&self) -> Result<()> {
        if self.max_new_tokens == 0 {
            return Err(ChatError::Config("max_new_tokens must be positive".into()));
        }
        if !(self.temperature > 0.0) {
            return Err(ChatError::Config("temperature must be positive".into()));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ChatError::Config("top_p must be in (0, 1]".into()));
        }
        if self.request_timeout == 0 || self.cleanup_interval_seconds == 0 {
            return Err(ChatError::Config(
                "request_timeout and cleanup_interval_seconds must be positive".into(),
            ));
        }
        self.memory_limits()?;
        Ok(())
    }
}

/// knobs the generation service reads on every call
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub max_history: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_new_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            max_history: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        settings: Settings,
    }

    #[test]
    fn test_settings_defaults() {
        let cli = TestCli::try_parse_from(["test"]).unwrap();
        let settings = cli.settings;
        assert_eq!(settings.max_new_tokens, 256);
        assert_eq!(settings.max_history, 3);
        assert_eq!(settings.request_timeout(), Duration::from_secs(60));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_cors_origins_split() {
        let cli = TestCli::try_parse_from([
            "test",
            "--cors-origins",
            "http://a.test,http://b.test",
        ])
        .unwrap();
        assert_eq!(
            cli.settings.cors_origins,
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }

    #[test]
    fn test_settings_rejects_bad_top_p() {
        let cli = TestCli::try_parse_from(["test", "--top-p", "1.5"]).unwrap();
        assert!(matches!(cli.settings.validate(), Err(ChatError::Config(_))));
    }
}
