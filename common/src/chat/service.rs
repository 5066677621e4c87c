use crate::chat::conversation::Conversation;
use crate::config::GenerationSettings;
use crate::error::{ChatError, Result};
use crate::llm::memory::release_heap;
use crate::llm::model::{CausalLm, ChatTokenizer, GenerationParams};
use std::sync::Arc;
use tokio::sync::Mutex;

/// prompts longer than this are cut from the end
pub const MAX_INPUT_TOKENS: usize = 2048;
pub const REPETITION_PENALTY: f32 = 1.1;
pub const FALLBACK_RESPONSE: &str =
    "I'm not sure how to respond to that. Could you rephrase your question?";

const DEEP_CLEAN_PASSES: usize = 3;

/// single-flight chat generation over a shared model
pub struct ChatService {
    // tokio's mutex queues waiters in arrival order
    model: Arc<Mutex<Box<dyn CausalLm>>>,
    tokenizer: Arc<dyn ChatTokenizer>,
    settings: GenerationSettings,
}

impl ChatService {
    pub fn new(
        model: Box<dyn CausalLm>,
        tokenizer: Arc<dyn ChatTokenizer>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
            tokenizer,
            settings,
        }
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    fn params(&self) -> GenerationParams {
        let eos_token_id = self.tokenizer.eos_token_id();
        GenerationParams {
            max_new_tokens: self.settings.max_new_tokens,
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
            repetition_penalty: REPETITION_PENALTY,
            eos_token_id,
            pad_token_id: self.tokenizer.pad_token_id().unwrap_or(eos_token_id),
            use_cache: false,
        }
    }

    /// renders the windowed history plus `message` through the chat template
    pub fn build_prompt(&self, message: &str, history: &Conversation) -> Result<String> {
        let messages = history.prompt_messages(self.settings.max_history, message);
        self.tokenizer.apply_chat_template(&messages)
    }

    #[tracing::instrument(skip(self, message, history), fields(message_len = message.len(), history_len = history.len()))]
    pub async fn chat(&self, message: &str, history: &Conversation) -> Result<String> {
        let mut encoded = match self
            .build_prompt(message, history)
            .and_then(|prompt| self.tokenizer.encode(&prompt))
        {
            Ok(encoded) => encoded,
            Err(e) => {
                // nothing reached the model yet, only the heap needs collecting
                release_heap();
                tracing::error!("error while preparing prompt: {}", e);
                return Err(e);
            }
        };
        if encoded.len() > MAX_INPUT_TOKENS {
            tracing::warn!(
                tokens = encoded.len(),
                "prompt exceeds {} tokens, truncating",
                MAX_INPUT_TOKENS
            );
            encoded.truncate(MAX_INPUT_TOKENS);
        }
        let params = self.params();
        let tokenizer = Arc::clone(&self.tokenizer);

        let guard = Arc::clone(&self.model).lock_owned().await;
        tracing::debug!(prompt_tokens = encoded.len(), "acquired generation slot");

        // the guard travels with the blocking task, so the slot stays held
        // until generation returns even if the caller stops waiting
        let result = tokio::task::spawn_blocking(move || {
            let mut model = guard;
            let output = model
                .generate(&encoded, &params)
                .and_then(|ids| tokenizer.decode(ids.get(encoded.len()..).unwrap_or_default()));

            drop(encoded);
            if let Err(e) = model.flush_device() {
                tracing::warn!("error during cleanup: {}", e);
            }
            release_heap();
            output
        })
        .await
        .map_err(|e| ChatError::Generation(format!("generation task failed: {}", e)))?;

        match result {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    tracing::info!("model produced an empty reply, using fallback");
                    Ok(FALLBACK_RESPONSE.to_string())
                } else {
                    Ok(text.to_string())
                }
            }
            Err(e) => {
                tracing::error!("error while generating response: {}", e);
                Err(e)
            }
        }
    }

    /// resets cached model state, flushes the device and collects the heap
    ///
    /// every step runs even when an earlier one fails; the first error is returned
    pub async fn clear_memory(&self) -> Result<()> {
        let guard = Arc::clone(&self.model).lock_owned().await;

        let first_error = tokio::task::spawn_blocking(move || {
            let mut model = guard;
            let mut first_error = None;

            if let Err(e) = model.clear_kv_cache() {
                tracing::warn!("error resetting model cache: {}", e);
                first_error.get_or_insert(e);
            }
            if let Err(e) = model.flush_device() {
                tracing::warn!("error flushing device: {}", e);
                first_error.get_or_insert(e);
            }
            drop(model);

            for _ in 0..DEEP_CLEAN_PASSES {
                release_heap();
            }
            first_error
        })
        .await
        .map_err(|e| ChatError::Cleanup(format!("cleanup task failed: {}", e)))?;

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::debug!("memory cleared");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::fake::{EchoModel, EchoTokenizer, ModelStats};
    use crate::llm::memory::heap_releases;
    use crate::llm::model::{EncodedPrompt, Message};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn service(stats: &Arc<ModelStats>, settings: GenerationSettings) -> ChatService {
        ChatService::new(
            Box::new(EchoModel::new(Arc::clone(stats))),
            Arc::new(EchoTokenizer::new()),
            settings,
        )
    }

    /// echo tokenizer whose chat template never renders
    struct BrokenTemplate(EchoTokenizer);

    impl ChatTokenizer for BrokenTemplate {
        fn apply_chat_template(&self, _messages: &[Message]) -> Result<String> {
            Err(ChatError::Template("undefined variable".into()))
        }

        fn encode(&self, text: &str) -> Result<EncodedPrompt> {
            self.0.encode(text)
        }

        fn decode(&self, ids: &[u32]) -> Result<String> {
            self.0.decode(ids)
        }

        fn eos_token_id(&self) -> u32 {
            self.0.eos_token_id()
        }

        fn pad_token_id(&self) -> Option<u32> {
            self.0.pad_token_id()
        }
    }

    #[tokio::test]
    async fn test_chat_returns_trimmed_new_tokens_only() {
        let stats = ModelStats::new();
        let svc = service(&stats, GenerationSettings::default());

        let prompt = svc.build_prompt("Hello", &Conversation::default()).unwrap();
        assert_eq!(prompt, "<|im_start|>user\nHello<|im_end|>\n<|im_start|>assistant\n");

        let reply = svc.chat("Hello", &Conversation::default()).await.unwrap();
        assert_eq!(reply, format!("echo:{}", prompt.len()));
    }

    #[tokio::test]
    async fn test_chat_passes_fixed_generation_params() {
        let stats = ModelStats::new();
        let svc = service(&stats, GenerationSettings::default());
        svc.chat("hi", &Conversation::default()).await.unwrap();

        let params = stats.last_params.lock().unwrap().clone().unwrap();
        assert_eq!(params.repetition_penalty, 1.1);
        assert_eq!(params.max_new_tokens, 256);
        assert!(!params.use_cache);
        // no pad token: falls back to eos
        assert_eq!(params.pad_token_id, params.eos_token_id);
        assert_eq!(stats.flush_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chat_prompt_only_contains_recent_history() {
        let stats = ModelStats::new();
        let settings = GenerationSettings {
            max_history: 1,
            ..GenerationSettings::default()
        };
        let svc = service(&stats, settings);
        let history = Conversation::new(vec![
            Message::user("old question"),
            Message::assistant("old answer"),
            Message::user("recent question"),
            Message::assistant("recent answer"),
        ]);

        svc.chat("now", &history).await.unwrap();

        let prompt = stats.last_prompt.lock().unwrap().clone().unwrap();
        let text = EchoTokenizer::new().decode(&prompt.input_ids).unwrap();
        assert!(!text.contains("old question"));
        assert!(!text.contains("old answer"));
        assert!(text.contains("recent question"));
        assert!(text.contains("recent answer"));
        assert!(text.contains("now"));
    }

    #[tokio::test]
    async fn test_chat_truncates_long_prompts() {
        let stats = ModelStats::new();
        let svc = service(&stats, GenerationSettings::default());
        let long = "x".repeat(MAX_INPUT_TOKENS * 2);

        svc.chat(&long, &Conversation::default()).await.unwrap();

        let prompt = stats.last_prompt.lock().unwrap().clone().unwrap();
        assert_eq!(prompt.len(), MAX_INPUT_TOKENS);
        assert_eq!(prompt.attention_mask.len(), MAX_INPUT_TOKENS);
    }

    #[tokio::test]
    async fn test_empty_reply_uses_fallback() {
        let stats = ModelStats::new();
        stats.silent.store(true, Ordering::SeqCst);
        let svc = service(&stats, GenerationSettings::default());

        let reply = svc.chat("hi", &Conversation::default()).await.unwrap();
        assert_eq!(reply, FALLBACK_RESPONSE);
    }

    #[tokio::test]
    async fn test_generation_failure_propagates() {
        let stats = ModelStats::new();
        stats.fail_generation.store(true, Ordering::SeqCst);
        let svc = service(&stats, GenerationSettings::default());

        let err = svc.chat("hi", &Conversation::default()).await.unwrap_err();
        assert!(matches!(err, ChatError::Generation(_)));
        // cleanup still ran
        assert_eq!(stats.flush_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_chats_never_overlap() {
        let stats = ModelStats::new().with_delay(Duration::from_millis(20));
        let svc = Arc::new(service(&stats, GenerationSettings::default()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let svc = Arc::clone(&svc);
            handles.push(tokio::spawn(async move {
                svc.chat(&format!("message {}", i), &Conversation::default())
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(stats.generate_calls(), 8);
        assert_eq!(stats.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_clear_memory_without_generation() {
        let stats = ModelStats::new();
        let svc = service(&stats, GenerationSettings::default());

        svc.clear_memory().await.unwrap();
        svc.clear_memory().await.unwrap();
        assert_eq!(stats.clear_calls(), 2);
    }

    #[tokio::test]
    async fn test_template_failure_propagates_and_collects_heap() {
        let stats = ModelStats::new();
        let svc = ChatService::new(
            Box::new(EchoModel::new(Arc::clone(&stats))),
            Arc::new(BrokenTemplate(EchoTokenizer::new())),
            GenerationSettings::default(),
        );
        let before = heap_releases();

        let err = svc.chat("hi", &Conversation::default()).await.unwrap_err();
        assert!(matches!(err, ChatError::Template(_)));
        assert!(heap_releases() > before);
        assert_eq!(stats.generate_calls(), 0);

        // the generation slot was never taken
        svc.chat("hi", &Conversation::default()).await.unwrap_err();
        svc.clear_memory().await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_memory_runs_every_step_after_a_failure() {
        let stats = ModelStats::new();
        stats.clear_failures.store(1, Ordering::SeqCst);
        let svc = service(&stats, GenerationSettings::default());
        let before = heap_releases();

        let err = svc.clear_memory().await.unwrap_err();
        assert!(matches!(err, ChatError::Cleanup(_)));
        assert_eq!(stats.clear_calls(), 1);
        assert_eq!(stats.flush_calls(), 1);
        assert!(heap_releases() >= before + DEEP_CLEAN_PASSES);

        svc.clear_memory().await.unwrap();
        assert_eq!(stats.flush_calls(), 2);
    }
}
