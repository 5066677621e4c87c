//! deterministic stand-ins for a model and tokenizer
//!
//! the tokenizer maps bytes to ids one to one; the model appends
//! `echo:<prompt token count>` to whatever it is given.

use crate::error::{ChatError, Result};
use crate::llm::model::{
    CausalLm, ChatTokenizer, EncodedPrompt, GenerationParams, LoadedModel, Message, ModelLoader,
};
use crate::llm::template::ChatTemplate;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const FAKE_EOS: u32 = 0;

pub struct EchoTokenizer {
    template: ChatTemplate,
}

impl EchoTokenizer {
    pub fn new() -> Self {
        Self {
            template: ChatTemplate::chatml(),
        }
    }
}

impl Default for EchoTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatTokenizer for EchoTokenizer {
    fn apply_chat_template(&self, messages: &[Message]) -> Result<String> {
        self.template.render(messages)
    }

    fn encode(&self, text: &str) -> Result<EncodedPrompt> {
        let input_ids: Vec<u32> = text.bytes().map(u32::from).collect();
        let attention_mask = vec![1; input_ids.len()];
        Ok(EncodedPrompt {
            input_ids,
            attention_mask,
        })
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let bytes: Vec<u8> = ids
            .iter()
            .filter(|&&id| id != FAKE_EOS)
            .map(|&id| id as u8)
            .collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn eos_token_id(&self) -> u32 {
        FAKE_EOS
    }

    fn pad_token_id(&self) -> Option<u32> {
        None
    }
}

/// counters and switches shared between a test and the model it handed off
#[derive(Default)]
pub struct ModelStats {
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub generate_calls: AtomicUsize,
    pub clear_calls: AtomicUsize,
    pub flush_calls: AtomicUsize,
    pub loads: AtomicUsize,
    /// number of upcoming `clear_kv_cache` calls that fail
    pub clear_failures: AtomicUsize,
    pub fail_generation: AtomicBool,
    /// when set, generation produces nothing but eos
    pub silent: AtomicBool,
    pub delay: Mutex<Duration>,
    pub last_params: Mutex<Option<GenerationParams>>,
    pub last_prompt: Mutex<Option<EncodedPrompt>>,
}

impl ModelStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock().unwrap() = delay;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn clear_calls(&self) -> usize {
        self.clear_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn flush_calls(&self) -> usize {
        self.flush_calls.load(Ordering::SeqCst)
    }
}

pub struct EchoModel {
    stats: Arc<ModelStats>,
}

impl EchoModel {
    pub fn new(stats: Arc<ModelStats>) -> Self {
        Self { stats }
    }
}

impl CausalLm for EchoModel {
    fn generate(&mut self, prompt: &EncodedPrompt, params: &GenerationParams) -> Result<Vec<u32>> {
        let stats = &self.stats;
        let current = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_in_flight.fetch_max(current, Ordering::SeqCst);
        stats.generate_calls.fetch_add(1, Ordering::SeqCst);
        *stats.last_params.lock().unwrap() = Some(params.clone());
        *stats.last_prompt.lock().unwrap() = Some(prompt.clone());

        let delay = *stats.delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let result = if stats.fail_generation.load(Ordering::SeqCst) {
            Err(ChatError::Generation("fake model failure".into()))
        } else {
            let mut tokens = prompt.input_ids.clone();
            if stats.silent.load(Ordering::SeqCst) {
                tokens.push(params.eos_token_id);
            } else {
                let reply = format!("  echo:{}  ", prompt.len());
                tokens.extend(reply.bytes().map(u32::from));
            }
            Ok(tokens)
        };

        stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn clear_kv_cache(&mut self) -> Result<()> {
        self.stats.clear_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .stats
            .clear_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ChatError::Cleanup("fake cache reset failure".into()));
        }
        Ok(())
    }

    fn flush_device(&mut self) -> Result<()> {
        self.stats.flush_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn device_name(&self) -> &str {
        "fake"
    }
}

/// hands out echo models that report into shared stats
pub struct FakeLoader {
    pub stats: Arc<ModelStats>,
    pub fail: bool,
}

impl FakeLoader {
    pub fn new(stats: Arc<ModelStats>) -> Self {
        Self { stats, fail: false }
    }

    pub fn failing(stats: Arc<ModelStats>) -> Self {
        Self { stats, fail: true }
    }
}

impl ModelLoader for FakeLoader {
    fn load(&self, model_name: &str) -> Result<LoadedModel> {
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ChatError::ModelLoad(format!("cannot load {}", model_name)));
        }
        Ok(LoadedModel {
            model: Box::new(EchoModel::new(Arc::clone(&self.stats))),
            tokenizer: Arc::new(EchoTokenizer::new()),
        })
    }
}
