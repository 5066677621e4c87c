use crate::error::{ChatError, Result};
use crate::llm::downloader::{ensure_model_files, ModelFiles};
use crate::llm::gpu::{select_device, DeviceConfig};
use crate::llm::memory::MemoryLimits;
use crate::llm::model::{
    CausalLm, ChatTokenizer, EncodedPrompt, GenerationParams, LoadedModel, Message, ModelLoader,
};
use crate::llm::template::ChatTemplate;
use candle_core::{DType, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaConfig, LlamaEosToks};
use candle_transformers::utils::apply_repeat_penalty;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::Tokenizer;

fn load_err(e: impl std::fmt::Display) -> ChatError {
    ChatError::ModelLoad(e.to_string())
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SpecialToken {
    Text(String),
    Added { content: String },
}

impl SpecialToken {
    fn content(&self) -> &str {
        match self {
            SpecialToken::Text(s) => s,
            SpecialToken::Added { content } => content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NamedTemplate {
    name: String,
    template: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TemplateField {
    Single(String),
    Named(Vec<NamedTemplate>),
}

#[derive(Debug, Default, Deserialize)]
struct TokenizerConfig {
    chat_template: Option<TemplateField>,
    bos_token: Option<SpecialToken>,
    eos_token: Option<SpecialToken>,
    pad_token: Option<SpecialToken>,
}

impl TokenizerConfig {
    fn read(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?),
            None => Ok(Self::default()),
        }
    }

    fn template_source(&self) -> Option<&str> {
        match self.chat_template.as_ref()? {
            TemplateField::Single(source) => Some(source),
            TemplateField::Named(templates) => templates
                .iter()
                .find(|t| t.name == "default")
                .or_else(|| templates.first())
                .map(|t| t.template.as_str()),
        }
    }
}

/// huggingface tokenizer plus the chat template from its tokenizer config
pub struct HfChatTokenizer {
    tokenizer: Tokenizer,
    template: ChatTemplate,
    eos_token_id: u32,
    pad_token_id: Option<u32>,
}

impl HfChatTokenizer {
    /// `fallback_eos` comes from the model config when the tokenizer config names no eos token
    fn from_files(files: &ModelFiles, fallback_eos: Option<u32>) -> Result<Self> {
        let tokenizer =
            Tokenizer::from_file(&files.tokenizer).map_err(|e| ChatError::Tokenizer(e.to_string()))?;
        let config = TokenizerConfig::read(files.tokenizer_config.as_deref())?;

        let token_id = |token: &Option<SpecialToken>| {
            token
                .as_ref()
                .and_then(|t| tokenizer.token_to_id(t.content()))
        };

        let eos_token_id = token_id(&config.eos_token)
            .or(fallback_eos)
            .ok_or_else(|| ChatError::Tokenizer("no eos token defined".into()))?;
        let pad_token_id = token_id(&config.pad_token);

        let template = match config.template_source() {
            Some(source) => ChatTemplate::new(
                source,
                config.bos_token.as_ref().map(|t| t.content()).unwrap_or(""),
                config.eos_token.as_ref().map(|t| t.content()).unwrap_or(""),
            ),
            None => {
                tracing::warn!("tokenizer config has no chat template, using chatml");
                ChatTemplate::chatml()
            }
        };

        Ok(Self {
            tokenizer,
            template,
            eos_token_id,
            pad_token_id,
        })
    }
}

impl ChatTokenizer for HfChatTokenizer {
    fn apply_chat_template(&self, messages: &[Message]) -> Result<String> {
        self.template.render(messages)
    }

    fn encode(&self, text: &str) -> Result<EncodedPrompt> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| ChatError::Tokenizer(e.to_string()))?;
        Ok(EncodedPrompt {
            input_ids: encoding.get_ids().to_vec(),
            attention_mask: encoding.get_attention_mask().to_vec(),
        })
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| ChatError::Tokenizer(e.to_string()))
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }

    fn pad_token_id(&self) -> Option<u32> {
        self.pad_token_id
    }
}

/// llama-architecture causal lm running on candle
pub struct CandleModel {
    model: Llama,
    config: Config,
    cache: Cache,
    device: DeviceConfig,
    stop_tokens: Vec<u32>,
}

impl CandleModel {
    fn reset_cache(&mut self, use_kv_cache: bool) -> Result<()> {
        self.cache = Cache::new(use_kv_cache, self.device.dtype, &self.config, &self.device.device)?;
        Ok(())
    }
}

impl CausalLm for CandleModel {
    #[tracing::instrument(skip(self, prompt, params), fields(prompt_tokens = prompt.len()))]
    fn generate(&mut self, prompt: &EncodedPrompt, params: &GenerationParams) -> Result<Vec<u32>> {
        if prompt.is_empty() {
            return Err(ChatError::Generation("empty prompt".into()));
        }

        // kv state never carries over between prompts
        self.reset_cache(params.use_cache)?;

        // single unpadded sequence: the model builds its own causal mask
        let mut tokens = prompt.input_ids.clone();
        let budget = self
            .config
            .max_position_embeddings
            .saturating_sub(tokens.len());
        let steps = params.max_new_tokens.min(budget);

        let mut sampler = LogitsProcessor::from_sampling(
            rand::random(),
            Sampling::TopP {
                p: params.top_p,
                temperature: params.temperature,
            },
        );

        for step in 0..steps {
            let (context, index_pos) = if params.use_cache && step > 0 {
                (&tokens[tokens.len() - 1..], tokens.len() - 1)
            } else {
                (&tokens[..], 0)
            };

            let input = Tensor::new(context, &self.device.device)?.unsqueeze(0)?;
            let logits = self
                .model
                .forward(&input, index_pos, &mut self.cache)?
                .squeeze(0)?
                .to_dtype(DType::F32)?;

            let logits = if params.repetition_penalty == 1.0 {
                logits
            } else {
                apply_repeat_penalty(&logits, params.repetition_penalty, &tokens)?
            };

            let next = sampler.sample(&logits)?;
            tokens.push(next);

            if next == params.eos_token_id || self.stop_tokens.contains(&next) {
                break;
            }
        }

        tracing::debug!(new_tokens = tokens.len() - prompt.len(), "generation finished");
        Ok(tokens)
    }

    fn clear_kv_cache(&mut self) -> Result<()> {
        self.reset_cache(false)
    }

    fn flush_device(&mut self) -> Result<()> {
        self.device
            .device
            .synchronize()
            .map_err(|e| ChatError::Cleanup(e.to_string()))
    }

    fn device_name(&self) -> &str {
        self.device.backend.as_str()
    }
}

/// bytes the weights occupy once converted to `dtype`
fn weight_footprint(paths: &[PathBuf], dtype: DType) -> Result<u64> {
    let tensors =
        unsafe { candle_core::safetensors::MmapedSafetensors::multi(paths) }.map_err(load_err)?;
    let elements: usize = tensors
        .tensors()
        .iter()
        .map(|(_, view)| view.shape().iter().product::<usize>())
        .sum();
    Ok((elements * dtype.size_in_bytes()) as u64)
}

fn eos_ids(config: &Config) -> Vec<u32> {
    match &config.eos_token_id {
        Some(LlamaEosToks::Single(id)) => vec![*id],
        Some(LlamaEosToks::Multiple(ids)) => ids.clone(),
        None => Vec::new(),
    }
}

/// downloads (or reuses cached) weights from the hub and builds a candle model
pub struct CandleLoader {
    cache_dir: Option<PathBuf>,
    limits: MemoryLimits,
}

impl CandleLoader {
    pub fn new(cache_dir: Option<PathBuf>, limits: MemoryLimits) -> Self {
        Self { cache_dir, limits }
    }
}

impl ModelLoader for CandleLoader {
    #[tracing::instrument(skip(self))]
    fn load(&self, model_name: &str) -> Result<LoadedModel> {
        let device = select_device();
        let files = ensure_model_files(model_name, self.cache_dir.clone())?;

        let config: LlamaConfig = serde_json::from_str(&std::fs::read_to_string(&files.config)?)?;
        let config = config.into_config(false);
        let stop_tokens = eos_ids(&config);

        let tokenizer = HfChatTokenizer::from_files(&files, stop_tokens.first().copied())?;

        let required = weight_footprint(&files.weights, device.dtype)?;
        tracing::info!(
            on_disk = files.weights_size()?,
            required,
            device = device.backend.as_str(),
            "checking weight footprint against memory cap"
        );
        self.limits.check(device.backend.class(), required)?;

        // safetensors weights load as constants, so nothing tracks gradients
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&files.weights, device.dtype, &device.device)
        }
        .map_err(load_err)?;
        let model = Llama::load(vb, &config).map_err(load_err)?;
        let cache = Cache::new(false, device.dtype, &config, &device.device).map_err(load_err)?;

        tracing::info!(
            "model loaded successfully: {} on {}",
            model_name,
            device.backend.as_str()
        );

        Ok(LoadedModel {
            model: Box::new(CandleModel {
                model,
                config,
                cache,
                device,
                stop_tokens,
            }),
            tokenizer: Arc::new(tokenizer),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenizer_config_special_token_forms() {
        let config: TokenizerConfig = serde_json::from_str(
            r#"{
                "chat_template": "{{ messages }}",
                "bos_token": {"content": "<s>", "lstrip": false},
                "eos_token": "</s>",
                "pad_token": null
            }"#,
        )
        .unwrap();
        assert_eq!(config.template_source(), Some("{{ messages }}"));
        assert_eq!(config.bos_token.unwrap().content(), "<s>");
        assert_eq!(config.eos_token.unwrap().content(), "</s>");
        assert!(config.pad_token.is_none());
    }

    #[test]
    fn test_tokenizer_config_named_templates() {
        let config: TokenizerConfig = serde_json::from_str(
            r#"{"chat_template": [
                {"name": "tool_use", "template": "tools"},
                {"name": "default", "template": "chat"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(config.template_source(), Some("chat"));
    }

    #[test]
    fn test_missing_tokenizer_config_is_empty() {
        let config = TokenizerConfig::read(None).unwrap();
        assert!(config.template_source().is_none());
    }
}
