use crate::error::{ChatError, Result};
use hf_hub::api::sync::{ApiBuilder, ApiRepo};
use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;

const DEFAULT_CACHE_DIR: &str = ".cache/models";
const SINGLE_WEIGHTS: &str = "model.safetensors";
const SHARDED_INDEX: &str = "model.safetensors.index.json";

/// local paths of everything needed to build a model and its tokenizer
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub tokenizer_config: Option<PathBuf>,
    pub weights: Vec<PathBuf>,
}

impl ModelFiles {
    /// total size on disk of the weight files
    pub fn weights_size(&self) -> Result<u64> {
        let mut total = 0;
        for path in &self.weights {
            total += std::fs::metadata(path)?.len();
        }
        Ok(total)
    }
}

fn get(repo: &ApiRepo, repo_id: &str, filename: &str) -> Result<PathBuf> {
    repo.get(filename).map_err(|e| {
        ChatError::ModelDownload(format!("failed to download {}/{}: {}", repo_id, filename, e))
    })
}

fn weight_files(repo: &ApiRepo, repo_id: &str) -> Result<Vec<PathBuf>> {
    if let Ok(path) = repo.get(SINGLE_WEIGHTS) {
        return Ok(vec![path]);
    }

    // sharded checkpoints list their shards in the index's weight_map
    let index_path = get(repo, repo_id, SHARDED_INDEX)?;
    let index: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(index_path)?)?;
    let shards: BTreeSet<&str> = index
        .get("weight_map")
        .and_then(|m| m.as_object())
        .ok_or_else(|| ChatError::ModelDownload(format!("{} has no weight_map", SHARDED_INDEX)))?
        .values()
        .filter_map(|v| v.as_str())
        .collect();

    shards
        .into_iter()
        .map(|shard| get(repo, repo_id, shard))
        .collect()
}

pub fn ensure_model_files(repo_id: &str, cache_dir: Option<PathBuf>) -> Result<ModelFiles> {
    let cache_dir = cache_dir
        .or_else(|| {
            env::var("MODEL_CACHE_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));

    // create cache directory if it doesn't exist
    std::fs::create_dir_all(&cache_dir)?;

    tracing::info!("resolving model: {} (cache: {})", repo_id, cache_dir.display());

    let api = ApiBuilder::new()
        .with_cache_dir(cache_dir)
        .build()
        .map_err(|e| ChatError::ModelDownload(format!("failed to create hf-hub api: {}", e)))?;

    let repo = api.model(repo_id.to_string());

    let files = ModelFiles {
        config: get(&repo, repo_id, "config.json")?,
        tokenizer: get(&repo, repo_id, "tokenizer.json")?,
        tokenizer_config: repo.get("tokenizer_config.json").ok(),
        weights: weight_files(&repo, repo_id)?,
    };

    tracing::info!(
        shards = files.weights.len(),
        has_chat_template_config = files.tokenizer_config.is_some(),
        "model files available"
    );

    Ok(files)
}
