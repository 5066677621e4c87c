use crate::chat::cleanup::PeriodicCleanup;
use crate::chat::service::ChatService;
use crate::config::GenerationSettings;
use crate::error::{ChatError, Result};
use crate::llm::model::{LoadedModel, ModelLoader};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

struct Loaded {
    model_name: String,
    service: Arc<ChatService>,
    cleanup: PeriodicCleanup,
}

/// owns the loaded model, its chat service and the periodic cleanup task
///
/// `initialize`, `cleanup` and `get_service` all serialize on one lock, so
/// readers wait while a load is in progress.
pub struct ModelContext {
    loader: Arc<dyn ModelLoader>,
    settings: GenerationSettings,
    cleanup_interval: Duration,
    state: Mutex<Option<Loaded>>,
}

impl ModelContext {
    pub fn new(
        loader: Arc<dyn ModelLoader>,
        settings: GenerationSettings,
        cleanup_interval: Duration,
    ) -> Self {
        Self {
            loader,
            settings,
            cleanup_interval,
            state: Mutex::new(None),
        }
    }

    /// loads the model once; later calls are no-ops
    #[tracing::instrument(skip(self))]
    pub async fn initialize(&self, model_name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(loaded) = state.as_ref() {
            tracing::debug!("model {} already initialized", loaded.model_name);
            return Ok(());
        }

        tracing::info!("initializing model: {}", model_name);
        let loader = Arc::clone(&self.loader);
        let name = model_name.to_string();
        let LoadedModel { model, tokenizer } =
            tokio::task::spawn_blocking(move || loader.load(&name))
                .await
                .map_err(|e| ChatError::ModelLoad(format!("loader task failed: {}", e)))??;

        tracing::info!(device = model.device_name(), "model ready");

        let service = Arc::new(ChatService::new(model, tokenizer, self.settings.clone()));
        let cleanup = PeriodicCleanup::start(Arc::clone(&service), self.cleanup_interval);

        *state = Some(Loaded {
            model_name: model_name.to_string(),
            service,
            cleanup,
        });
        Ok(())
    }

    /// stops the cleanup task, clears memory and drops the model; no-op when not initialized
    #[tracing::instrument(skip(self))]
    pub async fn cleanup(&self) {
        let mut state = self.state.lock().await;
        let Some(loaded) = state.take() else {
            return;
        };

        loaded.cleanup.stop().await;
        if let Err(e) = loaded.service.clear_memory().await {
            tracing::error!("error clearing memory during shutdown: {}", e);
        }
        drop(loaded.service);

        tracing::info!("model {} cleaned up", loaded.model_name);
    }

    pub async fn get_service(&self) -> Result<Arc<ChatService>> {
        let state = self.state.lock().await;
        state
            .as_ref()
            .map(|loaded| Arc::clone(&loaded.service))
            .ok_or(ChatError::Uninitialized)
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.is_some()
    }
}
