use crate::chat::service::ChatService;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// background loop calling `clear_memory` on a fixed interval
pub struct PeriodicCleanup {
    interval: Duration,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicCleanup {
    /// spawns the loop on the current runtime and returns immediately
    pub fn start(service: Arc<ChatService>, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(cleanup_loop(service, interval, token.clone()));
        tracing::info!("started periodic cleanup (every {:?})", interval);

        Self {
            interval,
            token,
            handle: Some(handle),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// cancels the loop and waits for it to exit
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::error!("periodic cleanup task failed: {}", e);
                }
            }
        }
        tracing::info!("stopped periodic cleanup");
    }
}

impl Drop for PeriodicCleanup {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn cleanup_loop(service: Arc<ChatService>, interval: Duration, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let result = tokio::select! {
            _ = token.cancelled() => break,
            result = service.clear_memory() => result,
        };

        if let Err(e) = result {
            tracing::error!("error in cleanup loop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationSettings;
    use crate::llm::fake::{EchoModel, EchoTokenizer, ModelStats};
    use std::sync::atomic::Ordering;

    fn service(stats: &Arc<ModelStats>) -> Arc<ChatService> {
        Arc::new(ChatService::new(
            Box::new(EchoModel::new(Arc::clone(stats))),
            Arc::new(EchoTokenizer::new()),
            GenerationSettings::default(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_runs_each_interval_and_survives_errors() {
        let stats = ModelStats::new();
        stats.clear_failures.store(1, Ordering::SeqCst);
        let cleanup = PeriodicCleanup::start(service(&stats), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(stats.clear_calls() >= 2);
        // the failing pass still flushed the device
        assert_eq!(stats.flush_calls(), stats.clear_calls());

        // the first pass failed; the loop kept going and the next ones succeeded
        assert_eq!(stats.clear_failures.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(stats.clear_calls() >= 3);

        cleanup.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_loop() {
        let stats = ModelStats::new();
        let cleanup = PeriodicCleanup::start(service(&stats), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        cleanup.stop().await;
        let calls = stats.clear_calls();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(stats.clear_calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_tick() {
        let stats = ModelStats::new();
        let cleanup = PeriodicCleanup::start(service(&stats), Duration::from_secs(60));
        assert_eq!(cleanup.interval(), Duration::from_secs(60));

        cleanup.stop().await;
        assert_eq!(stats.clear_calls(), 0);
    }
}
