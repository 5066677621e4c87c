use crate::api::{self, AppState};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::llm::CandleLoader;
use common::{ModelContext, Settings};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "brainbay")]
#[command(about = "chat service backed by a local causal language model", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the model and serve the chat api over http
    Serve {
        #[command(flatten)]
        settings: Settings,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Serve { settings } => serve(settings).await,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for sigterm: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

async fn serve(settings: Settings) -> Result<()> {
    let _guard = common::tracing::init_tracing(&settings.app_name, &settings.environment)?;
    settings.validate()?;

    tracing::info!(
        environment = %settings.environment,
        "starting {}",
        settings.app_name
    );

    let loader = CandleLoader::new(settings.model_cache_dir.clone(), settings.memory_limits()?);
    let context = Arc::new(ModelContext::new(
        Arc::new(loader),
        settings.generation(),
        settings.cleanup_interval(),
    ));

    // a failed load is fatal; nothing is served half-initialized
    context
        .initialize(&settings.model_name)
        .await
        .with_context(|| format!("failed to initialize model {}", settings.model_name))?;

    let state = AppState::new(Arc::clone(&context), settings.request_timeout());
    let app = api::router(state, &settings.cors_origins)?;

    let listener = tokio::net::TcpListener::bind(settings.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind))?;
    tracing::info!(addr = %settings.bind, "listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    context.cleanup().await;
    tracing::info!("model cleaned up");

    served.context("http server failed")
}
