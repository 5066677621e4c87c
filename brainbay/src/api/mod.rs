mod chat;
mod error;
mod schema;
mod timeout;

use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::{middleware, Router};
use common::ModelContext;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowHeaders, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub context: Arc<ModelContext>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(context: Arc<ModelContext>, request_timeout: Duration) -> Self {
        Self {
            context,
            request_timeout,
        }
    }
}

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|e| anyhow::anyhow!("invalid cors origin {:?}: {}", origin, e))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    // credentials rule out wildcard headers, so echo what the browser asks for
    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

pub fn router(state: AppState, cors_origins: &[String]) -> anyhow::Result<Router> {
    Ok(Router::new()
        .route("/chat/", post(chat::chat))
        .route("/chat", post(chat::chat))
        .route("/chat/health", get(chat::health))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            timeout::request_timeout,
        ))
        .layer(cors_layer(cors_origins)?)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}
