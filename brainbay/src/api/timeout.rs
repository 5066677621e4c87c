use crate::api::error::ApiError;
use crate::api::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

/// gives up on the client-facing wait after `request_timeout`
///
/// work already handed to the generation thread keeps running and holds the
/// generation slot until it finishes.
pub async fn request_timeout(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    match tokio::time::timeout(state.request_timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(path = %path, timeout = ?state.request_timeout, "request timed out");
            ApiError::Timeout.into_response()
        }
    }
}
