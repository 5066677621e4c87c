use crate::api::error::ApiError;
use crate::api::schema::{ChatRequest, ChatResponse, HealthResponse};
use crate::api::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload?;
    let (message, history) = request.validate()?;

    let service = state.context.get_service().await?;
    let response = service.chat(&message, &history).await?;

    Ok(Json(ChatResponse { response }))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    tracing::info!("health check");
    Json(HealthResponse {
        status: "healthy",
        model_loaded: state.context.is_initialized().await,
    })
}
