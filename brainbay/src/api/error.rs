use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::ChatError;
use serde_json::json;

/// failures a client can see; internal details stay in the logs
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Unavailable,
    Timeout,
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::Validation(msg) => msg.clone(),
            ApiError::Unavailable => "Model not available".to_string(),
            ApiError::Timeout => "Request timeout".to_string(),
            ApiError::Internal => "Internal server error".to_string(),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::Uninitialized => ApiError::Unavailable,
            other => {
                tracing::error!("chat request failed: {}", other);
                ApiError::Internal
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.detail() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_mapping_hides_internals() {
        assert_eq!(
            ApiError::from(ChatError::Uninitialized).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        let err = ApiError::from(ChatError::Generation("cuda oom at layer 7".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.detail().contains("cuda"));
    }
}
