use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy for the whole pipeline. Each variant names the stage that
/// failed so callers and the HTTP boundary can react per kind instead of
/// collapsing everything into a generic failure.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("document load failed: {0}")]
    Load(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("retrieval failed: {0}")]
    Retrieval(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("service not ready: {0}")]
    NotReady(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }

    pub fn load<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Load(err.to_string())
    }

    pub fn embedding<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Embedding(err.to_string())
    }

    pub fn retrieval<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Retrieval(err.to_string())
    }

    pub fn generation<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Generation(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            ApiError::Load(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            ApiError::Embedding(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            ApiError::Retrieval(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            ApiError::Generation(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::NotReady(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::warn!("{}", self);
        }

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
