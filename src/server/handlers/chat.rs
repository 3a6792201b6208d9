use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;
use crate::generation::SourceRef;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    pub max_results: Option<usize>,
    /// Session to continue. Absent starts a new session; the response
    /// carries the id either way.
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub confidence: f32,
    pub session_id: String,
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let answer = state
        .chat
        .chat(
            &payload.question,
            payload.max_results,
            payload.session_id.as_deref(),
        )
        .await?;

    Ok(Json(ChatResponse {
        answer: answer.text,
        sources: answer.sources,
        confidence: answer.confidence,
        session_id: answer.session_id,
    }))
}
