use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// Health probe. `vector_store_ready` flips to true once the startup
/// indexing run has finished.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let indexed_chunks = state.vector_store.count().await.unwrap_or(0);
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "vector_store_ready": state.chat.is_ready(),
        "indexed_chunks": indexed_chunks
    }))
}
