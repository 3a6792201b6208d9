use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::server::handlers::{chat, health};
use crate::state::AppState;

/// Creates the application router.
///
/// Two routes: the chat endpoint that runs a full retrieval-and-generation
/// turn, and a health probe reporting whether the document index is ready.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/chat", post(chat::chat))
        .route("/api/v1/health", get(health::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
