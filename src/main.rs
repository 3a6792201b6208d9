use std::env;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use lorekeeper::core::config::{AppPaths, Settings};
use lorekeeper::core::logging;
use lorekeeper::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = AppPaths::new();
    logging::init(&paths);

    let settings = settings_from_env();
    tracing::info!(
        "starting with document {} and models {} / {}",
        settings.document_path.display(),
        settings.embedding_model,
        settings.chat_model
    );

    let state = AppState::initialize(settings, paths).await?;

    // Build the index before accepting traffic. A failed run leaves the
    // server up in a degraded state: health reports not ready and chat
    // turns are rejected with NotReady.
    match state.indexer.run().await {
        Ok(count) => {
            state.chat.mark_ready();
            tracing::info!("serving chat over {} indexed chunks", count);
        }
        Err(err) => tracing::error!("document indexing failed, serving degraded: {}", err),
    }

    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse::<u16>().ok())
        .unwrap_or(8000);
    let bind_addr = format!("127.0.0.1:{}", port);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;
    tracing::info!("Listening on {}", addr);

    let app: Router = lorekeeper::server::router::router(state);
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Builds the runtime settings, letting the environment override the
/// pieces that differ between deployments.
fn settings_from_env() -> Settings {
    let mut settings = Settings::default();

    if let Ok(path) = env::var("LOREKEEPER_DOCUMENT") {
        settings.document_path = path.into();
    }
    if let Ok(key) = env::var("OPENAI_API_KEY") {
        settings.api_key = Some(key);
    }
    if let Ok(url) = env::var("OPENAI_BASE_URL") {
        settings.chat_base_url = url.clone();
        settings.embeddings_base_url = url;
    }
    if let Ok(model) = env::var("LOREKEEPER_EMBEDDING_MODEL") {
        settings.embedding_model = model;
    }
    if let Ok(model) = env::var("LOREKEEPER_CHAT_MODEL") {
        settings.chat_model = model;
    }

    settings
}
