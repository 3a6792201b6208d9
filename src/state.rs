use std::sync::Arc;

use thiserror::Error;

use crate::chat::ChatService;
use crate::core::config::{AppPaths, Settings};
use crate::core::errors::ApiError;
use crate::embedding::openai::OpenAiEmbeddingProvider;
use crate::embedding::EmbeddingProvider;
use crate::generation::{AnswerGenerator, PromptTemplates};
use crate::history::HistoryStore;
use crate::llm::openai::OpenAiChatProvider;
use crate::llm::ChatProvider;
use crate::loader::DocumentLoader;
use crate::rag::{Indexer, Retriever, SqliteVectorStore, VectorStore};

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Invalid configuration: {0}")]
    Config(#[source] anyhow::Error),

    #[error("Failed to initialize history store: {0}")]
    History(#[source] anyhow::Error),

    #[error("Failed to initialize vector store: {0}")]
    VectorStore(#[source] anyhow::Error),

    #[error("Failed to initialize providers: {0}")]
    Provider(#[source] anyhow::Error),
}

/// Global application state shared across all routes and background tasks.
///
/// Contains references to:
/// - Configuration and paths
/// - Database connections (history, vector index)
/// - The document indexer, run once at startup
/// - The chat service the HTTP handlers call into
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub paths: Arc<AppPaths>,
    pub vector_store: Arc<dyn VectorStore>,
    pub indexer: Arc<Indexer>,
    pub chat: Arc<ChatService>,
}

impl AppState {
    /// Initializes the application state.
    ///
    /// This process includes:
    /// 1. Validating the settings
    /// 2. Opening the history and vector databases
    /// 3. Constructing the embedding and chat providers
    /// 4. Wiring retriever, generator and indexer into the chat service
    ///
    /// The document index itself is not built here; `main` runs the
    /// indexer after the state is up and marks the chat service ready.
    pub async fn initialize(
        settings: Settings,
        paths: AppPaths,
    ) -> Result<Arc<Self>, InitializationError> {
        settings
            .validate()
            .map_err(|e| InitializationError::Config(e.into()))?;
        let paths = Arc::new(paths);

        let history = HistoryStore::new(paths.history_db_path.clone())
            .await
            .map_err(|e| InitializationError::History(e.into()))?;

        let vector_store: Arc<dyn VectorStore> = Arc::new(
            SqliteVectorStore::new(paths.as_ref())
                .await
                .map_err(|e| InitializationError::VectorStore(e.into()))?,
        );

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
            OpenAiEmbeddingProvider::new(
                &settings.embeddings_base_url,
                settings.api_key.clone(),
                &settings.embedding_model,
                settings.embed_timeout,
            )
            .map_err(|e| InitializationError::Provider(e.into()))?,
        );
        let llm: Arc<dyn ChatProvider> = Arc::new(
            OpenAiChatProvider::new(
                &settings.chat_base_url,
                settings.api_key.clone(),
                &settings.chat_model,
                settings.temperature,
                settings.generation_timeout,
            )
            .map_err(|e| InitializationError::Provider(e.into()))?,
        );

        let state = Self::assemble(settings, paths, history, vector_store, embedder, llm)
            .map_err(|e| InitializationError::Config(e.into()))?;
        Ok(Arc::new(state))
    }

    /// Wires the pipeline from already-constructed parts. Split out so
    /// tests can inject mock providers and stores.
    pub fn assemble(
        settings: Settings,
        paths: Arc<AppPaths>,
        history: HistoryStore,
        vector_store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn ChatProvider>,
    ) -> Result<Self, ApiError> {
        let loader = DocumentLoader::new(
            settings.document_path.clone(),
            settings.chunk_size,
            settings.chunk_overlap,
        );
        let indexer = Arc::new(Indexer::new(
            loader,
            embedder.clone(),
            vector_store.clone(),
            settings.embed_batch_size,
        ));

        let retriever = Retriever::new(
            embedder,
            vector_store.clone(),
            settings.similarity_floor,
            settings.query_history_chars,
            settings.search_timeout,
        );
        let generator = AnswerGenerator::new(
            llm,
            PromptTemplates::default(),
            settings.max_context_chars,
            settings.history_window,
            settings.history_char_budget,
        )?;
        let chat = Arc::new(ChatService::new(
            retriever,
            generator,
            history,
            settings.clone(),
        ));

        Ok(AppState {
            settings,
            paths,
            vector_store,
            indexer,
            chat,
        })
    }
}
