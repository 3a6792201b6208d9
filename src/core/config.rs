use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::errors::ApiError;

/// Default number of chunks handed to the generator per question.
pub const DEFAULT_MAX_RESULTS: usize = 3;
/// Upper bound a caller may request per question.
pub const MAX_RESULTS_LIMIT: usize = 10;

/// Runtime settings for the whole pipeline. Constructed once (in `main` or
/// in tests) and passed down explicitly; nothing reads configuration from
/// ambient globals.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Markdown design document the index is built from.
    pub document_path: PathBuf,
    /// Maximum chunk length in chars.
    pub chunk_size: usize,
    /// Chars shared between consecutive chunks. At most `chunk_size - 3`,
    /// so every chunk carries some new content.
    pub chunk_overlap: usize,
    pub max_results: usize,
    /// Hits scoring below this similarity are dropped. Cosine scores live
    /// in [-1, 1], so the default -1.0 keeps the full top-k.
    pub similarity_floor: f32,
    /// Char budget for the context block in the prompt.
    pub max_context_chars: usize,
    /// Messages fetched from storage per chat turn.
    pub history_limit: usize,
    /// Most recent messages allowed into the prompt.
    pub history_window: usize,
    /// Char budget for the history window in the prompt.
    pub history_char_budget: usize,
    /// Chars of trailing history mixed into the retrieval query so
    /// follow-up questions resolve.
    pub query_history_chars: usize,
    pub embedding_model: String,
    pub chat_model: String,
    pub temperature: f32,
    pub chat_base_url: String,
    pub embeddings_base_url: String,
    pub api_key: Option<String>,
    pub embed_timeout: Duration,
    pub generation_timeout: Duration,
    pub search_timeout: Duration,
    pub embed_batch_size: usize,
    /// Display length for titles derived from the first user message.
    pub title_max_chars: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            document_path: PathBuf::from("docs/design-doc.md"),
            chunk_size: 1000,
            chunk_overlap: 200,
            max_results: DEFAULT_MAX_RESULTS,
            similarity_floor: -1.0,
            max_context_chars: 4000,
            history_limit: 20,
            history_window: 10,
            history_char_budget: 2000,
            query_history_chars: 512,
            embedding_model: "intfloat/multilingual-e5-large".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            chat_base_url: "https://api.openai.com".to_string(),
            // Embeddings default to a local OpenAI-compatible server (LM
            // Studio and friends) so indexing works without an API key.
            embeddings_base_url: "http://localhost:1234".to_string(),
            api_key: None,
            embed_timeout: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(60),
            search_timeout: Duration::from_secs(10),
            embed_batch_size: 32,
            title_max_chars: 48,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.chunk_size == 0 {
            return Err(ApiError::BadRequest("chunk_size must be at least 1".to_string()));
        }
        // Each chunk must carry a separator and new content past the
        // overlap, matching the chunk builder's bound.
        if self.chunk_overlap > self.chunk_size.saturating_sub(3) {
            return Err(ApiError::BadRequest(format!(
                "chunk_overlap ({}) must be at most chunk_size ({}) - 3",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.max_results == 0 || self.max_results > MAX_RESULTS_LIMIT {
            return Err(ApiError::BadRequest(format!(
                "max_results must be between 1 and {}",
                MAX_RESULTS_LIMIT
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub history_db_path: PathBuf,
    pub index_db_path: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let data_dir = discover_data_dir();
        let log_dir = data_dir.join("logs");
        let history_db_path = data_dir.join("conversations.db");
        let index_db_path = data_dir.join("index.db");

        for dir in [&data_dir, &log_dir] {
            let _ = fs::create_dir_all(dir);
        }

        AppPaths {
            data_dir,
            log_dir,
            history_db_path,
            index_db_path,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

fn discover_data_dir() -> PathBuf {
    if let Ok(dir) = env::var("LOREKEEPER_DATA_DIR") {
        return PathBuf::from(dir);
    }
    PathBuf::from("data")
}
