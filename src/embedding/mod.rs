//! Text embedding for indexing and retrieval.

pub mod openai;

pub use openai::OpenAiEmbeddingProvider;

use async_trait::async_trait;

use crate::core::errors::ApiError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, recorded next to the index so a model switch is
    /// detected at startup.
    fn model(&self) -> &str;

    /// Embed many texts. Order-preserving: one vector per input, all with
    /// the same dimension.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let input = [text.to_string()];
        let mut vectors = self.embed_batch(&input).await?;
        vectors
            .pop()
            .ok_or_else(|| ApiError::Embedding("provider returned no vector".to_string()))
    }
}
