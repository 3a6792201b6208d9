//! The abstract interface over the chunk index.
//!
//! The primary implementation is `SqliteVectorStore` in the `sqlite`
//! module; tests swap in an in-memory store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// Payload persisted next to each embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk_id: String,
    /// Source document the chunk came from.
    pub document_id: String,
    /// Heading line in effect where the chunk starts.
    pub section: String,
    /// Position of the chunk within its document.
    pub sequence_index: usize,
    pub content: String,
}

/// A similarity search hit. Scores are cosine similarities: higher is more
/// relevant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk: IndexedChunk,
    pub score: f32,
}

/// Embedding model the index was built with. Vectors from a different
/// model or dimension are not comparable, so both are recorded and checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    pub embedding_model: String,
    pub dimension: usize,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace chunks together with their vectors. Rejects
    /// vectors whose dimension does not match the recorded index meta.
    async fn upsert(&self, items: Vec<(IndexedChunk, Vec<f32>)>) -> Result<(), ApiError>;

    /// Remove every chunk of a document. Returns how many were removed.
    async fn delete_by_document(&self, document_id: &str) -> Result<usize, ApiError>;

    /// The `k` chunks nearest to the query vector, sorted by score
    /// descending; equal scores keep document order. A query against an
    /// empty index yields an empty result, a mismatched dimension an error.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, ApiError>;

    async fn count(&self) -> Result<usize, ApiError>;

    /// Recorded embedding model and dimension, if the index was ever built.
    async fn meta(&self) -> Result<Option<IndexMeta>, ApiError>;

    /// Drop all vectors and record a new embedding model and dimension.
    ///
    /// Used when the embedding model changes and every stored vector is
    /// invalidated.
    async fn reset(&self, meta: &IndexMeta) -> Result<(), ApiError>;
}
