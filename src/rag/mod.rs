//! Retrieval over the indexed design document.
//!
//! This module provides:
//! - `VectorStore` / `SqliteVectorStore`: the chunk index
//! - `Indexer`: the explicit load -> embed -> upsert step
//! - `Retriever`: query-time search with the similarity floor

pub mod indexer;
pub mod retriever;
pub mod sqlite;
pub mod store;

pub use indexer::Indexer;
pub use retriever::Retriever;
pub use sqlite::SqliteVectorStore;
pub use store::{IndexMeta, IndexedChunk, RetrievedChunk, VectorStore};
