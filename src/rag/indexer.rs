//! One-shot index build: load the document, embed its chunks, store them.

use std::sync::Arc;

use super::store::{IndexMeta, IndexedChunk, VectorStore};
use crate::core::errors::ApiError;
use crate::embedding::EmbeddingProvider;
use crate::loader::DocumentLoader;

pub struct Indexer {
    loader: DocumentLoader,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    batch_size: usize,
}

impl Indexer {
    pub fn new(
        loader: DocumentLoader,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        batch_size: usize,
    ) -> Self {
        Self {
            loader,
            embedder,
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Rebuilds the index for the loader's document. The document's old
    /// chunks are replaced, never appended to, so running this twice leaves
    /// the same index. A change of embedding model or dimension resets the
    /// whole index first. Returns the number of chunks indexed.
    pub async fn run(&self) -> Result<usize, ApiError> {
        let chunks = self.loader.load()?;
        tracing::info!(
            "loaded {} chunks from {}",
            chunks.len(),
            self.loader.path().display()
        );

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let mut embedded = self.embedder.embed_batch(&texts).await?;
            vectors.append(&mut embedded);
        }
        if vectors.len() != chunks.len() {
            return Err(ApiError::Embedding(format!(
                "embedded {} of {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        let dimension = vectors.first().map(|v| v.len()).unwrap_or(0);
        if dimension == 0 {
            return Err(ApiError::Embedding(
                "embedding provider returned zero-dimensional vectors".to_string(),
            ));
        }

        let current = IndexMeta {
            embedding_model: self.embedder.model().to_string(),
            dimension,
        };
        match self.store.meta().await? {
            Some(existing) if existing == current => {
                let removed = self
                    .store
                    .delete_by_document(&self.loader.document_id())
                    .await?;
                if removed > 0 {
                    tracing::debug!("replacing {} previously indexed chunks", removed);
                }
            }
            Some(existing) => {
                tracing::warn!(
                    "embedding model changed ({} dim {} -> {} dim {}), resetting index",
                    existing.embedding_model,
                    existing.dimension,
                    current.embedding_model,
                    current.dimension
                );
                self.store.reset(&current).await?;
            }
            None => self.store.reset(&current).await?,
        }

        let items: Vec<(IndexedChunk, Vec<f32>)> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                (
                    IndexedChunk {
                        chunk_id: chunk.id,
                        document_id: chunk.document_id,
                        section: chunk.section,
                        sequence_index: chunk.sequence_index,
                        content: chunk.content,
                    },
                    vector,
                )
            })
            .collect();
        let indexed = items.len();
        self.store.upsert(items).await?;

        tracing::info!("index ready: {} chunks", indexed);
        Ok(indexed)
    }
}
