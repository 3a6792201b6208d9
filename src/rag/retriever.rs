//! Query-time retrieval: embed the question, search the index, apply the
//! similarity floor.

use std::sync::Arc;
use std::time::Duration;

use super::store::{RetrievedChunk, VectorStore};
use crate::core::errors::ApiError;
use crate::embedding::EmbeddingProvider;
use crate::llm::ChatMessage;

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    similarity_floor: f32,
    query_history_chars: usize,
    search_timeout: Duration,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        similarity_floor: f32,
        query_history_chars: usize,
        search_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            store,
            similarity_floor,
            query_history_chars,
            search_timeout,
        }
    }

    /// Retrieves up to `k` chunks for the question. Zero hits above the
    /// floor is a normal outcome, not an error.
    pub async fn retrieve(
        &self,
        question: &str,
        k: usize,
        history: &[ChatMessage],
    ) -> Result<Vec<RetrievedChunk>, ApiError> {
        let search_text = build_search_text(question, history, self.query_history_chars);
        let vector = self.embedder.embed(&search_text).await?;

        let hits = tokio::time::timeout(self.search_timeout, self.store.search(&vector, k))
            .await
            .map_err(|_| ApiError::Retrieval("vector search timed out".to_string()))??;

        let total = hits.len();
        let kept: Vec<RetrievedChunk> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.similarity_floor)
            .collect();

        tracing::debug!(
            "retrieved {} chunks, kept {} above floor {:.2}",
            total,
            kept.len(),
            self.similarity_floor
        );

        Ok(kept)
    }
}

/// Prefixes the question with recent user turns so follow-ups like "and how
/// does that interact with pity?" embed with their subject attached. Plain
/// concatenation under a char budget; newest turns win.
fn build_search_text(question: &str, history: &[ChatMessage], budget: usize) -> String {
    if budget == 0 {
        return question.to_string();
    }

    let mut recent: Vec<&str> = Vec::new();
    let mut used = 0;
    for turn in history.iter().rev().filter(|t| t.role == "user") {
        let chars = turn.content.chars().count();
        if used + chars > budget {
            break;
        }
        recent.push(&turn.content);
        used += chars;
    }

    if recent.is_empty() {
        return question.to_string();
    }

    recent.reverse();
    format!("{}\n{}", recent.join("\n"), question)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::rag::store::{IndexMeta, IndexedChunk};

    struct RecordingEmbedder {
        inputs: Mutex<Vec<String>>,
    }

    impl RecordingEmbedder {
        fn new() -> Self {
            Self {
                inputs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingEmbedder {
        fn model(&self) -> &str {
            "test-embed"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
            self.inputs.lock().unwrap().extend(texts.iter().cloned());
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct CannedStore {
        scores: Vec<f32>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl VectorStore for CannedStore {
        async fn upsert(&self, _items: Vec<(IndexedChunk, Vec<f32>)>) -> Result<(), ApiError> {
            Ok(())
        }

        async fn delete_by_document(&self, _document_id: &str) -> Result<usize, ApiError> {
            Ok(0)
        }

        async fn search(&self, _query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, ApiError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self
                .scores
                .iter()
                .take(k)
                .enumerate()
                .map(|(i, score)| RetrievedChunk {
                    chunk: IndexedChunk {
                        chunk_id: format!("c{}", i),
                        document_id: "doc".to_string(),
                        section: "## Test".to_string(),
                        sequence_index: i,
                        content: format!("chunk {}", i),
                    },
                    score: *score,
                })
                .collect())
        }

        async fn count(&self) -> Result<usize, ApiError> {
            Ok(self.scores.len())
        }

        async fn meta(&self) -> Result<Option<IndexMeta>, ApiError> {
            Ok(None)
        }

        async fn reset(&self, _meta: &IndexMeta) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn retriever(store: CannedStore, floor: f32) -> Retriever {
        Retriever::new(
            Arc::new(RecordingEmbedder::new()),
            Arc::new(store),
            floor,
            512,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn results_below_the_floor_are_dropped() {
        let r = retriever(
            CannedStore {
                scores: vec![0.9, 0.4, 0.2],
                delay: None,
            },
            0.35,
        );
        let hits = r.retrieve("question", 10, &[]).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.score >= 0.35));
    }

    #[tokio::test]
    async fn default_floor_keeps_everything() {
        let r = retriever(
            CannedStore {
                scores: vec![0.9, 0.1, -0.2],
                delay: None,
            },
            crate::core::config::Settings::default().similarity_floor,
        );
        let hits = r.retrieve("question", 10, &[]).await.unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn zero_hits_is_a_success() {
        let r = retriever(
            CannedStore {
                scores: vec![],
                delay: None,
            },
            0.35,
        );
        let hits = r.retrieve("question", 10, &[]).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn slow_search_times_out() {
        let embedder = Arc::new(RecordingEmbedder::new());
        let r = Retriever::new(
            embedder,
            Arc::new(CannedStore {
                scores: vec![0.9],
                delay: Some(Duration::from_millis(200)),
            }),
            0.0,
            512,
            Duration::from_millis(10),
        );
        let err = r.retrieve("question", 5, &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::Retrieval(_)));
    }

    #[tokio::test]
    async fn recent_user_turns_join_the_search_text() {
        let embedder = Arc::new(RecordingEmbedder::new());
        let r = Retriever::new(
            embedder.clone(),
            Arc::new(CannedStore {
                scores: vec![],
                delay: None,
            }),
            0.0,
            512,
            Duration::from_secs(5),
        );

        let history = vec![
            ChatMessage::user("Tell me about the gacha system"),
            ChatMessage::assistant("It uses a pity counter."),
        ];
        r.retrieve("what about pity?", 5, &history).await.unwrap();

        let inputs = embedder.inputs.lock().unwrap();
        assert_eq!(inputs.len(), 1);
        assert!(inputs[0].contains("Tell me about the gacha system"));
        assert!(inputs[0].ends_with("what about pity?"));
        assert!(!inputs[0].contains("pity counter"));
    }

    #[tokio::test]
    async fn zero_budget_searches_the_bare_question() {
        let embedder = Arc::new(RecordingEmbedder::new());
        let r = Retriever::new(
            embedder.clone(),
            Arc::new(CannedStore {
                scores: vec![],
                delay: None,
            }),
            0.0,
            0,
            Duration::from_secs(5),
        );

        let history = vec![ChatMessage::user("earlier question")];
        r.retrieve("the question", 5, &history).await.unwrap();

        let inputs = embedder.inputs.lock().unwrap();
        assert_eq!(inputs[0], "the question");
    }
}
