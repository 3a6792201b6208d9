//! SQLite-backed vector store.
//!
//! In-process index using SQLite for chunk payloads and brute-force cosine
//! similarity for search. The design document produces a few hundred chunks
//! at most, so a linear scan stays well under a millisecond.

use std::path::PathBuf;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::store::{IndexMeta, IndexedChunk, RetrievedChunk, VectorStore};
use crate::core::config::AppPaths;
use crate::core::errors::ApiError;

pub struct SqliteVectorStore {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl SqliteVectorStore {
    pub async fn new(paths: &AppPaths) -> Result<Self, ApiError> {
        Self::with_path(paths.index_db_path.clone()).await
    }

    pub async fn with_path(db_path: PathBuf) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { pool, db_path };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                section TEXT NOT NULL DEFAULT '',
                sequence_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        let denom = norm_a * norm_b;

        if denom <= f32::EPSILON {
            0.0
        } else {
            dot / denom
        }
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> IndexedChunk {
        let sequence_index: i64 = row.get("sequence_index");
        IndexedChunk {
            chunk_id: row.get("chunk_id"),
            document_id: row.get("document_id"),
            section: row.get("section"),
            sequence_index: sequence_index.max(0) as usize,
            content: row.get("content"),
        }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, items: Vec<(IndexedChunk, Vec<f32>)>) -> Result<(), ApiError> {
        if items.is_empty() {
            return Ok(());
        }

        let meta = self.meta().await?.ok_or_else(|| {
            ApiError::BadRequest("index has no recorded embedding model; reset it first".to_string())
        })?;
        if let Some((chunk, vector)) = items.iter().find(|(_, v)| v.len() != meta.dimension) {
            return Err(ApiError::BadRequest(format!(
                "embedding dimension {} for chunk {} does not match index dimension {} (model {})",
                vector.len(),
                chunk.chunk_id,
                meta.dimension,
                meta.embedding_model
            )));
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        for (chunk, embedding) in &items {
            let blob = Self::serialize_embedding(embedding);
            sqlx::query(
                "INSERT OR REPLACE INTO chunks (chunk_id, document_id, section, sequence_index, content, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.document_id)
            .bind(&chunk.section)
            .bind(chunk.sequence_index as i64)
            .bind(&chunk.content)
            .bind(&blob)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        }

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize, ApiError> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected() as usize)
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, ApiError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let Some(meta) = self.meta().await? else {
            return Ok(Vec::new());
        };
        if query.len() != meta.dimension {
            return Err(ApiError::Retrieval(format!(
                "query dimension {} does not match index dimension {} (model {})",
                query.len(),
                meta.dimension,
                meta.embedding_model
            )));
        }

        let rows = sqlx::query(
            "SELECT chunk_id, document_id, section, sequence_index, content, embedding
             FROM chunks",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::retrieval)?;

        let mut scored: Vec<RetrievedChunk> = rows
            .iter()
            .filter_map(|row| {
                let embedding_bytes: Vec<u8> = row.get("embedding");
                if embedding_bytes.is_empty() {
                    return None;
                }
                let stored = Self::deserialize_embedding(&embedding_bytes);
                let score = Self::cosine_similarity(query, &stored);

                Some(RetrievedChunk {
                    chunk: Self::row_to_chunk(row),
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.sequence_index.cmp(&b.chunk.sequence_index))
        });
        scored.truncate(k);

        Ok(scored)
    }

    async fn count(&self) -> Result<usize, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(count as usize)
    }

    async fn meta(&self) -> Result<Option<IndexMeta>, ApiError> {
        let model: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'embedding_model'")
                .fetch_optional(&self.pool)
                .await
                .map_err(ApiError::internal)?;
        let dimension: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'embedding_dimension'")
                .fetch_optional(&self.pool)
                .await
                .map_err(ApiError::internal)?;

        match (model, dimension) {
            (Some(model), Some(dim)) => {
                let dimension = dim
                    .parse::<usize>()
                    .map_err(|_| ApiError::Internal(format!("corrupt index dimension: {}", dim)))?;
                Ok(Some(IndexMeta {
                    embedding_model: model,
                    dimension,
                }))
            }
            _ => Ok(None),
        }
    }

    async fn reset(&self, meta: &IndexMeta) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        sqlx::query("DELETE FROM chunks")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query(
            "INSERT OR REPLACE INTO index_meta (key, value, updated_at)
             VALUES ('embedding_model', ?1, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))",
        )
        .bind(&meta.embedding_model)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "INSERT OR REPLACE INTO index_meta (key, value, updated_at)
             VALUES ('embedding_dimension', ?1, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))",
        )
        .bind(meta.dimension.to_string())
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteVectorStore {
        let tmp = std::env::temp_dir().join(format!(
            "lorekeeper-index-test-{}.db",
            uuid::Uuid::new_v4()
        ));
        let store = SqliteVectorStore::with_path(tmp).await.unwrap();
        store
            .reset(&IndexMeta {
                embedding_model: "test-embed".to_string(),
                dimension: 3,
            })
            .await
            .unwrap();
        store
    }

    fn make_chunk(id: &str, content: &str, document: &str, seq: usize) -> IndexedChunk {
        IndexedChunk {
            chunk_id: id.to_string(),
            document_id: document.to_string(),
            section: "## Test".to_string(),
            sequence_index: seq,
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_and_search() {
        let store = test_store().await;

        store
            .upsert(vec![
                (make_chunk("c1", "gacha pity", "doc", 0), vec![1.0, 0.0, 0.0]),
                (make_chunk("c2", "stamina regen", "doc", 1), vec![0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        let results = store.search(&[1.0, 0.0, 0.0], 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.chunk_id, "c1");
        assert!(results[0].score > 0.99);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn search_caps_results_at_k() {
        let store = test_store().await;

        store
            .upsert(vec![
                (make_chunk("best", "gacha pity", "doc", 0), vec![1.0, 0.0, 0.0]),
                (make_chunk("middle", "gacha rates", "doc", 1), vec![1.0, 1.0, 0.0]),
                (make_chunk("worst", "stamina regen", "doc", 2), vec![0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();

        let results = store.search(&[1.0, 0.0, 0.0], 2).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["best", "middle"]);
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn equal_scores_keep_document_order() {
        let store = test_store().await;

        store
            .upsert(vec![
                (make_chunk("late", "same", "doc", 5), vec![1.0, 0.0, 0.0]),
                (make_chunk("early", "same", "doc", 1), vec![1.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let results = store.search(&[1.0, 0.0, 0.0], 10).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_chunks() {
        let store = test_store().await;

        store
            .upsert(vec![(make_chunk("c1", "old text", "doc", 0), vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert(vec![(make_chunk("c1", "new text", "doc", 0), vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let results = store.search(&[1.0, 0.0, 0.0], 1).await.unwrap();
        assert_eq!(results[0].chunk.content, "new text");
    }

    #[tokio::test]
    async fn delete_by_document_scopes_to_one_document() {
        let store = test_store().await;

        store
            .upsert(vec![
                (make_chunk("a1", "x", "doc-a", 0), vec![1.0, 0.0, 0.0]),
                (make_chunk("a2", "y", "doc-a", 1), vec![1.0, 0.0, 0.0]),
                (make_chunk("b1", "z", "doc-b", 0), vec![1.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let deleted = store.delete_by_document("doc-a").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let store = test_store().await;

        let err = store
            .upsert(vec![(make_chunk("c1", "x", "doc", 0), vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err = store.search(&[1.0, 0.0], 5).await.unwrap_err();
        assert!(matches!(err, ApiError::Retrieval(_)));
    }

    #[tokio::test]
    async fn reset_clears_vectors_and_records_meta() {
        let store = test_store().await;
        store
            .upsert(vec![(make_chunk("c1", "x", "doc", 0), vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        store
            .reset(&IndexMeta {
                embedding_model: "embed-v2".to_string(),
                dimension: 4,
            })
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
        let meta = store.meta().await.unwrap().unwrap();
        assert_eq!(meta.embedding_model, "embed-v2");
        assert_eq!(meta.dimension, 4);
    }

    #[tokio::test]
    async fn searching_an_untouched_index_yields_nothing() {
        let tmp = std::env::temp_dir().join(format!(
            "lorekeeper-index-empty-{}.db",
            uuid::Uuid::new_v4()
        ));
        let store = SqliteVectorStore::with_path(tmp).await.unwrap();
        let results = store.search(&[1.0, 0.0, 0.0], 5).await.unwrap();
        assert!(results.is_empty());
    }
}
