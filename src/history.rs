//! Conversation persistence.
//!
//! Two tables in one SQLite database: `sessions` and `messages`. Sessions
//! are identified by a UUID and carry an optional title; messages belong to
//! a session and are removed with it. Assistant messages keep the sources
//! and confidence of the answer as a JSON metadata column.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::generation::SourceRef;
use crate::llm::ChatMessage;

const SCHEMA_VERSION: i64 = 1;
const MAX_HISTORY_LIMIT: i64 = 1000;
const MAX_TITLE_CHARS: usize = 160;

/// Who authored a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn from_db(raw: &str) -> Role {
        match raw {
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

/// Provenance attached to an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub sources: Vec<SourceRef>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: String,
    pub metadata: Option<MessageMetadata>,
}

impl StoredMessage {
    /// The message as the chat provider expects it.
    pub fn as_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role.as_str().to_string(),
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    db_path: PathBuf,
    pool: SqlitePool,
}

impl HistoryStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, ApiError> {
        let connect_options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(connect_options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { db_path, pool };
        store.init_db().await?;
        Ok(store)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    async fn init_db(&self) -> Result<(), ApiError> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        if version != SCHEMA_VERSION {
            self.rebuild_schema().await?;
        }

        Ok(())
    }

    async fn rebuild_schema(&self) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        sqlx::query("DROP TABLE IF EXISTS messages")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        sqlx::query("DROP TABLE IF EXISTS sessions")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query(
            "\
            CREATE TABLE sessions (
                id TEXT PRIMARY KEY,
                title TEXT,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "\
            CREATE TABLE messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK(role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                metadata TEXT,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX idx_sessions_updated_at ON sessions(updated_at DESC)")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        sqlx::query("CREATE INDEX idx_messages_session_id_id ON messages(session_id, id)")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        let pragma = format!("PRAGMA user_version = {}", SCHEMA_VERSION);
        sqlx::query(&pragma)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    pub async fn create_session(&self, title: Option<String>) -> Result<SessionInfo, ApiError> {
        let session_id = Uuid::new_v4().to_string();
        let title = title.as_deref().and_then(normalize_title);

        sqlx::query("INSERT INTO sessions (id, title) VALUES (?1, ?2)")
            .bind(&session_id)
            .bind(title)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        self.get_session(&session_id)
            .await?
            .ok_or_else(|| ApiError::Internal("session vanished after insert".to_string()))
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionInfo>, ApiError> {
        let row = sqlx::query(
            "\
            SELECT s.id, s.title, s.created_at, s.updated_at,
                   (SELECT COUNT(*) FROM messages WHERE session_id = s.id) as message_count
            FROM sessions s
            WHERE s.id = ?1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        row.map(session_info_from_row)
            .transpose()
            .map_err(ApiError::internal)
    }

    /// All sessions, most recently active first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>, ApiError> {
        let rows = sqlx::query(
            "\
            SELECT s.id, s.title, s.created_at, s.updated_at,
                   (SELECT COUNT(*) FROM messages WHERE session_id = s.id) as message_count
            FROM sessions s
            ORDER BY s.updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.into_iter()
            .map(session_info_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::internal)
    }

    pub async fn update_session_title(
        &self,
        session_id: &str,
        title: &str,
    ) -> Result<(), ApiError> {
        let Some(title) = normalize_title(title) else {
            return Err(ApiError::BadRequest("title must not be empty".to_string()));
        };

        let result = sqlx::query(
            "UPDATE sessions SET title = ?1, updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?2",
        )
        .bind(title)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!(
                "session '{}' does not exist",
                session_id
            )));
        }
        Ok(())
    }

    /// Deletes a session and all of its messages. Unknown ids are an error.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), ApiError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!(
                "session '{}' does not exist",
                session_id
            )));
        }
        Ok(())
    }

    /// Appends a message to an existing session and bumps the session's
    /// `updated_at`. The session must exist.
    pub async fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Option<&MessageMetadata>,
    ) -> Result<StoredMessage, ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        ensure_session_exists(&mut tx, session_id).await?;

        let payload = metadata
            .map(serde_json::to_string)
            .transpose()
            .map_err(ApiError::internal)?;

        let result = sqlx::query(
            "\
            INSERT INTO messages (session_id, role, content, metadata)
            VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(payload)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        let message_id = result.last_insert_rowid();
        touch_session_tx(&mut tx, session_id).await?;

        let row = sqlx::query(
            "SELECT id, session_id, role, content, metadata, created_at FROM messages WHERE id = ?1",
        )
        .bind(message_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;
        stored_message_from_row(row).map_err(ApiError::internal)
    }

    /// The last `limit` messages of a session in chronological order.
    pub async fn get_history(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<StoredMessage>, ApiError> {
        let limit = sanitize_limit(limit);

        let rows = sqlx::query(
            "\
            SELECT id, session_id, role, content, metadata, created_at
            FROM (
                SELECT id, session_id, role, content, metadata, created_at
                FROM messages
                WHERE session_id = ?1
                ORDER BY id DESC
                LIMIT ?2
            )
            ORDER BY id ASC",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.into_iter()
            .map(stored_message_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::internal)
    }

    pub async fn message_count(&self, session_id: &str) -> Result<i64, ApiError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages WHERE session_id = ?1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)
    }
}

fn session_info_from_row(row: sqlx::sqlite::SqliteRow) -> Result<SessionInfo, sqlx::Error> {
    Ok(SessionInfo {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        message_count: row.try_get("message_count")?,
    })
}

fn stored_message_from_row(row: sqlx::sqlite::SqliteRow) -> Result<StoredMessage, sqlx::Error> {
    let role: String = row.try_get("role")?;
    let raw_metadata: Option<String> = row.try_get("metadata")?;
    let metadata = raw_metadata.and_then(|raw| serde_json::from_str(&raw).ok());

    Ok(StoredMessage {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        role: Role::from_db(&role),
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
        metadata,
    })
}

async fn ensure_session_exists(
    tx: &mut Transaction<'_, Sqlite>,
    session_id: &str,
) -> Result<(), ApiError> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM sessions WHERE id = ?1")
        .bind(session_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(ApiError::internal)?;

    if exists.is_none() {
        return Err(ApiError::NotFound(format!(
            "session '{}' does not exist",
            session_id
        )));
    }
    Ok(())
}

async fn touch_session_tx(
    tx: &mut Transaction<'_, Sqlite>,
    session_id: &str,
) -> Result<(), ApiError> {
    sqlx::query(
        "UPDATE sessions SET updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?1",
    )
    .bind(session_id)
    .execute(&mut **tx)
    .await
    .map_err(ApiError::internal)?;
    Ok(())
}

fn sanitize_limit(limit: i64) -> i64 {
    if limit <= 0 {
        return 1;
    }
    limit.min(MAX_HISTORY_LIMIT)
}

fn normalize_title(title: &str) -> Option<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_TITLE_CHARS).collect())
}
