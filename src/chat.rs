//! The chat pipeline facade.
//!
//! `ChatService` ties retrieval, generation and persistence together into
//! one turn: resolve the session, pull its recent history, retrieve
//! grounding chunks, ask the model, and store both sides of the exchange.
//! The user message is stored before generation; the assistant message
//! only after generation succeeded, so a failed turn leaves the user
//! message as the last entry and a retry reads cleanly.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::core::config::{Settings, MAX_RESULTS_LIMIT};
use crate::core::errors::ApiError;
use crate::generation::{AnswerGenerator, SourceRef};
use crate::history::{HistoryStore, MessageMetadata, Role, SessionInfo, StoredMessage};
use crate::llm::ChatMessage;
use crate::rag::Retriever;

/// One completed chat turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub text: String,
    pub sources: Vec<SourceRef>,
    pub confidence: f32,
    /// Session the turn was recorded under. Echo this back to continue the
    /// conversation.
    pub session_id: String,
}

pub struct ChatService {
    retriever: Retriever,
    generator: AnswerGenerator,
    history: HistoryStore,
    settings: Settings,
    ready: AtomicBool,
}

impl ChatService {
    pub fn new(
        retriever: Retriever,
        generator: AnswerGenerator,
        history: HistoryStore,
        settings: Settings,
    ) -> Self {
        Self {
            retriever,
            generator,
            history,
            settings,
            ready: AtomicBool::new(false),
        }
    }

    /// Marks the document index as built. Until then every chat turn is
    /// rejected with `NotReady`.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Runs one chat turn.
    ///
    /// `max_results` falls back to the configured default; `session_id`
    /// continues an existing session or, when absent, starts a new one.
    pub async fn chat(
        &self,
        question: &str,
        max_results: Option<usize>,
        session_id: Option<&str>,
    ) -> Result<ChatAnswer, ApiError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ApiError::BadRequest("question must not be empty".to_string()));
        }
        let k = max_results.unwrap_or(self.settings.max_results);
        if k == 0 || k > MAX_RESULTS_LIMIT {
            return Err(ApiError::BadRequest(format!(
                "max_results must be between 1 and {}",
                MAX_RESULTS_LIMIT
            )));
        }
        if !self.is_ready() {
            return Err(ApiError::NotReady(
                "the document index is still being built".to_string(),
            ));
        }

        let (session_id, is_fresh) = self.resolve_session(session_id).await?;

        let stored_history = self
            .history
            .get_history(&session_id, self.settings.history_limit as i64)
            .await?;
        let chat_history: Vec<ChatMessage> = stored_history
            .iter()
            .map(StoredMessage::as_chat_message)
            .collect();

        self.history
            .append_message(&session_id, Role::User, question, None)
            .await?;
        if is_fresh || stored_history.is_empty() {
            self.derive_title(&session_id, question).await?;
        }

        let retrieved = self.retriever.retrieve(question, k, &chat_history).await?;
        let answer = self
            .generator
            .generate(question, &retrieved, &chat_history)
            .await?;

        let metadata = MessageMetadata {
            sources: answer.sources.clone(),
            confidence: answer.confidence,
        };
        self.history
            .append_message(&session_id, Role::Assistant, &answer.text, Some(&metadata))
            .await?;

        tracing::info!(
            "chat turn in session {}: {} sources, confidence {:.2}",
            session_id,
            answer.sources.len(),
            answer.confidence
        );

        Ok(ChatAnswer {
            text: answer.text,
            sources: answer.sources,
            confidence: answer.confidence,
            session_id,
        })
    }

    /// Resolves the session for a turn. A supplied id must exist; no id
    /// starts a fresh untitled session.
    async fn resolve_session(&self, session_id: Option<&str>) -> Result<(String, bool), ApiError> {
        match session_id {
            Some(id) => {
                self.history
                    .get_session(id)
                    .await?
                    .ok_or_else(|| {
                        ApiError::NotFound(format!("session '{}' does not exist", id))
                    })?;
                Ok((id.to_string(), false))
            }
            None => {
                let session = self.history.create_session(None).await?;
                tracing::debug!("started session {}", session.id);
                Ok((session.id, true))
            }
        }
    }

    /// Titles an untitled session after its first question.
    async fn derive_title(&self, session_id: &str, question: &str) -> Result<(), ApiError> {
        let session = self.history.get_session(session_id).await?;
        let untitled = session.map(|s| s.title.is_none()).unwrap_or(false);
        if !untitled {
            return Ok(());
        }

        let title: String = question
            .chars()
            .take(self.settings.title_max_chars)
            .collect();
        self.history.update_session_title(session_id, &title).await?;
        Ok(())
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>, ApiError> {
        self.history.list_sessions().await
    }

    /// Messages of an existing session, oldest first.
    pub async fn get_session_messages(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<StoredMessage>, ApiError> {
        self.history
            .get_session(session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("session '{}' does not exist", session_id)))?;
        self.history.get_history(session_id, limit).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), ApiError> {
        self.history.delete_session(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::embedding::EmbeddingProvider;
    use crate::generation::PromptTemplates;
    use crate::llm::ChatProvider;
    use crate::rag::{IndexMeta, IndexedChunk, RetrievedChunk, VectorStore};

    struct OneHotEmbedder;

    #[async_trait]
    impl EmbeddingProvider for OneHotEmbedder {
        fn model(&self) -> &str {
            "one-hot"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct EmptyStore;

    #[async_trait]
    impl VectorStore for EmptyStore {
        async fn upsert(&self, _items: Vec<(IndexedChunk, Vec<f32>)>) -> Result<(), ApiError> {
            Ok(())
        }

        async fn delete_by_document(&self, _document_id: &str) -> Result<usize, ApiError> {
            Ok(0)
        }

        async fn search(&self, _query: &[f32], _k: usize) -> Result<Vec<RetrievedChunk>, ApiError> {
            Ok(Vec::new())
        }

        async fn count(&self) -> Result<usize, ApiError> {
            Ok(0)
        }

        async fn meta(&self) -> Result<Option<IndexMeta>, ApiError> {
            Ok(None)
        }

        async fn reset(&self, _meta: &IndexMeta) -> Result<(), ApiError> {
            Ok(())
        }
    }

    struct EchoChat;

    #[async_trait]
    impl ChatProvider for EchoChat {
        fn name(&self) -> &str {
            "echo"
        }

        async fn chat(&self, _messages: &[ChatMessage]) -> Result<String, ApiError> {
            Ok("echo".to_string())
        }
    }

    async fn service() -> (ChatService, PathBuf) {
        let settings = Settings::default();
        let retriever = Retriever::new(
            Arc::new(OneHotEmbedder),
            Arc::new(EmptyStore),
            settings.similarity_floor,
            settings.query_history_chars,
            Duration::from_secs(5),
        );
        let generator = AnswerGenerator::new(
            Arc::new(EchoChat),
            PromptTemplates::default(),
            settings.max_context_chars,
            settings.history_window,
            settings.history_char_budget,
        )
        .unwrap();
        let path = std::env::temp_dir().join(format!(
            "lorekeeper-chat-{}.db",
            uuid::Uuid::new_v4()
        ));
        let history = HistoryStore::new(path.clone()).await.unwrap();
        (
            ChatService::new(retriever, generator, history, settings),
            path,
        )
    }

    #[tokio::test]
    async fn blank_questions_are_rejected() {
        let (service, _path) = service().await;
        service.mark_ready();

        let err = service.chat("   ", None, None).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn max_results_is_bounded() {
        let (service, _path) = service().await;
        service.mark_ready();

        let err = service.chat("q", Some(0), None).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        let err = service.chat("q", Some(11), None).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn turns_are_rejected_before_indexing() {
        let (service, _path) = service().await;

        let err = service.chat("q", None, None).await.unwrap_err();
        assert!(matches!(err, ApiError::NotReady(_)));
    }

    #[tokio::test]
    async fn unknown_sessions_are_an_error() {
        let (service, _path) = service().await;
        service.mark_ready();

        let err = service.chat("q", None, Some("missing")).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn a_turn_records_both_messages_and_titles_the_session() {
        let (service, _path) = service().await;
        service.mark_ready();

        let answer = service.chat("what is the pity?", None, None).await.unwrap();
        assert!(!answer.session_id.is_empty());

        let messages = service
            .get_session_messages(&answer.session_id, 10)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);

        let sessions = service.list_sessions().await.unwrap();
        assert_eq!(sessions[0].title.as_deref(), Some("what is the pity?"));
    }

    #[tokio::test]
    async fn long_first_questions_get_a_truncated_title() {
        let (service, _path) = service().await;
        service.mark_ready();

        let question =
            "How does the gacha pity counter interact with the limited banner rate up schedule?";
        let max = Settings::default().title_max_chars;
        assert!(question.chars().count() > max);

        let answer = service.chat(question, None, None).await.unwrap();

        let sessions = service.list_sessions().await.unwrap();
        assert_eq!(sessions[0].id, answer.session_id);
        let title = sessions[0].title.as_deref().unwrap();
        assert_eq!(title.chars().count(), max);
        let expected: String = question.chars().take(max).collect();
        assert_eq!(title, expected);
    }
}
