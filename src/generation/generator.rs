//! Grounded answer generation.
//!
//! Takes the retrieved chunks, renders them into the system prompt, adds a
//! bounded window of conversation history and asks the chat provider for an
//! answer. When retrieval came back empty the generator answers with the
//! fallback message directly and never calls the model.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;
use crate::llm::{ChatMessage, ChatProvider};
use crate::rag::RetrievedChunk;

use super::prompts::PromptTemplates;

/// How many characters of a source chunk are echoed back to the caller.
const SOURCE_PREVIEW_CHARS: usize = 300;

/// Reference to a chunk that grounded an answer. `content` is a preview,
/// not the full chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub content: String,
    pub section: String,
    pub score: f32,
}

/// A generated answer together with the evidence it was built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceRef>,
    /// Top retrieval similarity clamped to [0, 1]. A rough signal of how
    /// well the document covered the question, not a calibrated probability.
    pub confidence: f32,
}

pub struct AnswerGenerator {
    llm: Arc<dyn ChatProvider>,
    templates: PromptTemplates,
    max_context_chars: usize,
    history_window: usize,
    history_char_budget: usize,
}

impl AnswerGenerator {
    pub fn new(
        llm: Arc<dyn ChatProvider>,
        templates: PromptTemplates,
        max_context_chars: usize,
        history_window: usize,
        history_char_budget: usize,
    ) -> Result<Self, ApiError> {
        templates.validate()?;
        Ok(Self {
            llm,
            templates,
            max_context_chars,
            history_window,
            history_char_budget,
        })
    }

    /// Generates an answer for `question` from `retrieved` chunks, with
    /// `history` ordered oldest first. `retrieved` must be sorted by score
    /// descending, which is what the retriever produces.
    pub async fn generate(
        &self,
        question: &str,
        retrieved: &[RetrievedChunk],
        history: &[ChatMessage],
    ) -> Result<Answer, ApiError> {
        if retrieved.is_empty() {
            tracing::info!("no relevant chunks found, answering with the fallback message");
            return Ok(Answer {
                text: self.templates.no_context_message.clone(),
                sources: Vec::new(),
                confidence: 0.0,
            });
        }

        let context = self.build_context(retrieved);
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(self.templates.render_system(&context)));
        messages.extend(self.windowed_history(history));
        messages.push(ChatMessage::user(question));

        tracing::debug!(
            "generating with {} context chunks and {} history messages",
            retrieved.len(),
            messages.len() - 2
        );
        let text = self.llm.chat(&messages).await?;

        let confidence = retrieved[0].score.clamp(0.0, 1.0);
        let sources = retrieved
            .iter()
            .map(|hit| SourceRef {
                content: preview(&hit.chunk.content, SOURCE_PREVIEW_CHARS),
                section: hit.chunk.section.clone(),
                score: hit.score,
            })
            .collect();

        Ok(Answer {
            text: text.trim().to_string(),
            sources,
            confidence,
        })
    }

    /// Renders the retrieved chunks into one context string, best hit
    /// first, cut off at the character budget.
    fn build_context(&self, retrieved: &[RetrievedChunk]) -> String {
        let blocks: Vec<String> = retrieved
            .iter()
            .map(|hit| self.templates.render_block(&hit.chunk.section, &hit.chunk.content))
            .collect();
        truncate_chars(&blocks.join("\n\n"), self.max_context_chars)
    }

    /// Picks the most recent history messages that fit both the message
    /// window and the character budget, returned oldest first.
    fn windowed_history(&self, history: &[ChatMessage]) -> Vec<ChatMessage> {
        let mut used = 0usize;
        let mut selected: Vec<ChatMessage> = Vec::new();
        for message in history.iter().rev().take(self.history_window) {
            let chars = message.content.chars().count();
            if used + chars > self.history_char_budget {
                break;
            }
            used += chars;
            selected.push(message.clone());
        }
        selected.reverse();
        selected
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    truncate_chars(text, max_chars)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
