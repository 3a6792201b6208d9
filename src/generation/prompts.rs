//! Prompt templates for grounded answering.

use crate::core::errors::ApiError;

/// The prompt set used by the answer generator. Defaults keep the model on
/// a short leash: answer from the supplied excerpts or admit the document
/// does not cover the question.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    /// System instruction. Must contain `{context}`, which is replaced
    /// with the rendered document excerpts.
    pub system_prompt: String,
    /// Per-chunk block. Must contain `{section}` and `{content}`.
    pub context_section_format: String,
    /// Answer returned without calling the model when retrieval finds
    /// nothing above the similarity floor.
    pub no_context_message: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            system_prompt: "\
You are the studio's assistant for questions about the game design document.

Rules:
1. Answer only from the document excerpts below.
2. If the excerpts do not contain the answer, say the design document does not cover it. Never guess and never use outside knowledge.
3. Quote numbers and named terms exactly as written.
4. Answer in the language the question was asked in, and keep it concise.

Document excerpts:
{context}"
                .to_string(),
            context_section_format: "[{section}]\n{content}".to_string(),
            no_context_message:
                "I could not find anything about that in the design document. \
Try rephrasing the question or asking about another part of the game."
                    .to_string(),
        }
    }
}

impl PromptTemplates {
    pub fn validate(&self) -> Result<(), ApiError> {
        if !self.system_prompt.contains("{context}") {
            return Err(ApiError::BadRequest(
                "system_prompt must contain {context}".to_string(),
            ));
        }
        if !self.context_section_format.contains("{section}")
            || !self.context_section_format.contains("{content}")
        {
            return Err(ApiError::BadRequest(
                "context_section_format must contain {section} and {content}".to_string(),
            ));
        }
        Ok(())
    }

    pub fn render_system(&self, context: &str) -> String {
        self.system_prompt.replace("{context}", context)
    }

    /// Renders one excerpt block. The heading markers are stripped for
    /// display; a chunk with no section is labelled "Other".
    pub fn render_block(&self, section: &str, content: &str) -> String {
        let label = section.trim_start_matches('#').trim();
        let label = if label.is_empty() { "Other" } else { label };
        self.context_section_format
            .replace("{section}", label)
            .replace("{content}", content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_templates_validate() {
        assert!(PromptTemplates::default().validate().is_ok());
    }

    #[test]
    fn placeholders_are_required() {
        let templates = PromptTemplates {
            system_prompt: "no placeholder here".to_string(),
            ..PromptTemplates::default()
        };
        assert!(templates.validate().is_err());

        let templates = PromptTemplates {
            context_section_format: "{section} only".to_string(),
            ..PromptTemplates::default()
        };
        assert!(templates.validate().is_err());
    }

    #[test]
    fn blocks_strip_heading_markers() {
        let templates = PromptTemplates::default();
        assert_eq!(
            templates.render_block("## Gacha", "Pity after 100 pulls."),
            "[Gacha]\nPity after 100 pulls."
        );
        assert_eq!(templates.render_block("", "intro"), "[Other]\nintro");
    }
}
