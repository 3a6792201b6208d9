//! Answer generation: prompt assembly and the grounded-answer pipeline step.

pub mod generator;
pub mod prompts;

pub use generator::{Answer, AnswerGenerator, SourceRef};
pub use prompts::PromptTemplates;
