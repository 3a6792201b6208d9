//! Grounded question answering over a single game design document.
//!
//! The pipeline: a markdown loader splits the document into heading-aware
//! chunks, an embedding provider turns them into vectors stored in SQLite,
//! and each chat turn retrieves the chunks closest to the question and asks
//! a chat model to answer from them alone. Conversations persist across
//! turns in a second SQLite database.
//!
//! - [`loader`]: markdown loading and chunking
//! - [`embedding`]: embedding provider trait and OpenAI-compatible client
//! - [`rag`]: vector store, retriever and the startup indexer
//! - [`generation`]: prompt assembly and grounded answer generation
//! - [`llm`]: chat provider trait and OpenAI-compatible client
//! - [`history`]: session and message persistence
//! - [`chat`]: the facade that runs one full chat turn
//! - [`server`]: HTTP routes
//! - [`state`]: shared application state

pub mod chat;
pub mod core;
pub mod embedding;
pub mod generation;
pub mod history;
pub mod llm;
pub mod loader;
pub mod rag;
pub mod server;
pub mod state;

pub use crate::chat::{ChatAnswer, ChatService};
pub use crate::core::errors::ApiError;
pub use crate::generation::{Answer, SourceRef};
pub use crate::state::AppState;
