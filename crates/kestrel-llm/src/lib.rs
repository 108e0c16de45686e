//! Embedding and reranking provider abstraction.
//!
//! Providers turn text into fixed-dimension vectors for the code index and,
//! optionally, score query/document pairs for a second ranking stage.

pub mod any;
pub mod error;
mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod rerank;
mod retry;

pub use error::LlmError;
pub use provider::{CapabilityTable, EmbeddingProvider, HostKind};
pub use rerank::Reranker;
