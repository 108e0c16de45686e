//! Tag-scoped embedding index and retrieval pipeline.
//!
//! Source files are split into line windows, embedded and stored per corpus
//! (one corpus per workspace directory and branch) in `SQLite`, Qdrant or
//! memory. Queries embed once, fan out over the eligible corpora, optionally
//! rerank, and come back as formatted context items.

pub mod chunker;
pub mod context;
pub mod error;
pub mod indexer;
pub mod pipeline;
pub mod provider;
pub mod registry;
pub mod retriever;
pub mod selector;
pub mod session;
pub mod store;
pub mod tag;
pub mod walker;
pub mod watcher;

pub use context::ContextItem;
pub use error::{IndexError, Result};
pub use indexer::{IndexDelta, Indexer, IndexerConfig};
pub use provider::{ContextProviderKind, ContextService};
pub use retriever::{RetrievalRequest, Retriever};
pub use selector::{BackendMode, BackendSelector, RemoteConfig};
pub use session::Session;
pub use store::{ChunkStore, CorpusInfo};
pub use tag::Tag;
