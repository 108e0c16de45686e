//! Error types for kestrel-index.

use kestrel_llm::HostKind;

/// Errors raised by indexing, storage and retrieval.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Chunk store I/O failure. Fatal for the operation, never retried.
    #[error("chunk store unavailable: {0}")]
    StorageUnavailable(String),

    /// No tag or filter resolved to an existing corpus.
    #[error("no indexed corpus available for this request")]
    NoCorpusAvailable,

    /// The embedding provider cannot run on the current host.
    #[error("embedding provider '{provider}' is not supported on {host}: {reason}")]
    UnsupportedProviderOnHost {
        provider: String,
        host: HostKind,
        reason: String,
    },

    /// Remote mode was requested without complete connection parameters.
    #[error("remote backend is not configured (missing: {})", missing.join(", "))]
    RemoteBackendUnconfigured { missing: Vec<&'static str> },

    /// One embedding batch failed during reindex.
    #[error("embedding batch {batch} failed: {source}")]
    EmbeddingBatchFailed {
        batch: usize,
        #[source]
        source: kestrel_llm::LlmError,
    },

    #[error("operation cancelled")]
    Cancelled,

    /// Vector length does not match the corpus dimension.
    #[error("dimension mismatch: corpus expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedding or reranking provider error outside batch processing.
    #[error("LLM error: {0}")]
    Llm(#[from] kestrel_llm::LlmError),

    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("{0}")]
    Other(String),
}

impl From<sqlx::Error> for IndexError {
    fn from(e: sqlx::Error) -> Self {
        Self::StorageUnavailable(format!("sqlite: {e}"))
    }
}

impl From<sqlx::migrate::MigrateError> for IndexError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Self::StorageUnavailable(format!("sqlite migration: {e}"))
    }
}

impl From<qdrant_client::QdrantError> for IndexError {
    fn from(e: qdrant_client::QdrantError) -> Self {
        Self::StorageUnavailable(format!("qdrant: {e}"))
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
