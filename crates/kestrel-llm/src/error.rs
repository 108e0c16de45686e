#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rate limited")]
    RateLimited,

    #[error("empty response from {provider}")]
    EmptyResponse { provider: String },

    #[error("{provider} returned {actual} embeddings for {expected} inputs")]
    EmbeddingCount {
        provider: String,
        expected: usize,
        actual: usize,
    },

    #[error("{provider} request failed (status {status})")]
    Status { provider: String, status: u16 },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, LlmError>;
