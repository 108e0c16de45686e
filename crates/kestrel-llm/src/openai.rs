//! OpenAI-compatible `/embeddings` endpoint.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::EmbeddingProvider;
use crate::retry::send_with_retry;

const MAX_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    dimensions: Option<usize>,
    batch_size: usize,
}

impl fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl OpenAiEmbedder {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Result<Self, LlmError> {
        Ok(Self {
            client: crate::http::default_client()?,
            api_key,
            base_url: crate::http::trim_base_url(base_url),
            model,
            dimensions: None,
            batch_size: 64,
        })
    }

    #[must_use]
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn id(&self) -> &str {
        "openai"
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            input: texts,
            model: &self.model,
        };
        let url = format!("{}/embeddings", self.base_url);

        let response = send_with_retry("openai", MAX_RETRIES, || {
            let mut req = self.client.post(&url).json(&body);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }
            req.send()
        })
        .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            tracing::error!(%status, body = %text, "embedding API error");
            return Err(LlmError::Status {
                provider: "openai".into(),
                status: status.as_u16(),
            });
        }

        let resp: EmbeddingResponse = serde_json::from_str(&text)?;
        into_ordered_vectors(resp, texts.len())
    }
}

fn into_ordered_vectors(resp: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>, LlmError> {
    if resp.data.is_empty() {
        return Err(LlmError::EmptyResponse {
            provider: "openai".into(),
        });
    }
    if resp.data.len() != expected {
        return Err(LlmError::EmbeddingCount {
            provider: "openai".into(),
            expected,
            actual: resp.data.len(),
        });
    }
    let mut data = resp.data;
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
