use std::fmt;

use ollama_rs::Ollama;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use reqwest::Url;

use crate::error::LlmError;
use crate::provider::EmbeddingProvider;

const DEFAULT_PORT: u16 = 11434;

#[derive(Clone)]
pub struct OllamaEmbedder {
    client: Ollama,
    model: String,
    dimensions: Option<usize>,
    batch_size: usize,
}

impl fmt::Debug for OllamaEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OllamaEmbedder")
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl OllamaEmbedder {
    /// # Errors
    ///
    /// Returns `LlmError::Other` if `base_url` is not a valid URL.
    pub fn new(base_url: &str, model: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: Ollama::from_url(endpoint_url(base_url)?),
            model,
            dimensions: None,
            batch_size: 32,
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

impl EmbeddingProvider for OllamaEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn id(&self) -> &str {
        "ollama"
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

        let request = GenerateEmbeddingsRequest::new(
            self.model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );

        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| LlmError::Other(format!("Ollama embedding request failed: {e}")))?;

        if response.embeddings.is_empty() {
            return Err(LlmError::EmptyResponse {
                provider: "ollama".into(),
            });
        }
        if response.embeddings.len() != texts.len() {
            return Err(LlmError::EmbeddingCount {
                provider: "ollama".into(),
                expected: texts.len(),
                actual: response.embeddings.len(),
            });
        }
        Ok(response.embeddings)
    }
}

/// Parse the configured base URL, filling in the Ollama port when none is given.
fn endpoint_url(base_url: &str) -> Result<Url, LlmError> {
    let mut url = Url::parse(base_url.trim_end_matches('/'))
        .map_err(|e| LlmError::Other(format!("invalid Ollama URL {base_url}: {e}")))?;
    if url.port().is_none() {
        url.set_port(Some(DEFAULT_PORT))
            .map_err(|()| LlmError::Other(format!("Ollama URL {base_url} cannot carry a port")))?;
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn endpoint_url_variants() {
        assert_eq!(
            endpoint_url("http://localhost:11434").unwrap().as_str(),
            "http://localhost:11434/"
        );
        assert_eq!(endpoint_url("http://gpu-box:8080/").unwrap().port(), Some(8080));
        assert_eq!(
            endpoint_url("http://localhost").unwrap().port(),
            Some(DEFAULT_PORT)
        );
        assert!(endpoint_url("http://localhost:99999").is_err());
        assert!(endpoint_url("not a url").is_err());
    }

    #[test]
    fn invalid_base_url_is_an_error() {
        assert!(OllamaEmbedder::new("::", "m".into()).is_err());
    }

    #[test]
    fn builder_settings() {
        let embedder = OllamaEmbedder::new("http://localhost:11434", "nomic-embed-text".into())
            .unwrap()
            .with_dimensions(768)
            .with_batch_size(0);
        assert_eq!(embedder.id(), "ollama");
        assert_eq!(embedder.model(), "nomic-embed-text");
        assert_eq!(embedder.dimensions(), Some(768));
        assert_eq!(embedder.max_batch_size(), 1);
    }

    #[tokio::test]
    async fn embed_batch_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "nomic-embed-text",
                "embeddings": [[0.5, 0.5], [1.0, 0.0]]
            })))
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::new(&server.uri(), "nomic-embed-text".into()).unwrap();
        let vectors = embedder
            .embed(&["fn main".to_string(), "struct Foo".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn embed_count_mismatch_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "m",
                "embeddings": [[0.5, 0.5]]
            })))
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::new(&server.uri(), "m".into()).unwrap();
        let err = embedder
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::EmbeddingCount { expected: 2, actual: 1, .. }));
    }
}
