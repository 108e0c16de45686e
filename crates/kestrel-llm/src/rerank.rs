//! Second-stage relevance scoring over retrieved candidates.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::retry::send_with_retry;

const MAX_RETRIES: u32 = 2;

pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// Score each document against `query`. Returns one score per input,
    /// in input order; higher is more relevant.
    ///
    /// # Errors
    ///
    /// Returns an error if the scoring backend fails.
    fn score(
        &self,
        query: &str,
        documents: &[String],
    ) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;
}

/// Cohere/Voyage/Jina-style `POST {base}/rerank` endpoint.
#[derive(Clone)]
pub struct HttpReranker {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl fmt::Debug for HttpReranker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpReranker")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl HttpReranker {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Result<Self, LlmError> {
        Ok(Self {
            client: crate::http::default_client()?,
            base_url: crate::http::trim_base_url(base_url),
            model,
            api_key,
        })
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

impl Reranker for HttpReranker {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "http"
    }

    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, LlmError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let body = RerankRequest {
            model: &self.model,
            query,
            documents,
            top_n: documents.len(),
        };
        let url = format!("{}/rerank", self.base_url);

        let response = send_with_retry("rerank", MAX_RETRIES, || {
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
            tracing::error!(%status, body = %text, "rerank API error");
            return Err(LlmError::Status {
                provider: "rerank".into(),
                status: status.as_u16(),
            });
        }
        let resp: RerankResponse = serde_json::from_str(&text)?;
        scatter_scores(resp.results, documents.len())
    }
}

/// Map `(index, score)` pairs back onto input order. Indices not returned
/// by the service score as negative infinity.
fn scatter_scores(results: Vec<RerankResult>, len: usize) -> Result<Vec<f32>, LlmError> {
    let mut scores = vec![f32::NEG_INFINITY; len];
    for r in results {
        let slot = scores.get_mut(r.index).ok_or_else(|| {
            LlmError::Other(format!("rerank index {} out of range ({len} documents)", r.index))
        })?;
        *slot = r.relevance_score;
    }
    Ok(scores)
}

/// Token-overlap scorer. Needs no network; useful offline and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalReranker;

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() > 1)
        .map(str::to_lowercase)
        .collect()
}

impl Reranker for LexicalReranker {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "lexical"
    }

    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, LlmError> {
        let q = tokens(query);
        if q.is_empty() {
            return Ok(vec![0.0; documents.len()]);
        }
        #[allow(clippy::cast_precision_loss)]
        let scores = documents
            .iter()
            .map(|doc| {
                let d = tokens(doc);
                q.iter().filter(|t| d.contains(*t)).count() as f32 / q.len() as f32
            })
            .collect();
        Ok(scores)
    }
}

#[derive(Debug, Clone)]
pub enum AnyReranker {
    Http(HttpReranker),
    Lexical(LexicalReranker),
}

impl Reranker for AnyReranker {
    fn name(&self) -> &str {
        match self {
            Self::Http(r) => r.name(),
            Self::Lexical(r) => r.name(),
        }
    }

    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, LlmError> {
        match self {
            Self::Http(r) => r.score(query, documents).await,
            Self::Lexical(r) => r.score(query, documents).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn lexical_prefers_overlap() {
        let docs = vec![
            "fn parse_config(path: &Path)".to_string(),
            "struct Renderer { width: u32 }".to_string(),
        ];
        let scores = LexicalReranker.score("parse config", &docs).await.unwrap();
        assert!(scores[0] > scores[1]);
    }

    #[tokio::test]
    async fn lexical_empty_query_scores_zero() {
        let docs = vec!["anything".to_string()];
        assert_eq!(LexicalReranker.score("?", &docs).await.unwrap(), vec![0.0]);
    }

    #[test]
    fn scatter_out_of_range_errors() {
        let results = vec![RerankResult {
            index: 5,
            relevance_score: 0.1,
        }];
        assert!(scatter_scores(results, 2).is_err());
    }

    #[tokio::test]
    async fn http_reranker_maps_indices_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/rerank"))
            .and(body_partial_json(serde_json::json!({"model": "rerank-2", "top_n": 3})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"index": 2, "relevance_score": 0.9},
                    {"index": 0, "relevance_score": 0.4}
                ]
            })))
            .mount(&server)
            .await;

        let reranker =
            HttpReranker::new(format!("{}/v1/", server.uri()), "rerank-2".into(), None).unwrap();
        let docs = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let scores = AnyReranker::Http(reranker).score("q", &docs).await.unwrap();
        assert!((scores[0] - 0.4).abs() < f32::EPSILON);
        assert!(scores[1].is_infinite());
        assert!((scores[2] - 0.9).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn http_reranker_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let reranker = HttpReranker::new(server.uri(), "m".into(), Some("k".into())).unwrap();
        let err = reranker.score("q", &["d".to_string()]).await.unwrap_err();
        assert!(matches!(err, LlmError::Status { status: 503, .. }));
    }
}
