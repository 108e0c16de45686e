//! Second-stage selection strategies over merged retrieval candidates.

use std::future::Future;
use std::path::PathBuf;

use kestrel_llm::{LlmError, Reranker};

use crate::error::{IndexError, Result};
use crate::store::ScoredChunk;

/// A similarity hit together with the root of the corpus it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub chunk: ScoredChunk,
    pub root: PathBuf,
}

impl Candidate {
    /// Path relative to the corpus root, falling back to the stored path.
    #[must_use]
    pub fn relative_path(&self) -> String {
        std::path::Path::new(&self.chunk.filepath)
            .strip_prefix(&self.root)
            .map_or_else(
                |_| self.chunk.filepath.clone(),
                |p| p.to_string_lossy().into_owned(),
            )
    }
}

pub trait RetrievalPipeline: Send + Sync {
    fn name(&self) -> &'static str;

    /// Narrow `candidates` to at most `n_final`, best first.
    ///
    /// # Errors
    ///
    /// Returns an error if a scoring backend fails or scores a different
    /// number of candidates than it was given.
    fn select(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        n_final: usize,
    ) -> impl Future<Output = Result<Vec<Candidate>>> + Send;
}

/// Keeps the top `n_final` by similarity score.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRerankerPipeline;

impl RetrievalPipeline for NoRerankerPipeline {
    fn name(&self) -> &'static str {
        "no-reranker"
    }

    async fn select(
        &self,
        _query: &str,
        mut candidates: Vec<Candidate>,
        n_final: usize,
    ) -> Result<Vec<Candidate>> {
        candidates.sort_by(|a, b| b.chunk.score.total_cmp(&a.chunk.score));
        candidates.truncate(n_final);
        Ok(candidates)
    }
}

/// Rescores candidates with a [`Reranker`] before truncating.
#[derive(Debug)]
pub struct RerankerPipeline<'a, R: Reranker> {
    reranker: &'a R,
}

impl<'a, R: Reranker> RerankerPipeline<'a, R> {
    #[must_use]
    pub fn new(reranker: &'a R) -> Self {
        Self { reranker }
    }
}

impl<R: Reranker> RetrievalPipeline for RerankerPipeline<'_, R> {
    fn name(&self) -> &'static str {
        "reranker"
    }

    async fn select(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        n_final: usize,
    ) -> Result<Vec<Candidate>> {
        if candidates.is_empty() || n_final == 0 {
            return Ok(Vec::new());
        }
        let documents: Vec<String> = candidates
            .iter()
            .map(|c| format!("{}\n{}", c.relative_path(), c.chunk.content))
            .collect();
        let scores = self.reranker.score(query, &documents).await?;
        if scores.len() != candidates.len() {
            return Err(IndexError::Llm(LlmError::Other(format!(
                "reranker {} returned {} scores for {} candidates",
                self.reranker.name(),
                scores.len(),
                candidates.len()
            ))));
        }
        tracing::debug!(
            reranker = self.reranker.name(),
            candidates = candidates.len(),
            "reranked candidates"
        );

        let mut scored: Vec<(f32, Candidate)> = scores.into_iter().zip(candidates).collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(n_final)
            .map(|(score, mut c)| {
                c.chunk.score = score;
                c
            })
            .collect())
    }
}
