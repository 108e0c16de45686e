//! Query path: resolve corpora → embed once → fan out → select → format.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::try_join_all;
use kestrel_llm::rerank::AnyReranker;
use kestrel_llm::{EmbeddingProvider, Reranker};

use crate::context::{ContextItem, format_results, instructions_item};
use crate::error::{IndexError, Result};
use crate::pipeline::{Candidate, NoRerankerPipeline, RerankerPipeline, RetrievalPipeline};
use crate::registry::{corpora_for, corpora_under};
use crate::session::Session;
use crate::store::{ChunkStore, CorpusInfo};
use crate::tag::{Tag, is_at_or_under};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRequest {
    pub input_text: String,
    /// Candidates fetched per corpus.
    pub n_retrieve: usize,
    /// Results kept after selection; clamped to `n_retrieve`.
    pub n_final: usize,
    pub tags: Vec<Tag>,
    pub filter_directory: Option<PathBuf>,
    /// Corpora addressed by id, searched in addition to tag matches.
    pub corpus_ids: Vec<String>,
    /// Search every stored corpus, ignoring tags and filter.
    pub all_corpora: bool,
    pub use_reranker: bool,
}

impl RetrievalRequest {
    #[must_use]
    pub fn new(input_text: impl Into<String>, n_retrieve: usize, n_final: usize) -> Self {
        Self {
            input_text: input_text.into(),
            n_retrieve,
            n_final,
            tags: Vec::new(),
            filter_directory: None,
            corpus_ids: Vec::new(),
            all_corpora: false,
            use_reranker: false,
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, directory: impl Into<PathBuf>) -> Self {
        self.filter_directory = Some(directory.into());
        self
    }

    #[must_use]
    pub fn with_corpus_ids(mut self, ids: Vec<String>) -> Self {
        self.corpus_ids = ids;
        self
    }

    #[must_use]
    pub fn with_all_corpora(mut self) -> Self {
        self.all_corpora = true;
        self
    }

    #[must_use]
    pub fn with_reranker(mut self, enabled: bool) -> Self {
        self.use_reranker = enabled;
        self
    }
}

pub struct Retriever<P: EmbeddingProvider, R: Reranker = AnyReranker> {
    store: Arc<dyn ChunkStore>,
    provider: Arc<P>,
    reranker: Option<Arc<R>>,
    session: Arc<Session>,
    case_fold: bool,
}

impl<P: EmbeddingProvider, R: Reranker> Retriever<P, R> {
    #[must_use]
    pub fn new(
        store: Arc<dyn ChunkStore>,
        provider: Arc<P>,
        reranker: Option<Arc<R>>,
        session: Arc<Session>,
        case_fold: bool,
    ) -> Self {
        Self {
            store,
            provider,
            reranker,
            session,
            case_fold,
        }
    }

    /// Stored corpora eligible for `request`, deduplicated by id.
    ///
    /// A filter without tags selects every corpus at or below it. With tags,
    /// the filter only narrows them.
    async fn eligible_corpora(&self, request: &RetrievalRequest) -> Result<Vec<CorpusInfo>> {
        let stored = self.store.list_corpus_tags().await?;
        let matched: Vec<&CorpusInfo> = if request.all_corpora {
            stored.iter().collect()
        } else {
            let by_tag = match &request.filter_directory {
                Some(filter) if request.tags.is_empty() => {
                    corpora_under(filter, &stored, self.case_fold)
                }
                filter => request
                    .tags
                    .iter()
                    .filter(|t| {
                        filter
                            .as_ref()
                            .is_none_or(|f| is_at_or_under(&t.directory, f, self.case_fold))
                    })
                    .flat_map(|t| corpora_for(t, &stored, self.case_fold))
                    .collect(),
            };
            let by_id = stored
                .iter()
                .filter(|info| request.corpus_ids.contains(&info.id));
            by_tag.into_iter().chain(by_id).collect()
        };

        let mut seen = HashSet::new();
        Ok(matched
            .into_iter()
            .filter(|info| seen.insert(info.id.as_str()))
            .cloned()
            .collect())
    }

    /// Run the full retrieval pipeline.
    ///
    /// # Errors
    ///
    /// Returns `NoCorpusAvailable` when nothing in the request matches an
    /// indexed corpus, and embedding, reranking or storage errors otherwise.
    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<ContextItem>> {
        self.session.record_query();
        let n_final = if request.n_final > request.n_retrieve {
            tracing::debug!(
                n_final = request.n_final,
                n_retrieve = request.n_retrieve,
                "clamping n_final to n_retrieve"
            );
            request.n_retrieve
        } else {
            request.n_final
        };

        let eligible = self.eligible_corpora(request).await?;
        if eligible.is_empty() {
            return Err(IndexError::NoCorpusAvailable);
        }
        if request.n_retrieve == 0 {
            return Ok(vec![instructions_item()]);
        }

        let query_vector = self
            .provider
            .embed(std::slice::from_ref(&request.input_text))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Other("embedding provider returned no vector".into()))?;

        let per_corpus = try_join_all(eligible.iter().map(|corpus| {
            let vector = query_vector.clone();
            async move {
                let hits = self
                    .store
                    .query(&corpus.id, vector, request.n_retrieve)
                    .await?;
                Ok::<_, IndexError>(
                    hits.into_iter()
                        .map(|chunk| Candidate {
                            chunk,
                            root: corpus.tag.directory.clone(),
                        })
                        .collect::<Vec<_>>(),
                )
            }
        }))
        .await?;
        let candidates: Vec<Candidate> = per_corpus.into_iter().flatten().collect();
        let retrieved = candidates.len();

        let selected = match (&self.reranker, request.use_reranker) {
            (Some(reranker), true) => {
                let pipeline = RerankerPipeline::new(reranker.as_ref());
                run(&pipeline, &request.input_text, candidates, n_final).await?
            }
            (None, true) => {
                tracing::warn!("reranking requested but no reranker configured, using similarity order");
                run(&NoRerankerPipeline, &request.input_text, candidates, n_final).await?
            }
            (_, false) => run(&NoRerankerPipeline, &request.input_text, candidates, n_final).await?,
        };

        if selected.is_empty() {
            tracing::warn!(corpora = eligible.len(), "no results found for query");
        }
        tracing::debug!(
            corpora = eligible.len(),
            retrieved,
            selected = selected.len(),
            "retrieval finished"
        );
        Ok(format_results(selected))
    }
}

async fn run<T: RetrievalPipeline>(
    pipeline: &T,
    query: &str,
    candidates: Vec<Candidate>,
    n_final: usize,
) -> Result<Vec<Candidate>> {
    tracing::debug!(pipeline = pipeline.name(), "selecting candidates");
    pipeline.select(query, candidates, n_final).await
}
