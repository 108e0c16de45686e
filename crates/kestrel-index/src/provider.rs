//! Context providers: the request shapes a host asks for, mapped onto
//! [`RetrievalRequest`]s against the right backend.

use std::path::PathBuf;
use std::sync::Arc;

use kestrel_llm::rerank::AnyReranker;
use kestrel_llm::{EmbeddingProvider, Reranker};

use crate::context::{ContextItem, instructions_item};
use crate::error::{IndexError, Result};
use crate::retriever::{RetrievalRequest, Retriever};
use crate::selector::{ALL_REMOTE_ID, BackendMode, BackendSelector, StoreHandle};
use crate::session::Session;
use crate::store::ChunkStore;
use crate::tag::Tag;

/// Token budget assumed per snippet when sizing codebase results.
pub const TOKENS_PER_SNIPPET: usize = 512;
pub const MAX_CODEBASE_RESULTS: usize = 50;
pub const REMOTE_RESULTS: usize = 512;
pub const DIRECTORY_RESULTS: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextProviderKind {
    /// Every open workspace directory.
    Codebase {
        workspace_dirs: Vec<PathBuf>,
        context_length: usize,
    },
    /// A folder picked from the local submenu.
    Folder { folder: PathBuf },
    /// A project on the remote mirror, picked by submenu id ([`ALL_REMOTE_ID`]
    /// or a corpus id) or by directory. Without a filter nothing is returned.
    Remote { filter_directory: Option<PathBuf> },
    /// An arbitrary directory typed in by the user, searched locally.
    Directory { directory: PathBuf },
}

impl ContextProviderKind {
    #[must_use]
    pub fn title(&self) -> &'static str {
        match self {
            Self::Codebase { .. } => "codebase",
            Self::Folder { .. } => "folder",
            Self::Remote { .. } => "remote-codebase",
            Self::Directory { .. } => "directory",
        }
    }
}

/// Retrieval defaults shared by every provider kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderDefaults {
    pub n_retrieve: usize,
    pub n_final: usize,
    pub use_reranker: bool,
}

impl Default for ProviderDefaults {
    fn default() -> Self {
        Self {
            n_retrieve: 50,
            n_final: 10,
            use_reranker: false,
        }
    }
}

/// Codebase result budget: half the context window at
/// [`TOKENS_PER_SNIPPET`] tokens each, at most [`MAX_CODEBASE_RESULTS`].
#[must_use]
pub fn codebase_n_final(context_length: usize) -> usize {
    (context_length / TOKENS_PER_SNIPPET / 2).min(MAX_CODEBASE_RESULTS)
}

pub struct ContextService<P: EmbeddingProvider, R: Reranker = AnyReranker> {
    selector: Arc<BackendSelector>,
    provider: Arc<P>,
    reranker: Option<Arc<R>>,
    session: Arc<Session>,
    defaults: ProviderDefaults,
}

impl<P: EmbeddingProvider, R: Reranker> ContextService<P, R> {
    #[must_use]
    pub fn new(
        selector: Arc<BackendSelector>,
        provider: Arc<P>,
        reranker: Option<Arc<R>>,
        session: Arc<Session>,
        defaults: ProviderDefaults,
    ) -> Self {
        Self {
            selector,
            provider,
            reranker,
            session,
            defaults,
        }
    }

    #[must_use]
    pub fn selector(&self) -> &Arc<BackendSelector> {
        &self.selector
    }

    fn retriever(&self, store: Arc<dyn ChunkStore>) -> Retriever<P, R> {
        Retriever::new(
            store,
            Arc::clone(&self.provider),
            self.reranker.clone(),
            Arc::clone(&self.session),
            self.selector.registry().case_fold(),
        )
    }

    fn request_for(
        &self,
        query: &str,
        kind: &ContextProviderKind,
    ) -> Result<Option<(BackendMode, RetrievalRequest)>> {
        let d = self.defaults;
        let request = match kind {
            ContextProviderKind::Codebase {
                workspace_dirs,
                context_length,
            } => {
                if workspace_dirs.is_empty() {
                    return Err(IndexError::Other("no workspace directories found".into()));
                }
                let n_final = codebase_n_final(*context_length);
                let tags = workspace_dirs.iter().cloned().map(Tag::unbranched).collect();
                (
                    BackendMode::Local,
                    RetrievalRequest::new(query, d.n_retrieve.max(n_final), n_final)
                        .with_tags(tags)
                        .with_reranker(d.use_reranker),
                )
            }
            ContextProviderKind::Folder { folder } => (
                BackendMode::Local,
                RetrievalRequest::new(query, d.n_retrieve, d.n_final)
                    .with_tags(vec![Tag::unbranched(folder.clone())])
                    .with_filter(folder.clone())
                    .with_reranker(d.use_reranker),
            ),
            ContextProviderKind::Remote { filter_directory } => {
                let Some(filter) = filter_directory else {
                    return Ok(None);
                };
                let request = RetrievalRequest::new(query, REMOTE_RESULTS, REMOTE_RESULTS)
                    .with_reranker(true);
                let request = if filter.as_os_str() == ALL_REMOTE_ID {
                    request.with_all_corpora()
                } else {
                    request
                        .with_corpus_ids(vec![filter.to_string_lossy().into_owned()])
                        .with_filter(filter.clone())
                };
                (BackendMode::Remote, request)
            }
            ContextProviderKind::Directory { directory } => (
                BackendMode::Local,
                RetrievalRequest::new(query, DIRECTORY_RESULTS, DIRECTORY_RESULTS)
                    .with_filter(directory.clone())
                    .with_reranker(d.use_reranker),
            ),
        };
        Ok(Some(request))
    }

    /// Context items for `query` from the provider `kind`.
    ///
    /// A request with no indexed corpus yields only the instructions item.
    /// An unconfigured remote backend or a remote request without a filter
    /// yields nothing.
    ///
    /// # Errors
    ///
    /// Returns embedding, reranking or storage errors from retrieval, and
    /// `Other` when a codebase request has no workspace directories.
    pub async fn context_items(
        &self,
        query: &str,
        kind: &ContextProviderKind,
    ) -> Result<Vec<ContextItem>> {
        let Some((mode, request)) = self.request_for(query, kind)? else {
            tracing::debug!(provider = kind.title(), "no filter directory, skipping");
            return Ok(Vec::new());
        };
        let store = match self.selector.resolve(mode)? {
            StoreHandle::Available(store) => store,
            StoreHandle::Unavailable { missing } => {
                tracing::warn!(?missing, provider = kind.title(), "remote backend not configured");
                return Ok(Vec::new());
            }
        };

        match self.retriever(store).retrieve(&request).await {
            Err(IndexError::NoCorpusAvailable) => {
                tracing::warn!(
                    provider = kind.title(),
                    "no indexed corpus for this request, returning instructions only"
                );
                Ok(vec![instructions_item()])
            }
            other => other,
        }
    }
}
