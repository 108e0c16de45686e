//! Application bootstrap: config resolution and component construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use kestrel_index::registry::TagRegistry;
use kestrel_index::selector::StoreHandle;
use kestrel_index::store::SqliteChunkStore;
use kestrel_index::walker::{FileWalker, IgnoreWalker};
use kestrel_index::{BackendMode, BackendSelector, ChunkStore, ContextService, Indexer, Session};
use kestrel_llm::CapabilityTable;
use kestrel_llm::any::AnyEmbedder;
use kestrel_llm::ollama::OllamaEmbedder;
use kestrel_llm::openai::OpenAiEmbedder;
use kestrel_llm::rerank::{AnyReranker, HttpReranker, LexicalReranker};

use crate::config::{
    Config, EmbeddingConfig, EmbeddingProviderKind, RerankerKind, resolve_config_path,
};

/// Build the embedding provider named by `config.embedding`.
///
/// # Errors
///
/// Returns an error if the base URL or HTTP client is invalid, or if the
/// mock provider is requested in a build without the `mock` feature.
pub fn create_embedder(config: &Config) -> anyhow::Result<AnyEmbedder> {
    let EmbeddingConfig {
        provider,
        base_url,
        model,
        dimensions,
    } = &config.embedding;
    let batch_size = config.index.batch_size;

    let embedder = match provider {
        EmbeddingProviderKind::Ollama => {
            let mut e = OllamaEmbedder::new(base_url, model.clone())
                .context("failed to create Ollama embedder")?
                .with_batch_size(batch_size);
            if let Some(d) = dimensions {
                e = e.with_dimensions(*d);
            }
            AnyEmbedder::Ollama(e)
        }
        EmbeddingProviderKind::OpenAi => {
            let key = config
                .secrets
                .openai_api_key
                .as_ref()
                .map(|s| s.expose().to_owned());
            let mut e = OpenAiEmbedder::new(base_url.clone(), model.clone(), key)
                .context("failed to create OpenAI embedder")?
                .with_batch_size(batch_size);
            if let Some(d) = dimensions {
                e = e.with_dimensions(*d);
            }
            AnyEmbedder::OpenAi(e)
        }
        #[cfg(feature = "mock")]
        EmbeddingProviderKind::Mock => {
            AnyEmbedder::Mock(kestrel_llm::mock::MockEmbedder::with_dims(dimensions.unwrap_or(64)))
        }
        #[cfg(not(feature = "mock"))]
        EmbeddingProviderKind::Mock => {
            bail!("the mock embedding provider requires a build with the `mock` feature")
        }
    };
    tracing::debug!(provider = %provider, model = %model, "embedding provider created");
    Ok(embedder)
}

/// Build the optional reranker from `config.rerank`.
///
/// # Errors
///
/// Returns an error if the HTTP reranker client cannot be built.
pub fn create_reranker(config: &Config) -> anyhow::Result<Option<AnyReranker>> {
    let Some(rerank) = &config.rerank else {
        return Ok(None);
    };
    let reranker = match rerank.kind {
        RerankerKind::Http => {
            let key = config
                .secrets
                .rerank_api_key
                .as_ref()
                .map(|s| s.expose().to_owned());
            AnyReranker::Http(
                HttpReranker::new(rerank.base_url.clone(), rerank.model.clone(), key)
                    .context("failed to create reranker")?,
            )
        }
        RerankerKind::Lexical => AnyReranker::Lexical(LexicalReranker),
    };
    Ok(Some(reranker))
}

/// Open the local `SQLite` store, creating its parent directory.
///
/// # Errors
///
/// Returns an error if the directory or database cannot be created.
pub async fn open_local_store(sqlite_path: &str) -> anyhow::Result<SqliteChunkStore> {
    if sqlite_path != ":memory:"
        && let Some(parent) = Path::new(sqlite_path).parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    SqliteChunkStore::open(sqlite_path)
        .await
        .with_context(|| format!("failed to open index database {sqlite_path}"))
}

/// Every long-lived component, wired from one [`Config`].
pub struct App {
    pub config: Config,
    pub config_path: PathBuf,
    pub session: Arc<Session>,
    pub selector: Arc<BackendSelector>,
    pub indexer: Arc<Indexer<AnyEmbedder>>,
    pub service: ContextService<AnyEmbedder>,
}

impl App {
    /// Load the config (file + env), validate it and build the components.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or a component cannot be
    /// constructed.
    pub async fn from_env(cli_config: Option<&Path>) -> anyhow::Result<Self> {
        let config_path = resolve_config_path(cli_config);
        let config = Config::load(&config_path)?;
        Self::build(config, config_path).await
    }

    /// # Errors
    ///
    /// Returns an error if the config is invalid or a component cannot be
    /// constructed.
    pub async fn build(config: Config, config_path: PathBuf) -> anyhow::Result<Self> {
        config.validate()?;

        let session = Session::new();
        let provider = Arc::new(create_embedder(&config)?);
        let reranker = create_reranker(&config)?.map(Arc::new);
        let local: Arc<dyn ChunkStore> =
            Arc::new(open_local_store(&config.storage.sqlite_path).await?);

        let walker: Arc<dyn FileWalker> = Arc::new(
            IgnoreWalker::default().with_excluded(config.index.excluded_dirs.iter().cloned()),
        );
        let registry = Arc::new(TagRegistry::new(
            Arc::clone(&walker),
            config.index.case_fold(),
        ));
        let selector = Arc::new(BackendSelector::new(
            Arc::clone(&local),
            config.remote_config(),
            registry,
        ));

        let indexer = Arc::new(
            Indexer::new(
                local,
                Arc::clone(&provider),
                walker,
                Arc::clone(&session),
                config.indexer_config(),
            )
            .with_host(config.host, CapabilityTable::with_defaults()),
        );
        let service = ContextService::new(
            Arc::clone(&selector),
            provider,
            reranker,
            Arc::clone(&session),
            config.retrieval.provider_defaults(),
        );

        tracing::info!(
            host = %config.host,
            provider = %config.embedding.provider,
            sqlite = %config.storage.sqlite_path,
            remote = config.remote_config().missing().is_empty(),
            "kestrel initialized"
        );
        Ok(Self {
            config,
            config_path,
            session,
            selector,
            indexer,
            service,
        })
    }

    /// Store for `mode`, failing when remote mode is not configured.
    ///
    /// # Errors
    ///
    /// Returns an error naming the missing remote parameters.
    pub fn store(&self, mode: BackendMode) -> anyhow::Result<Arc<dyn ChunkStore>> {
        match self.selector.resolve(mode)? {
            StoreHandle::Available(store) => Ok(store),
            StoreHandle::Unavailable { missing } => {
                bail!("remote backend is not configured (missing: {})", missing.join(", "))
            }
        }
    }
}
