use serde::{Deserialize, Serialize};

use kestrel_index::chunker::ChunkerConfig;
use kestrel_index::provider::ProviderDefaults;
use kestrel_index::selector::BackendMode;
use kestrel_llm::HostKind;

use crate::vault::Secret;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub host: HostKind,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub remote: RemoteSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank: Option<RerankConfig>,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

fn default_sqlite_path() -> String {
    dirs::data_dir().map_or_else(
        || "kestrel/index.db".into(),
        |d| d.join("kestrel").join("index.db").to_string_lossy().into_owned(),
    )
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    /// Backend used by `query` and `corpora` unless overridden per command.
    #[serde(default)]
    pub mode: BackendMode,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            mode: BackendMode::default(),
        }
    }
}

/// Embedding backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Ollama,
    OpenAi,
    /// Deterministic offline vectors. Only available in builds with the
    /// `mock` feature.
    Mock,
}

impl EmbeddingProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Mock => "mock",
        }
    }
}

impl std::fmt::Display for EmbeddingProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_embedding_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Measured from a sample embedding when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            dimensions: None,
        }
    }
}

/// Remote mirror parameters. The secret key is only read from the
/// environment (`AWS_SECRET_KEY`).
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct RemoteSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankerKind {
    #[default]
    Http,
    Lexical,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerankConfig {
    #[serde(default)]
    pub kind: RerankerKind,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub model: String,
}

fn default_lines_per_chunk() -> usize {
    50
}

fn default_max_line_chars() -> usize {
    1000
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

fn default_index_batch_size() -> usize {
    32
}

fn default_watch_debounce_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default = "default_lines_per_chunk")]
    pub lines_per_chunk: usize,
    #[serde(default = "default_max_line_chars")]
    pub max_line_chars: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_index_batch_size")]
    pub batch_size: usize,
    /// Directory names skipped in addition to `node_modules`.
    #[serde(default)]
    pub excluded_dirs: Vec<String>,
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
    /// Fold path case in corpus ids. Defaults to the platform convention.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_fold: Option<bool>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            lines_per_chunk: default_lines_per_chunk(),
            max_line_chars: default_max_line_chars(),
            max_file_bytes: default_max_file_bytes(),
            batch_size: default_index_batch_size(),
            excluded_dirs: Vec::new(),
            watch_debounce_ms: default_watch_debounce_ms(),
            case_fold: None,
        }
    }
}

impl IndexConfig {
    #[must_use]
    pub fn chunker(&self) -> ChunkerConfig {
        ChunkerConfig {
            lines_per_chunk: self.lines_per_chunk,
            max_line_chars: self.max_line_chars,
            max_file_bytes: self.max_file_bytes,
        }
    }

    #[must_use]
    pub fn case_fold(&self) -> bool {
        self.case_fold
            .unwrap_or_else(kestrel_index::tag::default_case_fold)
    }
}

fn default_n_retrieve() -> usize {
    50
}

fn default_n_final() -> usize {
    10
}

fn default_context_length() -> usize {
    8192
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_n_retrieve")]
    pub n_retrieve: usize,
    #[serde(default = "default_n_final")]
    pub n_final: usize,
    #[serde(default)]
    pub use_reranker: bool,
    /// Model context window used to size codebase results.
    #[serde(default = "default_context_length")]
    pub context_length: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            n_retrieve: default_n_retrieve(),
            n_final: default_n_final(),
            use_reranker: false,
            context_length: default_context_length(),
        }
    }
}

impl RetrievalConfig {
    #[must_use]
    pub fn provider_defaults(&self) -> ProviderDefaults {
        ProviderDefaults {
            n_retrieve: self.n_retrieve,
            n_final: self.n_final,
            use_reranker: self.use_reranker,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Credentials resolved from the environment after loading.
#[derive(Debug, Default)]
pub struct ResolvedSecrets {
    pub openai_api_key: Option<Secret>,
    pub rerank_api_key: Option<Secret>,
    pub remote_secret: Option<Secret>,
}
