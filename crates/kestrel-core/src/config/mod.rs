mod env;
mod types;


pub use types::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use kestrel_index::indexer::IndexerConfig;
use kestrel_index::selector::RemoteConfig;

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.index.lines_per_chunk == 0 {
            bail!("index.lines_per_chunk must be greater than zero");
        }
        if self.index.max_line_chars == 0 {
            bail!("index.max_line_chars must be greater than zero");
        }
        if self.index.batch_size == 0 {
            bail!("index.batch_size must be greater than zero");
        }
        if self.retrieval.n_final > self.retrieval.n_retrieve {
            bail!(
                "retrieval.n_final ({}) must not exceed retrieval.n_retrieve ({})",
                self.retrieval.n_final,
                self.retrieval.n_retrieve
            );
        }
        if self.embedding.dimensions == Some(0) {
            bail!("embedding.dimensions must be greater than zero when set");
        }
        if let Some(rerank) = &self.rerank
            && rerank.kind == RerankerKind::Http
            && rerank.base_url.trim().is_empty()
        {
            bail!("rerank.base_url is required for the http reranker");
        }
        Ok(())
    }

    /// Remote connection parameters, with the secret taken from the
    /// resolved environment.
    #[must_use]
    pub fn remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            endpoint: self.remote.url.clone(),
            region: self.remote.region.clone(),
            access_key_id: self.remote.access_key_id.clone(),
            secret: self
                .secrets
                .remote_secret
                .as_ref()
                .map(|s| s.expose().to_owned()),
        }
    }

    #[must_use]
    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            chunker: self.index.chunker(),
            batch_size: self.index.batch_size,
            case_fold: self.index.case_fold(),
        }
    }
}

/// `--config` wins, then `KESTREL_CONFIG`, then `<config dir>/kestrel/config.toml`.
#[must_use]
pub fn resolve_config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("KESTREL_CONFIG") {
        return PathBuf::from(path);
    }
    dirs::config_dir().map_or_else(
        || PathBuf::from("config/default.toml"),
        |d| d.join("kestrel").join("config.toml"),
    )
}
