//! Incremental indexing: walk → chunk → diff against the manifest → embed → commit.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use kestrel_llm::{CapabilityTable, EmbeddingProvider, HostKind};

use crate::chunker::{
    ChunkSpan, ChunkerConfig, chunk_id, chunk_source, contextualize_for_embedding, looks_binary,
};
use crate::error::{IndexError, Result};
use crate::session::Session;
use crate::store::{ChunkStore, StoredChunk};
use crate::tag::Tag;
use crate::walker::FileWalker;

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub chunker: ChunkerConfig,
    /// Texts per embedding call; capped by the provider's own limit.
    pub batch_size: usize,
    /// Fold path case when deriving corpus ids.
    pub case_fold: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            batch_size: 32,
            case_fold: crate::tag::default_case_fold(),
        }
    }
}

/// Outcome of one reindex.
#[derive(Debug, Default, Clone)]
pub struct IndexDelta {
    pub corpus_id: String,
    pub files_scanned: usize,
    pub upserted: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed_batches: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl IndexDelta {
    /// True when the store was not modified.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.upserted == 0 && self.deleted == 0
    }
}

struct PendingChunk {
    id: String,
    span: ChunkSpan,
    embed_text: String,
}

pub struct Indexer<P: EmbeddingProvider> {
    store: Arc<dyn ChunkStore>,
    provider: Arc<P>,
    walker: Arc<dyn FileWalker>,
    session: Arc<Session>,
    capabilities: CapabilityTable,
    host: HostKind,
    config: IndexerConfig,
}

impl<P: EmbeddingProvider> Indexer<P> {
    #[must_use]
    pub fn new(
        store: Arc<dyn ChunkStore>,
        provider: Arc<P>,
        walker: Arc<dyn FileWalker>,
        session: Arc<Session>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            store,
            provider,
            walker,
            session,
            capabilities: CapabilityTable::with_defaults(),
            host: HostKind::default(),
            config,
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: HostKind, capabilities: CapabilityTable) -> Self {
        self.host = host;
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    #[must_use]
    pub fn corpus_id(&self, tag: &Tag) -> String {
        tag.corpus_id_with(self.config.case_fold)
    }

    fn check_capability(&self) -> Result<()> {
        let provider = self.provider.id();
        if let Some(reason) = self.capabilities.unsupported_reason(provider, self.host) {
            return Err(IndexError::UnsupportedProviderOnHost {
                provider: provider.to_owned(),
                host: self.host,
                reason: reason.to_owned(),
            });
        }
        Ok(())
    }

    async fn embedding_dimensions(&self) -> Result<usize> {
        if let Some(d) = self.provider.dimensions() {
            return Ok(d);
        }
        let sample = self.provider.embed(&["dimensions".to_owned()]).await?;
        sample
            .first()
            .map(Vec::len)
            .filter(|d| *d > 0)
            .ok_or_else(|| IndexError::Other("sample embedding returned no vector".into()))
    }

    /// Bring the corpus for `tag` in line with the files on disk.
    ///
    /// Only new or changed chunks are embedded. Everything is committed in
    /// one [`ChunkStore::apply`] call at the end, so a cancelled run leaves the
    /// corpus untouched.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedProviderOnHost` before doing any work when the
    /// provider cannot run on this host, `Cancelled` on session shutdown, and
    /// storage errors from the chunk store. Per-file and per-batch failures
    /// are reported in the returned delta instead.
    pub async fn reindex(&self, tag: &Tag) -> Result<IndexDelta> {
        self.check_capability()?;
        self.session.check_cancelled()?;

        let corpus_id = self.corpus_id(tag);
        let _guard = self.session.lock_corpus(&corpus_id).await?;
        let start = Instant::now();
        let mut delta = IndexDelta {
            corpus_id: corpus_id.clone(),
            ..IndexDelta::default()
        };

        let dimensions = self.embedding_dimensions().await?;
        self.store
            .ensure_corpus(&corpus_id, tag, dimensions)
            .await?;

        let (desired, preserved_files) = self.scan(tag, &corpus_id, &mut delta).await;

        let manifest = self.store.chunk_manifest(&corpus_id).await?;
        let stored_ids: HashSet<&str> = manifest.iter().map(|e| e.id.as_str()).collect();
        let deletes: Vec<String> = manifest
            .iter()
            .filter(|e| !desired.contains_key(&e.id) && !preserved_files.contains(&e.filepath))
            .map(|e| e.id.clone())
            .collect();

        let mut pending: Vec<PendingChunk> = Vec::new();
        for (id, pending_chunk) in desired {
            if stored_ids.contains(id.as_str()) {
                delta.unchanged += 1;
            } else {
                pending.push(pending_chunk);
            }
        }
        pending.sort_by(|a, b| {
            (&a.span.filepath, a.span.start_line).cmp(&(&b.span.filepath, b.span.start_line))
        });

        let upserts = self.embed_pending(pending, dimensions, &mut delta).await?;

        self.session.check_cancelled()?;
        delta.upserted = upserts.len();
        delta.deleted = deletes.len();
        if !delta.is_noop() {
            self.store.apply(&corpus_id, upserts, deletes).await?;
        }

        delta.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        self.session.record_reindex(delta.failed_batches);
        tracing::info!(
            corpus = %corpus_id,
            backend = self.store.backend(),
            files = delta.files_scanned,
            upserted = delta.upserted,
            deleted = delta.deleted,
            unchanged = delta.unchanged,
            failed_batches = delta.failed_batches,
            duration_ms = delta.duration_ms,
            "reindex finished"
        );
        Ok(delta)
    }

    /// Chunk every file under the tag. Returns the desired chunk set and the
    /// files whose stored chunks must be kept because they could not be read.
    async fn scan(
        &self,
        tag: &Tag,
        corpus_id: &str,
        delta: &mut IndexDelta,
    ) -> (HashMap<String, PendingChunk>, HashSet<String>) {
        let mut desired = HashMap::new();
        let mut preserved = HashSet::new();

        for path in self.walker.files(&tag.directory) {
            delta.files_scanned += 1;
            let filepath = path.to_string_lossy().into_owned();

            let source = match self.read_source(&path).await {
                Ok(Some(source)) => source,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(file = %filepath, "skipping unreadable file: {e}");
                    delta.errors.push(format!("{filepath}: {e}"));
                    preserved.insert(filepath);
                    continue;
                }
            };

            let relative = path
                .strip_prefix(&tag.directory)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            for span in chunk_source(&source, &filepath, &self.config.chunker) {
                let id = chunk_id(corpus_id, &span);
                let embed_text = contextualize_for_embedding(&relative, &span.content);
                desired.insert(
                    id.clone(),
                    PendingChunk {
                        id,
                        span,
                        embed_text,
                    },
                );
            }
        }
        (desired, preserved)
    }

    /// `Ok(None)` for files that are skipped by policy (too large, binary).
    async fn read_source(&self, path: &Path) -> std::io::Result<Option<String>> {
        let meta = tokio::fs::metadata(path).await?;
        if meta.len() > self.config.chunker.max_file_bytes {
            tracing::debug!(file = %path.display(), size = meta.len(), "skipping large file");
            return Ok(None);
        }
        let bytes = tokio::fs::read(path).await?;
        if looks_binary(&bytes) {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn embed_pending(
        &self,
        pending: Vec<PendingChunk>,
        dimensions: usize,
        delta: &mut IndexDelta,
    ) -> Result<Vec<StoredChunk>> {
        let batch_size = self
            .config
            .batch_size
            .min(self.provider.max_batch_size())
            .max(1);
        let cancel = self.session.cancellation();
        let mut upserts = Vec::with_capacity(pending.len());

        for (batch_no, batch) in pending.chunks(batch_size).enumerate() {
            self.session.check_cancelled()?;
            let texts: Vec<String> = batch.iter().map(|p| p.embed_text.clone()).collect();

            let result = tokio::select! {
                r = self.provider.embed(&texts) => r,
                () = cancel.cancelled() => return Err(IndexError::Cancelled),
            };

            let vectors = match result {
                Ok(v) if v.len() == batch.len() && v.iter().all(|e| e.len() == dimensions) => v,
                Ok(v) => {
                    let err = IndexError::EmbeddingBatchFailed {
                        batch: batch_no,
                        source: kestrel_llm::LlmError::EmbeddingCount {
                            provider: self.provider.id().to_owned(),
                            expected: batch.len(),
                            actual: v.len(),
                        },
                    };
                    record_batch_failure(delta, &err);
                    continue;
                }
                Err(source) => {
                    let err = IndexError::EmbeddingBatchFailed {
                        batch: batch_no,
                        source,
                    };
                    record_batch_failure(delta, &err);
                    continue;
                }
            };

            for (p, embedding) in batch.iter().zip(vectors) {
                upserts.push(StoredChunk {
                    id: p.id.clone(),
                    filepath: p.span.filepath.clone(),
                    start_line: p.span.start_line,
                    end_line: p.span.end_line,
                    content: p.span.content.clone(),
                    content_hash: p.span.content_hash.clone(),
                    embedding,
                });
            }
        }
        Ok(upserts)
    }
}

fn record_batch_failure(delta: &mut IndexDelta, err: &IndexError) {
    tracing::warn!("{err}");
    delta.failed_batches += 1;
    delta.errors.push(err.to_string());
}
