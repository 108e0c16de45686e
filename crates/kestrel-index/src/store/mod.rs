//! Tag-scoped chunk storage.
//!
//! A corpus holds the chunks of exactly one [`Tag`]. Backends differ in where
//! vectors live; ranking is always cosine similarity.

mod memory;
mod qdrant;
mod sqlite;

use std::future::Future;
use std::pin::Pin;

pub use memory::InMemoryChunkStore;
pub use qdrant::{QdrantChunkStore, RemoteCredentials};
pub use sqlite::SqliteChunkStore;

use serde::Serialize;

use crate::error::Result;
use crate::tag::Tag;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A chunk with its embedding, as written by the indexer.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: String,
    pub filepath: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub content_hash: String,
    pub embedding: Vec<f32>,
}

/// A query hit. Vectors are not returned.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub id: String,
    pub filepath: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub score: f32,
}

/// Identity of a stored chunk, without content or vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub id: String,
    pub filepath: String,
    pub content_hash: String,
    pub start_line: usize,
    pub end_line: usize,
}

impl From<&StoredChunk> for ManifestEntry {
    fn from(c: &StoredChunk) -> Self {
        Self {
            id: c.id.clone(),
            filepath: c.filepath.clone(),
            content_hash: c.content_hash.clone(),
            start_line: c.start_line,
            end_line: c.end_line,
        }
    }
}

/// A committed corpus and the tag it was created for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorpusInfo {
    pub id: String,
    pub tag: Tag,
}

pub trait ChunkStore: Send + Sync {
    /// Short backend label for logs.
    fn backend(&self) -> &'static str;

    /// Create the corpus for `tag` if it does not exist yet.
    fn ensure_corpus<'a>(
        &'a self,
        corpus_id: &'a str,
        tag: &'a Tag,
        dimensions: usize,
    ) -> BoxFuture<'a, Result<()>>;

    /// Insert or replace chunks. Durable before the future resolves.
    fn upsert<'a>(&'a self, corpus_id: &'a str, chunks: Vec<StoredChunk>)
    -> BoxFuture<'a, Result<()>>;

    /// Remove chunks by id. Unknown ids are ignored.
    fn delete<'a>(&'a self, corpus_id: &'a str, ids: Vec<String>) -> BoxFuture<'a, Result<()>>;

    /// Commit one reindex delta: deletes first, then upserts.
    fn apply<'a>(
        &'a self,
        corpus_id: &'a str,
        upserts: Vec<StoredChunk>,
        deletes: Vec<String>,
    ) -> BoxFuture<'a, Result<()>>;

    /// Top `k` chunks by cosine similarity. A missing corpus yields an empty list.
    fn query<'a>(
        &'a self,
        corpus_id: &'a str,
        vector: Vec<f32>,
        k: usize,
    ) -> BoxFuture<'a, Result<Vec<ScoredChunk>>>;

    /// Stored chunk identities for diffing. A missing corpus yields an empty list.
    fn chunk_manifest<'a>(&'a self, corpus_id: &'a str) -> BoxFuture<'a, Result<Vec<ManifestEntry>>>;

    fn list_corpora(&self) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Every corpus with its `(directory, branch)`, ordered by id.
    fn list_corpus_tags(&self) -> BoxFuture<'_, Result<Vec<CorpusInfo>>>;

    /// Administrative removal of a corpus and all its chunks.
    fn drop_corpus<'a>(&'a self, corpus_id: &'a str) -> BoxFuture<'a, Result<()>>;
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Stable descending sort by score, truncated to `k`.
pub(crate) fn top_k(mut hits: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(k);
    hits
}
