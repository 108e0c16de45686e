use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{
    BoxFuture, ChunkStore, CorpusInfo, ManifestEntry, ScoredChunk, StoredChunk,
    cosine_similarity, top_k,
};
use crate::error::{IndexError, Result};
use crate::tag::Tag;

struct MemoryCorpus {
    tag: Tag,
    dimensions: usize,
    chunks: BTreeMap<String, StoredChunk>,
}

/// Process-local store for tests and ephemeral sessions.
pub struct InMemoryChunkStore {
    corpora: RwLock<HashMap<String, MemoryCorpus>>,
}

impl InMemoryChunkStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            corpora: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryChunkStore").finish_non_exhaustive()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> IndexError {
    IndexError::StorageUnavailable(format!("in-memory store lock poisoned: {e}"))
}

fn check_dims(corpus: &MemoryCorpus, chunks: &[StoredChunk]) -> Result<()> {
    if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != corpus.dimensions) {
        return Err(IndexError::DimensionMismatch {
            expected: corpus.dimensions,
            actual: bad.embedding.len(),
        });
    }
    Ok(())
}

fn missing(corpus_id: &str) -> IndexError {
    IndexError::Other(format!("corpus {corpus_id} does not exist"))
}

impl ChunkStore for InMemoryChunkStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn ensure_corpus<'a>(
        &'a self,
        corpus_id: &'a str,
        tag: &'a Tag,
        dimensions: usize,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut corpora = self.corpora.write().map_err(poisoned)?;
            corpora
                .entry(corpus_id.to_owned())
                .or_insert_with(|| MemoryCorpus {
                    tag: tag.clone(),
                    dimensions,
                    chunks: BTreeMap::new(),
                });
            Ok(())
        })
    }

    fn upsert<'a>(
        &'a self,
        corpus_id: &'a str,
        chunks: Vec<StoredChunk>,
    ) -> BoxFuture<'a, Result<()>> {
        self.apply(corpus_id, chunks, Vec::new())
    }

    fn delete<'a>(&'a self, corpus_id: &'a str, ids: Vec<String>) -> BoxFuture<'a, Result<()>> {
        self.apply(corpus_id, Vec::new(), ids)
    }

    fn apply<'a>(
        &'a self,
        corpus_id: &'a str,
        upserts: Vec<StoredChunk>,
        deletes: Vec<String>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut corpora = self.corpora.write().map_err(poisoned)?;
            let corpus = corpora.get_mut(corpus_id).ok_or_else(|| missing(corpus_id))?;
            check_dims(corpus, &upserts)?;
            for id in &deletes {
                corpus.chunks.remove(id);
            }
            for chunk in upserts {
                corpus.chunks.insert(chunk.id.clone(), chunk);
            }
            Ok(())
        })
    }

    fn query<'a>(
        &'a self,
        corpus_id: &'a str,
        vector: Vec<f32>,
        k: usize,
    ) -> BoxFuture<'a, Result<Vec<ScoredChunk>>> {
        Box::pin(async move {
            let corpora = self.corpora.read().map_err(poisoned)?;
            let Some(corpus) = corpora.get(corpus_id) else {
                return Ok(Vec::new());
            };
            if vector.len() != corpus.dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: corpus.dimensions,
                    actual: vector.len(),
                });
            }
            let hits = corpus
                .chunks
                .values()
                .map(|c| ScoredChunk {
                    id: c.id.clone(),
                    filepath: c.filepath.clone(),
                    start_line: c.start_line,
                    end_line: c.end_line,
                    content: c.content.clone(),
                    score: cosine_similarity(&vector, &c.embedding),
                })
                .collect();
            Ok(top_k(hits, k))
        })
    }

    fn chunk_manifest<'a>(
        &'a self,
        corpus_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ManifestEntry>>> {
        Box::pin(async move {
            let corpora = self.corpora.read().map_err(poisoned)?;
            Ok(corpora
                .get(corpus_id)
                .map(|c| c.chunks.values().map(ManifestEntry::from).collect())
                .unwrap_or_default())
        })
    }

    fn list_corpora(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let corpora = self.corpora.read().map_err(poisoned)?;
            let mut ids: Vec<String> = corpora.keys().cloned().collect();
            ids.sort();
            Ok(ids)
        })
    }

    fn list_corpus_tags(&self) -> BoxFuture<'_, Result<Vec<CorpusInfo>>> {
        Box::pin(async move {
            let corpora = self.corpora.read().map_err(poisoned)?;
            let mut infos: Vec<CorpusInfo> = corpora
                .iter()
                .map(|(id, c)| CorpusInfo {
                    id: id.clone(),
                    tag: c.tag.clone(),
                })
                .collect();
            infos.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(infos)
        })
    }

    fn drop_corpus<'a>(&'a self, corpus_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.corpora.write().map_err(poisoned)?.remove(corpus_id);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, embedding: Vec<f32>) -> StoredChunk {
        StoredChunk {
            id: id.into(),
            filepath: format!("/repo/{id}.rs"),
            start_line: 1,
            end_line: 10,
            content: format!("content {id}"),
            content_hash: format!("hash-{id}"),
            embedding,
        }
    }

    async fn store_with_corpus() -> InMemoryChunkStore {
        let store = InMemoryChunkStore::new();
        store
            .ensure_corpus("c", &Tag::unbranched("/repo"), 3)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn query_missing_corpus_is_empty() {
        let store = InMemoryChunkStore::new();
        assert!(store.query("nope", vec![1.0], 5).await.unwrap().is_empty());
        assert!(store.chunk_manifest("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn own_embedding_is_top_one() {
        let store = store_with_corpus().await;
        store
            .upsert(
                "c",
                vec![
                    chunk("a", vec![1.0, 0.0, 0.0]),
                    chunk("b", vec![0.0, 1.0, 0.0]),
                    chunk("c", vec![0.6, 0.6, 0.1]),
                ],
            )
            .await
            .unwrap();
        let hits = store.query("c", vec![0.0, 1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "b");
    }

    #[tokio::test]
    async fn apply_deletes_then_upserts() {
        let store = store_with_corpus().await;
        store
            .upsert("c", vec![chunk("a", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
        store
            .apply("c", vec![chunk("b", vec![0.0, 1.0, 0.0])], vec!["a".into()])
            .await
            .unwrap();
        let manifest = store.chunk_manifest("c").await.unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].id, "b");
    }

    #[tokio::test]
    async fn dimension_mismatch_rejected() {
        let store = store_with_corpus().await;
        let err = store
            .upsert("c", vec![chunk("a", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 1
            }
        ));
    }

    #[tokio::test]
    async fn list_and_drop() {
        let store = store_with_corpus().await;
        store
            .ensure_corpus("a", &Tag::unbranched("/a"), 3)
            .await
            .unwrap();
        assert_eq!(store.list_corpora().await.unwrap(), ["a", "c"]);
        store.drop_corpus("c").await.unwrap();
        assert_eq!(store.list_corpora().await.unwrap(), ["a"]);
    }

    #[tokio::test]
    async fn corpus_tags_are_kept() {
        let store = store_with_corpus().await;
        store
            .ensure_corpus("b", &Tag::new("/repo", "main"), 3)
            .await
            .unwrap();
        let infos = store.list_corpus_tags().await.unwrap();
        assert_eq!(
            infos,
            vec![
                CorpusInfo {
                    id: "b".into(),
                    tag: Tag::new("/repo", "main"),
                },
                CorpusInfo {
                    id: "c".into(),
                    tag: Tag::unbranched("/repo"),
                },
            ]
        );
    }

    #[tokio::test]
    async fn upsert_into_unknown_corpus_fails() {
        let store = InMemoryChunkStore::new();
        assert!(store.upsert("x", vec![]).await.is_err());
    }
}
