//! Local `SQLite` backend.
//!
//! Embeddings are stored as little-endian `f32` blobs and ranked with a
//! brute-force cosine scan over one corpus.

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

use super::{
    BoxFuture, ChunkStore, CorpusInfo, ManifestEntry, ScoredChunk, StoredChunk,
    cosine_similarity, top_k,
};
use crate::error::{IndexError, Result};
use crate::tag::Tag;

type ChunkRow = (String, String, i64, i64, String, Vec<u8>);
type ManifestRow = (String, String, String, i64, i64);

#[derive(Debug, Clone)]
pub struct SqliteChunkStore {
    pool: SqlitePool,
}

impl SqliteChunkStore {
    /// Open (or create) the database and run migrations.
    ///
    /// `:memory:` opens a single-connection in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the database cannot be opened or
    /// migrations fail.
    pub async fn open(path: &str) -> Result<Self> {
        let in_memory = path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(opts)
            .await?;

        sqlx::migrate!().run(&pool).await?;
        tracing::debug!(path, "sqlite chunk store ready");

        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn corpus_dimensions(&self, corpus_id: &str) -> Result<Option<usize>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT dimensions FROM corpora WHERE id = ?")
            .bind(corpus_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(d,)| from_i64(d)).transpose()
    }

    async fn apply_delta(
        &self,
        corpus_id: &str,
        upserts: Vec<StoredChunk>,
        deletes: Vec<String>,
    ) -> Result<()> {
        let dims = self
            .corpus_dimensions(corpus_id)
            .await?
            .ok_or_else(|| IndexError::Other(format!("corpus {corpus_id} does not exist")))?;
        if let Some(bad) = upserts.iter().find(|c| c.embedding.len() != dims) {
            return Err(IndexError::DimensionMismatch {
                expected: dims,
                actual: bad.embedding.len(),
            });
        }

        let mut tx = self.pool.begin().await?;
        for id in &deletes {
            sqlx::query("DELETE FROM chunks WHERE corpus_id = ? AND id = ?")
                .bind(corpus_id)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        for chunk in &upserts {
            sqlx::query(
                "INSERT INTO chunks (id, corpus_id, filepath, start_line, end_line, content, content_hash, embedding) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(corpus_id, id) DO UPDATE SET \
                 filepath = excluded.filepath, start_line = excluded.start_line, \
                 end_line = excluded.end_line, content = excluded.content, \
                 content_hash = excluded.content_hash, embedding = excluded.embedding",
            )
            .bind(&chunk.id)
            .bind(corpus_id)
            .bind(&chunk.filepath)
            .bind(to_i64(chunk.start_line)?)
            .bind(to_i64(chunk.end_line)?)
            .bind(&chunk.content)
            .bind(&chunk.content_hash)
            .bind(encode_embedding(&chunk.embedding))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!(
            corpus = corpus_id,
            upserted = upserts.len(),
            deleted = deletes.len(),
            "sqlite delta committed"
        );
        Ok(())
    }
}

fn to_i64(v: usize) -> Result<i64> {
    i64::try_from(v).map_err(|e| IndexError::Other(format!("line number out of range: {e}")))
}

fn from_i64(v: i64) -> Result<usize> {
    usize::try_from(v).map_err(|e| IndexError::StorageUnavailable(format!("corrupt row: {e}")))
}

fn encode_embedding(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

impl ChunkStore for SqliteChunkStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn ensure_corpus<'a>(
        &'a self,
        corpus_id: &'a str,
        tag: &'a Tag,
        dimensions: usize,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO corpora (id, directory, branch, dimensions) VALUES (?, ?, ?, ?) \
                 ON CONFLICT(id) DO NOTHING",
            )
            .bind(corpus_id)
            .bind(tag.directory.to_string_lossy().into_owned())
            .bind(&tag.branch)
            .bind(to_i64(dimensions)?)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn upsert<'a>(
        &'a self,
        corpus_id: &'a str,
        chunks: Vec<StoredChunk>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.apply_delta(corpus_id, chunks, Vec::new()))
    }

    fn delete<'a>(&'a self, corpus_id: &'a str, ids: Vec<String>) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.apply_delta(corpus_id, Vec::new(), ids))
    }

    fn apply<'a>(
        &'a self,
        corpus_id: &'a str,
        upserts: Vec<StoredChunk>,
        deletes: Vec<String>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.apply_delta(corpus_id, upserts, deletes))
    }

    fn query<'a>(
        &'a self,
        corpus_id: &'a str,
        vector: Vec<f32>,
        k: usize,
    ) -> BoxFuture<'a, Result<Vec<ScoredChunk>>> {
        Box::pin(async move {
            let Some(dims) = self.corpus_dimensions(corpus_id).await? else {
                return Ok(Vec::new());
            };
            if vector.len() != dims {
                return Err(IndexError::DimensionMismatch {
                    expected: dims,
                    actual: vector.len(),
                });
            }

            let rows: Vec<ChunkRow> = sqlx::query_as(
                "SELECT id, filepath, start_line, end_line, content, embedding \
                 FROM chunks WHERE corpus_id = ? ORDER BY filepath, start_line",
            )
            .bind(corpus_id)
            .fetch_all(&self.pool)
            .await?;

            let mut hits = Vec::with_capacity(rows.len());
            for (id, filepath, start, end, content, blob) in rows {
                let score = cosine_similarity(&vector, &decode_embedding(&blob));
                hits.push(ScoredChunk {
                    id,
                    filepath,
                    start_line: from_i64(start)?,
                    end_line: from_i64(end)?,
                    content,
                    score,
                });
            }
            Ok(top_k(hits, k))
        })
    }

    fn chunk_manifest<'a>(
        &'a self,
        corpus_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ManifestEntry>>> {
        Box::pin(async move {
            let rows: Vec<ManifestRow> = sqlx::query_as(
                "SELECT id, filepath, content_hash, start_line, end_line \
                 FROM chunks WHERE corpus_id = ? ORDER BY filepath, start_line",
            )
            .bind(corpus_id)
            .fetch_all(&self.pool)
            .await?;

            rows.into_iter()
                .map(|(id, filepath, content_hash, start, end)| {
                    Ok(ManifestEntry {
                        id,
                        filepath,
                        content_hash,
                        start_line: from_i64(start)?,
                        end_line: from_i64(end)?,
                    })
                })
                .collect()
        })
    }

    fn list_corpora(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM corpora ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
            Ok(ids)
        })
    }

    fn list_corpus_tags(&self) -> BoxFuture<'_, Result<Vec<CorpusInfo>>> {
        Box::pin(async move {
            let rows: Vec<(String, String, String)> =
                sqlx::query_as("SELECT id, directory, branch FROM corpora ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows
                .into_iter()
                .map(|(id, directory, branch)| CorpusInfo {
                    id,
                    tag: Tag::new(directory, branch),
                })
                .collect())
        })
    }

    fn drop_corpus<'a>(&'a self, corpus_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM chunks WHERE corpus_id = ?")
                .bind(corpus_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM corpora WHERE id = ?")
                .bind(corpus_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!(corpus = corpus_id, "corpus dropped");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, file: &str, embedding: Vec<f32>) -> StoredChunk {
        StoredChunk {
            id: id.into(),
            filepath: file.into(),
            start_line: 1,
            end_line: 50,
            content: format!("body of {id}"),
            content_hash: format!("h{id}"),
            embedding,
        }
    }

    async fn memory_store() -> SqliteChunkStore {
        let store = SqliteChunkStore::open(":memory:").await.unwrap();
        store
            .ensure_corpus("repo-1", &Tag::unbranched("/repo"), 2)
            .await
            .unwrap();
        store
    }

    #[test]
    fn embedding_blob_round_trip() {
        let v = vec![0.25f32, -1.5, 3.0];
        let blob = encode_embedding(&v);
        assert_eq!(blob.len(), 12);
        assert_eq!(decode_embedding(&blob), v);
    }

    #[tokio::test]
    async fn wal_and_full_sync_on_file_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let store = SqliteChunkStore::open(path.to_str().unwrap()).await.unwrap();

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(mode, "wal");
        let sync: i64 = sqlx::query_scalar("PRAGMA synchronous")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(sync, 2);
    }

    #[tokio::test]
    async fn ensure_corpus_is_idempotent() {
        let store = memory_store().await;
        store
            .ensure_corpus("repo-1", &Tag::unbranched("/repo"), 2)
            .await
            .unwrap();
        assert_eq!(store.list_corpora().await.unwrap(), ["repo-1"]);
    }

    #[tokio::test]
    async fn corpus_tags_keep_directory_and_branch() {
        let store = memory_store().await;
        store
            .ensure_corpus("repo-2", &Tag::new("/repo", "main"), 2)
            .await
            .unwrap();
        let infos = store.list_corpus_tags().await.unwrap();
        let tags: Vec<_> = infos.iter().map(|i| (i.id.as_str(), &i.tag)).collect();
        assert_eq!(
            tags,
            [
                ("repo-1", &Tag::unbranched("/repo")),
                ("repo-2", &Tag::new("/repo", "main")),
            ]
        );
    }

    #[tokio::test]
    async fn query_ranks_by_cosine() {
        let store = memory_store().await;
        store
            .upsert(
                "repo-1",
                vec![
                    chunk("a", "/repo/a.rs", vec![1.0, 0.0]),
                    chunk("b", "/repo/b.rs", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        let hits = store.query("repo-1", vec![0.1, 0.9], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
        assert_eq!(hits[0].content, "body of b");
    }

    #[tokio::test]
    async fn query_unknown_corpus_is_empty() {
        let store = memory_store().await;
        assert!(store.query("other", vec![1.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_replaces_same_id() {
        let store = memory_store().await;
        store
            .upsert("repo-1", vec![chunk("a", "/repo/a.rs", vec![1.0, 0.0])])
            .await
            .unwrap();
        let mut updated = chunk("a", "/repo/a.rs", vec![0.0, 1.0]);
        updated.content = "new".into();
        store.upsert("repo-1", vec![updated]).await.unwrap();
        let hits = store.query("repo-1", vec![0.0, 1.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "new");
    }

    #[tokio::test]
    async fn apply_is_atomic_on_dimension_error() {
        let store = memory_store().await;
        store
            .upsert("repo-1", vec![chunk("a", "/repo/a.rs", vec![1.0, 0.0])])
            .await
            .unwrap();
        let err = store
            .apply(
                "repo-1",
                vec![chunk("b", "/repo/b.rs", vec![1.0, 0.0, 0.0])],
                vec!["a".into()],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
        assert_eq!(store.chunk_manifest("repo-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn manifest_and_drop() {
        let store = memory_store().await;
        store
            .upsert(
                "repo-1",
                vec![
                    chunk("a", "/repo/a.rs", vec![1.0, 0.0]),
                    chunk("b", "/repo/b.rs", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        store.delete("repo-1", vec!["a".into()]).await.unwrap();
        let manifest = store.chunk_manifest("repo-1").await.unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].content_hash, "hb");

        store.drop_corpus("repo-1").await.unwrap();
        assert!(store.list_corpora().await.unwrap().is_empty());
        assert!(store.chunk_manifest("repo-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reopen_preserves_corpora() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let path = path.to_str().unwrap();
        {
            let store = SqliteChunkStore::open(path).await.unwrap();
            store
                .ensure_corpus("keep-1", &Tag::unbranched("/keep"), 2)
                .await
                .unwrap();
            store
                .upsert("keep-1", vec![chunk("a", "/keep/a.rs", vec![1.0, 0.0])])
                .await
                .unwrap();
            store.pool().close().await;
        }
        let store = SqliteChunkStore::open(path).await.unwrap();
        assert_eq!(store.list_corpora().await.unwrap(), ["keep-1"]);
        assert_eq!(
            store.list_corpus_tags().await.unwrap()[0].tag,
            Tag::unbranched("/keep")
        );
        assert_eq!(store.chunk_manifest("keep-1").await.unwrap().len(), 1);
    }
}
