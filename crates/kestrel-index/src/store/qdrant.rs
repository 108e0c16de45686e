//! Remote Qdrant backend: one collection per corpus, plus a registry
//! collection recording each corpus's tag.

use std::collections::HashMap;
use std::fmt;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder, Distance,
    FieldType, PointId, PointStruct, PointsIdsList, ScrollPointsBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};

use super::{BoxFuture, ChunkStore, CorpusInfo, ManifestEntry, ScoredChunk, StoredChunk};
use crate::error::{IndexError, Result};
use crate::tag::Tag;

const NAMESPACE_SEPARATOR: &str = "__";
const SCROLL_PAGE: u32 = 256;
/// Registry collection suffix. Corpus ids always contain `-`, so it never
/// collides with a corpus collection.
const REGISTRY: &str = "corpora";

/// Connection parameters for the remote mirror.
#[derive(Clone)]
pub struct RemoteCredentials {
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret: String,
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Corpora live in collections named `<access_key_id>__<corpus_id>`, so one
/// cluster can host mirrors for several key holders.
pub struct QdrantChunkStore {
    client: Qdrant,
    namespace: String,
}

impl fmt::Debug for QdrantChunkStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QdrantChunkStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl QdrantChunkStore {
    /// Build a client for the remote endpoint. No request is made yet.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the client cannot be constructed.
    pub fn connect(creds: &RemoteCredentials) -> Result<Self> {
        let client = Qdrant::from_url(&creds.endpoint)
            .api_key(creds.secret.clone())
            .build()?;
        tracing::info!(
            endpoint = %creds.endpoint,
            region = %creds.region,
            "remote chunk store client created"
        );
        Ok(Self {
            client,
            namespace: sanitize_namespace(&creds.access_key_id),
        })
    }

    fn collection(&self, corpus_id: &str) -> String {
        format!("{}{NAMESPACE_SEPARATOR}{corpus_id}", self.namespace)
    }

    fn registry(&self) -> String {
        self.collection(REGISTRY)
    }

    async fn exists(&self, collection: &str) -> Result<bool> {
        Ok(self.client.collection_exists(collection).await?)
    }

    async fn register(&self, corpus_id: &str, tag: &Tag) -> Result<()> {
        let registry = self.registry();
        if !self.exists(&registry).await? {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&registry)
                        .vectors_config(VectorParamsBuilder::new(1, Distance::Cosine)),
                )
                .await?;
        }
        self.client
            .upsert_points(
                UpsertPointsBuilder::new(&registry, vec![registry_point(corpus_id, tag)?])
                    .wait(true),
            )
            .await?;
        Ok(())
    }

    async fn registered(&self) -> Result<Vec<CorpusInfo>> {
        let registry = self.registry();
        if !self.exists(&registry).await? {
            return Ok(Vec::new());
        }
        let mut infos = Vec::new();
        let mut offset: Option<PointId> = None;
        loop {
            let mut builder = ScrollPointsBuilder::new(&registry)
                .with_payload(true)
                .with_vectors(false)
                .limit(SCROLL_PAGE);
            if let Some(ref off) = offset {
                builder = builder.offset(off.clone());
            }
            let response = self.client.scroll(builder).await?;
            infos.extend(response.result.iter().filter_map(|point| {
                let p = &point.payload;
                Some(CorpusInfo {
                    id: payload_str(p, "corpus_id")?,
                    tag: Tag::new(payload_str(p, "directory")?, payload_str(p, "branch")?),
                })
            }));
            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(infos)
    }
}

fn registry_point_id(corpus_id: &str) -> String {
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, corpus_id.as_bytes()).to_string()
}

fn registry_point(corpus_id: &str, tag: &Tag) -> Result<PointStruct> {
    let payload: HashMap<String, Value> = serde_json::from_value(serde_json::json!({
        "corpus_id": corpus_id,
        "directory": tag.directory.to_string_lossy(),
        "branch": tag.branch,
    }))
    .map_err(|e| IndexError::Other(format!("payload encoding failed: {e}")))?;
    Ok(PointStruct::new(
        registry_point_id(corpus_id),
        vec![1.0_f32],
        payload,
    ))
}

fn sanitize_namespace(access_key_id: &str) -> String {
    access_key_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn point_id_string(id: Option<&PointId>) -> Option<String> {
    match id?.point_id_options.as_ref()? {
        PointIdOptions::Uuid(u) => Some(u.clone()),
        PointIdOptions::Num(n) => Some(n.to_string()),
    }
}

fn payload_str(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).cloned()
}

fn payload_usize(payload: &HashMap<String, Value>, key: &str) -> Option<usize> {
    payload
        .get(key)
        .and_then(Value::as_integer)
        .and_then(|v| usize::try_from(v).ok())
}

fn to_point(chunk: StoredChunk) -> Result<PointStruct> {
    let payload: HashMap<String, Value> = serde_json::from_value(serde_json::json!({
        "filepath": chunk.filepath,
        "start_line": chunk.start_line,
        "end_line": chunk.end_line,
        "content": chunk.content,
        "content_hash": chunk.content_hash,
    }))
    .map_err(|e| IndexError::Other(format!("payload encoding failed: {e}")))?;
    Ok(PointStruct::new(chunk.id, chunk.embedding, payload))
}

impl ChunkStore for QdrantChunkStore {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    fn ensure_corpus<'a>(
        &'a self,
        corpus_id: &'a str,
        tag: &'a Tag,
        dimensions: usize,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let collection = self.collection(corpus_id);
            if self.exists(&collection).await? {
                return self.register(corpus_id, tag).await;
            }
            self.client
                .create_collection(CreateCollectionBuilder::new(&collection).vectors_config(
                    VectorParamsBuilder::new(dimensions as u64, Distance::Cosine),
                ))
                .await?;
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &collection,
                    "filepath",
                    FieldType::Keyword,
                ))
                .await?;
            self.register(corpus_id, tag).await?;
            tracing::info!(%collection, %tag, dimensions, "remote corpus created");
            Ok(())
        })
    }

    fn upsert<'a>(
        &'a self,
        corpus_id: &'a str,
        chunks: Vec<StoredChunk>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if chunks.is_empty() {
                return Ok(());
            }
            let points = chunks.into_iter().map(to_point).collect::<Result<Vec<_>>>()?;
            self.client
                .upsert_points(
                    UpsertPointsBuilder::new(self.collection(corpus_id), points).wait(true),
                )
                .await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, corpus_id: &'a str, ids: Vec<String>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let ids: Vec<PointId> = ids.into_iter().map(PointId::from).collect();
            self.client
                .delete_points(
                    DeletePointsBuilder::new(self.collection(corpus_id))
                        .points(PointsIdsList { ids })
                        .wait(true),
                )
                .await?;
            Ok(())
        })
    }

    /// Qdrant has no multi-operation transaction; deletes land before upserts
    /// and each step waits for the write to be applied.
    fn apply<'a>(
        &'a self,
        corpus_id: &'a str,
        upserts: Vec<StoredChunk>,
        deletes: Vec<String>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.delete(corpus_id, deletes).await?;
            self.upsert(corpus_id, upserts).await
        })
    }

    fn query<'a>(
        &'a self,
        corpus_id: &'a str,
        vector: Vec<f32>,
        k: usize,
    ) -> BoxFuture<'a, Result<Vec<ScoredChunk>>> {
        Box::pin(async move {
            let collection = self.collection(corpus_id);
            if k == 0 || !self.exists(&collection).await? {
                return Ok(Vec::new());
            }
            let response = self
                .client
                .search_points(
                    SearchPointsBuilder::new(&collection, vector, k as u64).with_payload(true),
                )
                .await?;

            Ok(response
                .result
                .iter()
                .filter_map(|point| {
                    let p = &point.payload;
                    Some(ScoredChunk {
                        id: point_id_string(point.id.as_ref())?,
                        filepath: payload_str(p, "filepath")?,
                        start_line: payload_usize(p, "start_line")?,
                        end_line: payload_usize(p, "end_line")?,
                        content: payload_str(p, "content")?,
                        score: point.score,
                    })
                })
                .collect())
        })
    }

    fn chunk_manifest<'a>(
        &'a self,
        corpus_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ManifestEntry>>> {
        Box::pin(async move {
            let collection = self.collection(corpus_id);
            if !self.exists(&collection).await? {
                return Ok(Vec::new());
            }

            let mut entries = Vec::new();
            let mut offset: Option<PointId> = None;
            loop {
                let mut builder = ScrollPointsBuilder::new(&collection)
                    .with_payload(true)
                    .with_vectors(false)
                    .limit(SCROLL_PAGE);
                if let Some(ref off) = offset {
                    builder = builder.offset(off.clone());
                }
                let response = self.client.scroll(builder).await?;

                entries.extend(response.result.iter().filter_map(|point| {
                    let p = &point.payload;
                    Some(ManifestEntry {
                        id: point_id_string(point.id.as_ref())?,
                        filepath: payload_str(p, "filepath")?,
                        content_hash: payload_str(p, "content_hash")?,
                        start_line: payload_usize(p, "start_line")?,
                        end_line: payload_usize(p, "end_line")?,
                    })
                }));

                match response.next_page_offset {
                    Some(next) => offset = Some(next),
                    None => break,
                }
            }
            Ok(entries)
        })
    }

    fn list_corpora(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let prefix = format!("{}{NAMESPACE_SEPARATOR}", self.namespace);
            let response = self.client.list_collections().await?;
            let mut ids: Vec<String> = response
                .collections
                .into_iter()
                .filter_map(|c| c.name.strip_prefix(&prefix).map(str::to_owned))
                .filter(|id| id != REGISTRY)
                .collect();
            ids.sort();
            Ok(ids)
        })
    }

    /// Registry entries whose collection still exists.
    fn list_corpus_tags(&self) -> BoxFuture<'_, Result<Vec<CorpusInfo>>> {
        Box::pin(async move {
            let live = self.list_corpora().await?;
            let mut infos: Vec<CorpusInfo> = self
                .registered()
                .await?
                .into_iter()
                .filter(|info| live.binary_search(&info.id).is_ok())
                .collect();
            infos.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(infos)
        })
    }

    fn drop_corpus<'a>(&'a self, corpus_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let collection = self.collection(corpus_id);
            if self.exists(&collection).await? {
                self.client.delete_collection(&collection).await?;
                tracing::info!(%collection, "remote corpus dropped");
            }
            let registry = self.registry();
            if self.exists(&registry).await? {
                self.client
                    .delete_points(
                        DeletePointsBuilder::new(&registry)
                            .points(PointsIdsList {
                                ids: vec![PointId::from(registry_point_id(corpus_id))],
                            })
                            .wait(true),
                    )
                    .await?;
            }
            Ok(())
        })
    }
}
