use std::sync::Arc;

use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};

use kestrel_index::store::{QdrantChunkStore, RemoteCredentials};
use kestrel_index::walker::IgnoreWalker;
use kestrel_index::{ChunkStore, CorpusInfo, Indexer, IndexerConfig, Session, Tag};
use kestrel_llm::mock::MockEmbedder;

const QDRANT_GRPC_PORT: ContainerPort = ContainerPort::Tcp(6334);

fn qdrant_image() -> GenericImage {
    GenericImage::new("qdrant/qdrant", "v1.16.0")
        .with_wait_for(WaitFor::message_on_stdout("gRPC listening"))
        .with_exposed_port(QDRANT_GRPC_PORT)
}

async fn setup(access_key_id: &str) -> (QdrantChunkStore, ContainerAsync<GenericImage>) {
    let container = qdrant_image().start().await.unwrap();
    let grpc_port = container.get_host_port_ipv4(6334).await.unwrap();
    let store = QdrantChunkStore::connect(&RemoteCredentials {
        endpoint: format!("http://127.0.0.1:{grpc_port}"),
        region: "local".into(),
        access_key_id: access_key_id.into(),
        secret: String::new(),
    })
    .unwrap();
    (store, container)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn reindex_against_qdrant_is_idempotent() {
    let (store, _container) = setup("dev").await;
    let store: Arc<dyn ChunkStore> = Arc::new(store);

    let workspace = tempfile::tempdir().unwrap();
    let body: String = (1..=120).map(|i| format!("let v{i} = f{i}();\n")).collect();
    std::fs::write(workspace.path().join("main.rs"), body).unwrap();

    let indexer = Indexer::new(
        Arc::clone(&store),
        Arc::new(MockEmbedder::with_dims(32)),
        Arc::new(IgnoreWalker::default()),
        Session::new(),
        IndexerConfig::default(),
    );
    let tag = Tag::unbranched(workspace.path());

    let first = indexer.reindex(&tag).await.unwrap();
    assert_eq!(first.upserted, 3);
    let second = indexer.reindex(&tag).await.unwrap();
    assert!(second.is_noop());

    let id = indexer.corpus_id(&tag);
    assert_eq!(store.list_corpora().await.unwrap(), vec![id.clone()]);
    assert_eq!(store.chunk_manifest(&id).await.unwrap().len(), 3);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn missing_corpus_queries_empty_and_drop_is_idempotent() {
    let (store, _container) = setup("dev").await;
    assert!(store.query("absent", vec![0.0; 4], 5).await.unwrap().is_empty());
    store.drop_corpus("absent").await.unwrap();

    let tag = Tag::unbranched("/srv/app");
    store.ensure_corpus("app", &tag, 4).await.unwrap();
    store.ensure_corpus("app", &tag, 4).await.unwrap();
    store.drop_corpus("app").await.unwrap();
    assert!(store.list_corpora().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn corpus_tags_follow_create_and_drop() {
    let (store, _container) = setup("dev").await;
    assert!(store.list_corpus_tags().await.unwrap().is_empty());

    store
        .ensure_corpus("app-1", &Tag::new("/srv/app", "main"), 4)
        .await
        .unwrap();
    store
        .ensure_corpus("lib-2", &Tag::unbranched("/srv/lib"), 4)
        .await
        .unwrap();
    assert_eq!(store.list_corpora().await.unwrap(), ["app-1", "lib-2"]);
    assert_eq!(
        store.list_corpus_tags().await.unwrap(),
        vec![
            CorpusInfo {
                id: "app-1".into(),
                tag: Tag::new("/srv/app", "main"),
            },
            CorpusInfo {
                id: "lib-2".into(),
                tag: Tag::unbranched("/srv/lib"),
            },
        ]
    );

    store.drop_corpus("app-1").await.unwrap();
    let left = store.list_corpus_tags().await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, "lib-2");
}
