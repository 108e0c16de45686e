use std::path::Path;

use serial_test::serial;

use kestrel_core::App;
use kestrel_core::config::{Config, EmbeddingProviderKind, RerankConfig, RerankerKind};
use kestrel_index::{BackendMode, ChunkStore, ContextProviderKind, Tag};

fn mock_config(data: &Path) -> Config {
    let mut config = Config::default();
    config.storage.sqlite_path = data.join("index.db").to_string_lossy().into_owned();
    config.embedding.provider = EmbeddingProviderKind::Mock;
    config.embedding.dimensions = Some(64);
    config.index.case_fold = Some(false);
    config
}

fn write_workspace(root: &Path) {
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(
        root.join("src/auth.rs"),
        "pub fn login(user: &str, password: &str) -> bool {\n    verify_password(user, password)\n}\n",
    )
    .unwrap();
    std::fs::write(
        root.join("src/render.rs"),
        "pub fn render_sidebar(items: &[Item]) {\n    draw_list(items)\n}\n",
    )
    .unwrap();
    std::fs::create_dir_all(root.join("node_modules/dep")).unwrap();
    std::fs::write(root.join("node_modules/dep/index.js"), "module.exports = 1\n").unwrap();
}

#[tokio::test]
#[serial]
async fn index_then_query_codebase() {
    let data = tempfile::tempdir().unwrap();
    let workspace = tempfile::tempdir().unwrap();
    write_workspace(workspace.path());

    let app = App::build(mock_config(data.path()), data.path().join("config.toml"))
        .await
        .unwrap();
    let tag = Tag::unbranched(workspace.path());
    let delta = app.indexer.reindex(&tag).await.unwrap();
    assert_eq!(delta.files_scanned, 2);
    assert_eq!(delta.upserted, 2);

    let items = app
        .service
        .context_items(
            "login password",
            &ContextProviderKind::Codebase {
                workspace_dirs: vec![workspace.path().to_path_buf()],
                context_length: 8192,
            },
        )
        .await
        .unwrap();
    assert!(items[0].is_instructions());
    assert_eq!(items.len(), 3);
    assert_eq!(items[1].name, "auth.rs (1-3)");
    assert_eq!(items[1].description, "src/auth.rs");
    assert!(items[1].content.starts_with("```auth.rs (1-3)\n"));
}

#[tokio::test]
#[serial]
async fn index_survives_restart() {
    let data = tempfile::tempdir().unwrap();
    let workspace = tempfile::tempdir().unwrap();
    write_workspace(workspace.path());
    let tag = Tag::unbranched(workspace.path());

    {
        let app = App::build(mock_config(data.path()), data.path().join("config.toml"))
            .await
            .unwrap();
        app.indexer.reindex(&tag).await.unwrap();
    }

    let app = App::build(mock_config(data.path()), data.path().join("config.toml"))
        .await
        .unwrap();
    let corpora = app
        .store(BackendMode::Local)
        .unwrap()
        .list_corpora()
        .await
        .unwrap();
    assert_eq!(corpora, vec![app.indexer.corpus_id(&tag)]);
    assert!(app.indexer.reindex(&tag).await.unwrap().is_noop());
}

#[tokio::test]
#[serial]
async fn folder_query_with_lexical_reranker() {
    let data = tempfile::tempdir().unwrap();
    let workspace = tempfile::tempdir().unwrap();
    write_workspace(workspace.path());

    let mut config = mock_config(data.path());
    config.rerank = Some(RerankConfig {
        kind: RerankerKind::Lexical,
        base_url: String::new(),
        model: String::new(),
    });
    config.retrieval.use_reranker = true;
    config.retrieval.n_final = 1;
    let app = App::build(config, data.path().join("config.toml"))
        .await
        .unwrap();
    app.indexer
        .reindex(&Tag::unbranched(workspace.path()))
        .await
        .unwrap();

    let items = app
        .service
        .context_items(
            "render_sidebar draw_list",
            &ContextProviderKind::Folder {
                folder: workspace.path().to_path_buf(),
            },
        )
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1].name, "render.rs (1-3)");
}

#[tokio::test]
#[serial]
async fn remote_commands_degrade_without_credentials() {
    let data = tempfile::tempdir().unwrap();
    let app = App::build(mock_config(data.path()), data.path().join("config.toml"))
        .await
        .unwrap();

    assert!(
        app.selector
            .submenu_items(BackendMode::Remote)
            .await
            .unwrap()
            .is_empty()
    );
    let items = app
        .service
        .context_items(
            "anything",
            &ContextProviderKind::Remote {
                filter_directory: Some("/srv/project".into()),
            },
        )
        .await
        .unwrap();
    assert!(items.is_empty());
    assert!(app.store(BackendMode::Remote).is_err());
}

#[tokio::test]
#[serial]
async fn dropped_corpus_answers_with_instructions_only() {
    let data = tempfile::tempdir().unwrap();
    let workspace = tempfile::tempdir().unwrap();
    write_workspace(workspace.path());
    let app = App::build(mock_config(data.path()), data.path().join("config.toml"))
        .await
        .unwrap();
    let tag = Tag::unbranched(workspace.path());
    app.indexer.reindex(&tag).await.unwrap();

    let store = app.store(BackendMode::Local).unwrap();
    store.drop_corpus(&app.indexer.corpus_id(&tag)).await.unwrap();

    let items = app
        .service
        .context_items(
            "login",
            &ContextProviderKind::Directory {
                directory: workspace.path().to_path_buf(),
            },
        )
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert!(items[0].is_instructions());
}

#[tokio::test]
#[serial]
async fn branch_index_is_queryable() {
    let data = tempfile::tempdir().unwrap();
    let workspace = tempfile::tempdir().unwrap();
    write_workspace(workspace.path());
    let app = App::build(mock_config(data.path()), data.path().join("config.toml"))
        .await
        .unwrap();
    app.indexer
        .reindex(&Tag::new(workspace.path(), "main"))
        .await
        .unwrap();

    for kind in [
        ContextProviderKind::Codebase {
            workspace_dirs: vec![workspace.path().to_path_buf()],
            context_length: 8192,
        },
        ContextProviderKind::Folder {
            folder: workspace.path().to_path_buf(),
        },
        ContextProviderKind::Directory {
            directory: workspace.path().to_path_buf(),
        },
    ] {
        let items = app.service.context_items("login", &kind).await.unwrap();
        assert_eq!(items.len(), 3, "{}", kind.title());
    }

    let stored = app
        .store(BackendMode::Local)
        .unwrap()
        .list_corpus_tags()
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].tag.branch, "main");
}
