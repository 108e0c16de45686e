use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use kestrel_core::App;
use kestrel_index::tag::NO_BRANCH;
use kestrel_index::watcher::IndexWatcher;
use kestrel_index::{BackendMode, ContextItem, ContextProviderKind, IndexDelta, Tag};

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    std::fs::canonicalize(path).with_context(|| format!("cannot resolve {}", path.display()))
}

fn tag_for(path: &Path, branch: Option<&str>) -> anyhow::Result<Tag> {
    let dir = absolute(path)?;
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    Ok(Tag::new(dir, branch.unwrap_or(NO_BRANCH)))
}

fn mode(remote: bool) -> BackendMode {
    if remote {
        BackendMode::Remote
    } else {
        BackendMode::Local
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn delta_json(delta: &IndexDelta) -> serde_json::Value {
    serde_json::json!({
        "corpus_id": delta.corpus_id,
        "files_scanned": delta.files_scanned,
        "upserted": delta.upserted,
        "deleted": delta.deleted,
        "unchanged": delta.unchanged,
        "failed_batches": delta.failed_batches,
        "errors": delta.errors,
        "duration_ms": delta.duration_ms,
    })
}

pub async fn index(
    app: &App,
    paths: &[PathBuf],
    branch: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let mut deltas = Vec::with_capacity(paths.len());
    for path in paths {
        let tag = tag_for(path, branch.as_deref())?;
        let delta = app
            .indexer
            .reindex(&tag)
            .await
            .with_context(|| format!("indexing {tag} failed"))?;
        if !json {
            println!(
                "{tag}: {} files, +{} -{} ={} ({} failed batches) in {} ms",
                delta.files_scanned,
                delta.upserted,
                delta.deleted,
                delta.unchanged,
                delta.failed_batches,
                delta.duration_ms
            );
            for err in &delta.errors {
                println!("  warning: {err}");
            }
        }
        deltas.push(delta);
    }
    if json {
        print_json(&deltas.iter().map(delta_json).collect::<Vec<_>>())?;
    }
    Ok(())
}

/// Map query flags to a provider kind. With no flag, the current directory
/// is searched as a codebase.
pub fn provider_kind(
    app: &App,
    workspaces: Vec<PathBuf>,
    folder: Option<PathBuf>,
    remote: Option<PathBuf>,
    directory: Option<PathBuf>,
) -> anyhow::Result<ContextProviderKind> {
    if let Some(folder) = folder {
        return Ok(ContextProviderKind::Folder {
            folder: absolute(&folder)?,
        });
    }
    if let Some(filter) = remote {
        return Ok(ContextProviderKind::Remote {
            filter_directory: Some(filter),
        });
    }
    if let Some(directory) = directory {
        return Ok(ContextProviderKind::Directory {
            directory: absolute(&directory)?,
        });
    }
    let workspace_dirs = if workspaces.is_empty() {
        vec![std::env::current_dir().context("cannot read current directory")?]
    } else {
        workspaces
            .iter()
            .map(|w| absolute(w))
            .collect::<anyhow::Result<_>>()?
    };
    Ok(ContextProviderKind::Codebase {
        workspace_dirs,
        context_length: app.config.retrieval.context_length,
    })
}

fn print_items(items: &[ContextItem]) {
    if items.is_empty() {
        println!("no context available");
        return;
    }
    for item in items {
        if item.is_instructions() {
            continue;
        }
        println!("── {} [{}]", item.name, item.description);
        println!("{}\n", item.content);
    }
    println!("{} snippet(s)", items.iter().filter(|i| !i.is_instructions()).count());
}

pub async fn query(
    app: &App,
    query: &str,
    kind: &ContextProviderKind,
    json: bool,
) -> anyhow::Result<()> {
    let items = app.service.context_items(query, kind).await?;
    if json {
        print_json(&items)
    } else {
        print_items(&items);
        Ok(())
    }
}

pub async fn folders(app: &App, remote: bool, json: bool) -> anyhow::Result<()> {
    let items = app.selector.submenu_items(mode(remote)).await?;
    if json {
        return print_json(&items);
    }
    for item in items {
        if item.description.is_empty() {
            println!("{}\t{}", item.id, item.title);
        } else {
            println!("{}\t{} ({})", item.id, item.title, item.description);
        }
    }
    Ok(())
}

pub async fn corpora(
    app: &App,
    remote: bool,
    drop: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let store = app.store(mode(remote))?;
    if let Some(id) = drop {
        store
            .drop_corpus(&id)
            .await
            .with_context(|| format!("failed to drop corpus {id}"))?;
        tracing::info!(corpus = %id, backend = store.backend(), "corpus dropped");
        if !json {
            println!("dropped {id}");
        }
        return Ok(());
    }
    let corpora = store.list_corpus_tags().await?;
    if json {
        return print_json(&corpora);
    }
    for corpus in corpora {
        println!("{}\t{}", corpus.id, corpus.tag);
    }
    Ok(())
}

pub async fn watch(app: &App, paths: &[PathBuf], branch: Option<String>) -> anyhow::Result<()> {
    let debounce = Duration::from_millis(app.config.index.watch_debounce_ms);
    let mut watchers = Vec::with_capacity(paths.len());
    for path in paths {
        let tag = tag_for(path, branch.as_deref())?;
        let delta = app.indexer.reindex(&tag).await?;
        tracing::info!(tag = %tag, upserted = delta.upserted, deleted = delta.deleted, "initial index");
        watchers.push(IndexWatcher::start(tag, Arc::clone(&app.indexer), debounce)?);
    }
    app.session.cancellation().cancelled().await;
    drop(watchers);
    Ok(())
}
