//! Re-indexes a tag when files under its directory change.

use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;

use kestrel_llm::EmbeddingProvider;
use notify_debouncer_mini::{DebouncedEvent, DebouncedEventKind, new_debouncer};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::indexer::Indexer;
use crate::tag::Tag;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

pub struct IndexWatcher {
    handle: tokio::task::JoinHandle<()>,
}

impl IndexWatcher {
    /// Watch `tag.directory` recursively and reindex the whole tag after each
    /// debounced burst of changes. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Watcher` if the filesystem watcher cannot be initialized or
    /// the directory does not exist.
    pub fn start<P: EmbeddingProvider + 'static>(
        tag: Tag,
        indexer: Arc<Indexer<P>>,
        debounce: Duration,
    ) -> Result<Self> {
        // Capacity 1: a pending signal already covers any later change.
        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(1);
        let root = tag.directory.clone();

        let mut debouncer = new_debouncer(
            debounce,
            move |events: std::result::Result<Vec<DebouncedEvent>, notify::Error>| {
                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!("index watcher error: {e}");
                        return;
                    }
                };
                let relevant = events
                    .iter()
                    .any(|e| e.kind == DebouncedEventKind::Any && !is_hidden(&root, &e.path));
                if relevant {
                    let _ = notify_tx.try_send(());
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&tag.directory, notify::RecursiveMode::Recursive)?;
        tracing::info!(tag = %tag, "watching for changes");

        let cancel = indexer.session().cancellation();
        let handle = tokio::spawn(async move {
            let _debouncer = debouncer;
            loop {
                tokio::select! {
                    signal = notify_rx.recv() => {
                        if signal.is_none() {
                            break;
                        }
                    }
                    () = cancel.cancelled() => break,
                }
                match indexer.reindex(&tag).await {
                    Ok(delta) if delta.is_noop() => {
                        tracing::debug!(tag = %tag, "change did not affect the index");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(tag = %tag, "reindex after change failed: {e}"),
                }
            }
            tracing::debug!(tag = %tag, "index watcher stopped");
        });

        Ok(Self { handle })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for IndexWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// True when `path` sits in (or is) a dot-entry below `root`.
fn is_hidden(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root).unwrap_or(path).components().any(|c| {
        matches!(c, Component::Normal(name) if name.to_string_lossy().starts_with('.'))
    })
}
