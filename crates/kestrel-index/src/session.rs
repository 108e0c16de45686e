//! Process-scoped indexing context: cancellation, per-corpus locks, counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

use crate::error::{IndexError, Result};

#[derive(Debug, Default)]
pub struct SessionCounters {
    pub reindexes: AtomicU64,
    pub queries: AtomicU64,
    pub failed_batches: AtomicU64,
}

/// Point-in-time copy of [`SessionCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub reindexes: u64,
    pub queries: u64,
    pub failed_batches: u64,
}

/// Shared by the indexer, retriever and watcher of one process.
#[derive(Debug)]
pub struct Session {
    cancel: CancellationToken,
    corpus_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    counters: SessionCounters,
}

impl Session {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cancel: CancellationToken::new(),
            corpus_locks: Mutex::new(HashMap::new()),
            counters: SessionCounters::default(),
        })
    }

    /// Cancel all in-flight work. Reindexes stop before their next batch and
    /// never commit.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("session shutting down");
        }
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `Err(Cancelled)` once [`shutdown`](Self::shutdown) has been called.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Cancelled` after shutdown.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(IndexError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Exclusive write access to one corpus. A second caller waits; other
    /// corpora are unaffected. Locks nobody holds or waits on are pruned
    /// from the table on each call.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the session shuts down while waiting, or
    /// `Other` if the lock table is poisoned.
    pub async fn lock_corpus(&self, corpus_id: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .corpus_locks
                .lock()
                .map_err(|e| IndexError::Other(format!("corpus lock table poisoned: {e}")))?;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(corpus_id.to_owned()).or_default())
        };
        tokio::select! {
            guard = lock.lock_owned() => Ok(guard),
            () = self.cancel.cancelled() => Err(IndexError::Cancelled),
        }
    }

    #[must_use]
    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    pub(crate) fn record_reindex(&self, failed_batches: usize) {
        self.counters.reindexes.fetch_add(1, Ordering::Relaxed);
        self.counters
            .failed_batches
            .fetch_add(failed_batches as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_query(&self) {
        self.counters.queries.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            reindexes: self.counters.reindexes.load(Ordering::Relaxed),
            queries: self.counters.queries.load(Ordering::Relaxed),
            failed_batches: self.counters.failed_batches.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_corpus_is_serialized() {
        let session = Session::new();
        let guard = session.lock_corpus("c").await.unwrap();

        let s2 = Arc::clone(&session);
        let waiter = tokio::spawn(async move { s2.lock_corpus("c").await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn different_corpora_do_not_block() {
        let session = Session::new();
        let _a = session.lock_corpus("a").await.unwrap();
        let b = tokio::time::timeout(Duration::from_millis(200), session.lock_corpus("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn shutdown_releases_waiters() {
        let session = Session::new();
        let _guard = session.lock_corpus("c").await.unwrap();
        let s2 = Arc::clone(&session);
        let waiter = tokio::spawn(async move { s2.lock_corpus("c").await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.shutdown();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(IndexError::Cancelled)
        ));
        assert!(session.check_cancelled().is_err());
    }

    #[tokio::test]
    async fn idle_locks_are_pruned() {
        let session = Session::new();
        for id in ["a", "b", "c"] {
            drop(session.lock_corpus(id).await.unwrap());
        }
        let held = session.lock_corpus("d").await.unwrap();
        {
            let locks = session.corpus_locks.lock().unwrap();
            assert_eq!(locks.len(), 1);
            assert!(locks.contains_key("d"));
        }

        let _e = session.lock_corpus("e").await.unwrap();
        assert_eq!(session.corpus_locks.lock().unwrap().len(), 2);
        drop(held);
    }

    #[test]
    fn counters_snapshot() {
        let session = Session::new();
        session.record_reindex(2);
        session.record_query();
        session.record_query();
        assert_eq!(
            session.snapshot(),
            CounterSnapshot {
                reindexes: 1,
                queries: 2,
                failed_batches: 2
            }
        );
    }
}
