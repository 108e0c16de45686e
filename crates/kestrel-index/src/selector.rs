//! Chooses the local or remote chunk store and lists selectable corpora.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::{IndexError, Result};
use crate::registry::{TagRegistry, unique_suffix};
use crate::store::{ChunkStore, QdrantChunkStore, RemoteCredentials};
use crate::tag::NO_BRANCH;

/// How deep below the home directory the local submenu looks for corpora.
pub const LOCAL_SUBMENU_DEPTH: usize = 5;

/// Remote submenu id that searches every remote corpus.
pub const ALL_REMOTE_ID: &str = "all";

/// Region used when the remote parameters leave it unset.
pub const DEFAULT_REGION: &str = "ap-south-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    #[default]
    Local,
    Remote,
}

/// Remote connection parameters as supplied out of band. A missing region
/// falls back to [`DEFAULT_REGION`]; any other absent field disables remote
/// mode.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RemoteConfig {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret: Option<String>,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl RemoteConfig {
    /// Names of the required parameters that are unset or blank.
    #[must_use]
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("endpoint", &self.endpoint),
            ("access_key_id", &self.access_key_id),
            ("secret", &self.secret),
        ]
        .into_iter()
        .filter(|(_, v)| v.as_deref().is_none_or(|s| s.trim().is_empty()))
        .map(|(name, _)| name)
        .collect()
    }

    /// Configured region, or [`DEFAULT_REGION`] when unset or blank.
    #[must_use]
    pub fn region(&self) -> &str {
        self.region
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REGION)
    }

    /// # Errors
    ///
    /// Returns `RemoteBackendUnconfigured` naming every missing parameter.
    pub fn credentials(&self) -> Result<RemoteCredentials> {
        match (&self.endpoint, &self.access_key_id, &self.secret) {
            (Some(endpoint), Some(access_key_id), Some(secret)) if self.missing().is_empty() => {
                Ok(RemoteCredentials {
                    endpoint: endpoint.clone(),
                    region: self.region().to_owned(),
                    access_key_id: access_key_id.clone(),
                    secret: secret.clone(),
                })
            }
            _ => Err(IndexError::RemoteBackendUnconfigured {
                missing: self.missing(),
            }),
        }
    }
}

/// Result of [`BackendSelector::resolve`].
#[derive(Clone)]
pub enum StoreHandle {
    Available(Arc<dyn ChunkStore>),
    /// Remote mode without complete parameters. Treated as "no corpora".
    Unavailable { missing: Vec<&'static str> },
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available(store) => f
                .debug_tuple("Available")
                .field(&store.backend())
                .finish(),
            Self::Unavailable { missing } => f
                .debug_struct("Unavailable")
                .field("missing", missing)
                .finish(),
        }
    }
}

impl StoreHandle {
    #[must_use]
    pub fn store(&self) -> Option<&Arc<dyn ChunkStore>> {
        match self {
            Self::Available(store) => Some(store),
            Self::Unavailable { .. } => None,
        }
    }
}

/// One entry of a folder/corpus selection menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmenuItem {
    pub id: String,
    pub title: String,
    pub description: String,
}

pub struct BackendSelector {
    local: Arc<dyn ChunkStore>,
    remote_config: RemoteConfig,
    remote: OnceCell<Arc<dyn ChunkStore>>,
    registry: Arc<TagRegistry>,
    home: Option<PathBuf>,
}

impl std::fmt::Debug for BackendSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSelector")
            .field("local", &self.local.backend())
            .field("remote_config", &self.remote_config)
            .field("remote_connected", &self.remote.initialized())
            .finish_non_exhaustive()
    }
}

impl BackendSelector {
    #[must_use]
    pub fn new(
        local: Arc<dyn ChunkStore>,
        remote_config: RemoteConfig,
        registry: Arc<TagRegistry>,
    ) -> Self {
        Self {
            local,
            remote_config,
            remote: OnceCell::new(),
            registry,
            home: dirs::home_dir(),
        }
    }

    /// Override the root scanned for the local submenu.
    #[must_use]
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Use an already-built remote store instead of connecting to Qdrant.
    #[must_use]
    pub fn with_remote_store(self, store: Arc<dyn ChunkStore>) -> Self {
        let cell = OnceCell::new_with(Some(store));
        Self {
            remote: cell,
            ..self
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TagRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn local(&self) -> Arc<dyn ChunkStore> {
        Arc::clone(&self.local)
    }

    fn remote_store(&self) -> Result<Arc<dyn ChunkStore>> {
        if let Some(store) = self.remote.get() {
            return Ok(Arc::clone(store));
        }
        let creds = self.remote_config.credentials()?;
        let store: Arc<dyn ChunkStore> = Arc::new(QdrantChunkStore::connect(&creds)?);
        // A concurrent caller may have won the race; keep whichever landed first.
        let _ = self.remote.set(Arc::clone(&store));
        Ok(self.remote.get().map_or(store, Arc::clone))
    }

    /// Store for `mode`. Remote mode with incomplete parameters yields
    /// [`StoreHandle::Unavailable`] instead of an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the remote client cannot be built.
    pub fn resolve(&self, mode: BackendMode) -> Result<StoreHandle> {
        match mode {
            BackendMode::Local => Ok(StoreHandle::Available(self.local())),
            BackendMode::Remote => match self.remote_store() {
                Ok(store) => Ok(StoreHandle::Available(store)),
                Err(IndexError::RemoteBackendUnconfigured { missing }) => {
                    tracing::debug!(?missing, "remote backend unavailable");
                    Ok(StoreHandle::Unavailable { missing })
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Corpus ids on the remote store, or empty when it is not configured.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the remote store cannot be listed.
    pub async fn remote_corpora(&self) -> Result<Vec<String>> {
        match self.resolve(BackendMode::Remote)? {
            StoreHandle::Available(store) => store.list_corpora().await,
            StoreHandle::Unavailable { .. } => Ok(Vec::new()),
        }
    }

    /// Menu entries for picking a folder (local) or remote project.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if corpora cannot be listed.
    pub async fn submenu_items(&self, mode: BackendMode) -> Result<Vec<SubmenuItem>> {
        match mode {
            BackendMode::Local => {
                let Some(home) = self.home.clone() else {
                    tracing::warn!("no home directory, local folder menu is empty");
                    return Ok(Vec::new());
                };
                let stored = self.local.list_corpus_tags().await?;
                let registry = Arc::clone(&self.registry);
                let tags = tokio::task::spawn_blocking(move || {
                    let candidates = registry.candidate_tags(&home, LOCAL_SUBMENU_DEPTH);
                    registry.resolve(&candidates, &stored)
                })
                .await
                .map_err(|e| IndexError::Other(format!("folder scan task failed: {e}")))?;

                let dirs: Vec<PathBuf> = tags.into_iter().map(|t| t.directory).collect();
                Ok(dirs
                    .iter()
                    .map(|dir| SubmenuItem {
                        id: dir.to_string_lossy().into_owned(),
                        title: basename(dir),
                        description: unique_suffix(dir, &dirs),
                    })
                    .collect())
            }
            BackendMode::Remote => {
                let StoreHandle::Available(store) = self.resolve(BackendMode::Remote)? else {
                    return Ok(Vec::new());
                };
                let corpora = store.list_corpus_tags().await?;
                Ok(std::iter::once(SubmenuItem {
                    id: ALL_REMOTE_ID.into(),
                    title: "All remote projects".into(),
                    description: String::new(),
                })
                .chain(corpora.into_iter().map(|corpus| {
                    let mut title = basename(&corpus.tag.directory);
                    if corpus.tag.branch != NO_BRANCH {
                        title = format!("{title} ({})", corpus.tag.branch);
                    }
                    SubmenuItem {
                        id: corpus.id,
                        title,
                        description: corpus.tag.directory.to_string_lossy().into_owned(),
                    }
                }))
                .collect())
            }
        }
    }
}

fn basename(dir: &Path) -> String {
    dir.file_name().map_or_else(
        || dir.to_string_lossy().into_owned(),
        |n| n.to_string_lossy().into_owned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryChunkStore;
    use crate::tag::Tag;
    use crate::walker::IgnoreWalker;

    fn full() -> RemoteConfig {
        RemoteConfig {
            endpoint: Some("http://localhost:6334".into()),
            region: Some("us-east-1".into()),
            access_key_id: Some("AKIA".into()),
            secret: Some("s3cret".into()),
        }
    }

    fn selector(remote: RemoteConfig) -> BackendSelector {
        BackendSelector::new(
            Arc::new(InMemoryChunkStore::new()),
            remote,
            Arc::new(TagRegistry::new(Arc::new(IgnoreWalker::default()), false)),
        )
    }

    #[test]
    fn missing_lists_each_absent_field() {
        let mut cfg = full();
        assert!(cfg.missing().is_empty());
        cfg.secret = None;
        cfg.access_key_id = Some("  ".into());
        assert_eq!(cfg.missing(), ["access_key_id", "secret"]);
    }

    #[test]
    fn unset_region_defaults() {
        let mut cfg = full();
        cfg.region = None;
        assert!(cfg.missing().is_empty());
        assert_eq!(cfg.credentials().unwrap().region, DEFAULT_REGION);
        cfg.region = Some(" ".into());
        assert_eq!(cfg.region(), "ap-south-1");
        cfg.region = Some("eu-west-1".into());
        assert_eq!(cfg.credentials().unwrap().region, "eu-west-1");
    }

    #[test]
    fn debug_redacts_secret() {
        let dbg = format!("{:?}", full());
        assert!(!dbg.contains("s3cret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn unconfigured_remote_is_empty_not_error() {
        for drop_field in 0..3 {
            let mut cfg = full();
            match drop_field {
                0 => cfg.endpoint = None,
                1 => cfg.access_key_id = None,
                _ => cfg.secret = None,
            }
            let sel = selector(cfg);
            assert!(matches!(
                sel.resolve(BackendMode::Remote).unwrap(),
                StoreHandle::Unavailable { .. }
            ));
            assert!(sel.remote_corpora().await.unwrap().is_empty());
            assert!(sel.submenu_items(BackendMode::Remote).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn remote_menu_leads_with_all() {
        let remote = Arc::new(InMemoryChunkStore::new());
        remote
            .ensure_corpus("app-1", &Tag::unbranched("/srv/app"), 4)
            .await
            .unwrap();
        remote
            .ensure_corpus("lib-2", &Tag::new("/srv/lib", "main"), 4)
            .await
            .unwrap();
        let sel = selector(RemoteConfig::default()).with_remote_store(remote);

        let items = sel.submenu_items(BackendMode::Remote).await.unwrap();
        assert_eq!(items[0].id, ALL_REMOTE_ID);
        assert_eq!(items[0].title, "All remote projects");
        assert_eq!(items[1].id, "app-1");
        assert_eq!(items[1].title, "app");
        assert_eq!(items[1].description, "/srv/app");
        assert_eq!(items[2].title, "lib (main)");
    }

    #[tokio::test]
    async fn local_menu_lists_deepest_indexed_folders() {
        let home = tempfile::tempdir().unwrap();
        for d in ["work/api", "work/api/server", "play/api", "notes"] {
            std::fs::create_dir_all(home.path().join(d)).unwrap();
        }
        let store = Arc::new(InMemoryChunkStore::new());
        for d in ["work/api", "work/api/server", "play/api"] {
            let tag = Tag::unbranched(home.path().join(d));
            store
                .ensure_corpus(&tag.corpus_id_with(false), &tag, 4)
                .await
                .unwrap();
        }
        let sel = BackendSelector::new(
            store,
            RemoteConfig::default(),
            Arc::new(TagRegistry::new(Arc::new(IgnoreWalker::default()), false)),
        )
        .with_home(home.path());

        let items = sel.submenu_items(BackendMode::Local).await.unwrap();
        let titles: Vec<_> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, ["api", "server"]);
        assert_eq!(items[0].description, "play/api");
        assert_eq!(items[1].description, "api/server");
        assert_eq!(
            items[1].id,
            home.path().join("work/api/server").to_string_lossy()
        );
    }

    #[tokio::test]
    async fn local_menu_lists_branch_indexed_folders() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(home.path().join("repo")).unwrap();
        let store = Arc::new(InMemoryChunkStore::new());
        let tag = Tag::new(home.path().join("repo"), "main");
        store
            .ensure_corpus(&tag.corpus_id_with(false), &tag, 4)
            .await
            .unwrap();
        let sel = BackendSelector::new(
            store,
            RemoteConfig::default(),
            Arc::new(TagRegistry::new(Arc::new(IgnoreWalker::default()), false)),
        )
        .with_home(home.path());

        let items = sel.submenu_items(BackendMode::Local).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "repo");
    }

    #[test]
    fn local_always_resolves() {
        let sel = selector(RemoteConfig::default());
        assert!(sel.resolve(BackendMode::Local).unwrap().store().is_some());
    }
}
