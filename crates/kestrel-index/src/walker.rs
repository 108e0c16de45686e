//! Ignore-aware workspace traversal.

use std::path::{Path, PathBuf};

/// Directory names skipped on every walk.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &["node_modules"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

pub trait FileWalker: Send + Sync {
    /// Entries under `root` (excluding `root` itself), down to `max_depth`
    /// levels below it when given. Hidden and excluded entries are skipped.
    fn walk(&self, root: &Path, max_depth: Option<usize>) -> Vec<WalkEntry>;

    /// Regular files under `root`, in sorted order.
    fn files(&self, root: &Path) -> Vec<PathBuf> {
        self.walk(root, None)
            .into_iter()
            .filter(|e| !e.is_dir)
            .map(|e| e.path)
            .collect()
    }

    /// Directories under `root` down to `max_depth` levels, in sorted order.
    fn dirs(&self, root: &Path, max_depth: usize) -> Vec<PathBuf> {
        self.walk(root, Some(max_depth))
            .into_iter()
            .filter(|e| e.is_dir)
            .map(|e| e.path)
            .collect()
    }
}

/// [`FileWalker`] backed by the `ignore` crate: honours `.gitignore`,
/// `.ignore` and global git excludes, and skips dot-entries.
#[derive(Debug, Clone)]
pub struct IgnoreWalker {
    excluded: Vec<String>,
}

impl Default for IgnoreWalker {
    fn default() -> Self {
        Self {
            excluded: DEFAULT_EXCLUDED_DIRS.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

impl IgnoreWalker {
    #[must_use]
    pub fn with_excluded(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.excluded.extend(names);
        self
    }
}

impl FileWalker for IgnoreWalker {
    fn walk(&self, root: &Path, max_depth: Option<usize>) -> Vec<WalkEntry> {
        let excluded = self.excluded.clone();
        let mut builder = ignore::WalkBuilder::new(root);
        builder
            .hidden(true)
            .git_ignore(true)
            .require_git(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
                !(is_dir
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| excluded.iter().any(|x| x == name)))
            });
        if let Some(depth) = max_depth {
            builder.max_depth(Some(depth + 1));
        }

        builder
            .build()
            .filter_map(|result| match result {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::debug!("walk error: {e}");
                    None
                }
            })
            .filter(|entry| entry.depth() > 0)
            .filter_map(|entry| {
                let ft = entry.file_type()?;
                if !(ft.is_dir() || ft.is_file()) {
                    return None;
                }
                Some(WalkEntry {
                    is_dir: ft.is_dir(),
                    path: entry.into_path(),
                })
            })
            .collect()
    }
}
