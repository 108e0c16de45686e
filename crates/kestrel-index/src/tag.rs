//! Tags scope corpora to a `(directory, branch)` pair and derive stable ids.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Branch sentinel for tags that are not tied to a VCS branch.
pub const NO_BRANCH: &str = "NONE";

const SLUG_MAX: usize = 24;
const HASH_HEX_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub directory: PathBuf,
    pub branch: String,
}

impl Tag {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>, branch: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            branch: branch.into(),
        }
    }

    /// Tag with the [`NO_BRANCH`] sentinel.
    #[must_use]
    pub fn unbranched(directory: impl Into<PathBuf>) -> Self {
        Self::new(directory, NO_BRANCH)
    }

    /// Corpus id using the platform's default case sensitivity.
    #[must_use]
    pub fn corpus_id(&self) -> String {
        self.corpus_id_with(default_case_fold())
    }

    /// `<slug>-<hash>`: the slug is a readable basename, the hash is the
    /// first 16 hex chars of BLAKE3 over the canonical `(directory, branch)`.
    #[must_use]
    pub fn corpus_id_with(&self, case_fold: bool) -> String {
        let canonical = canonical_string(&self.directory, case_fold);
        let mut hasher = blake3::Hasher::new();
        hasher.update(canonical.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.branch.as_bytes());
        let hex = hasher.finalize().to_hex();
        format!("{}-{}", slug(&self.directory), &hex[..HASH_HEX_LEN])
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.directory.display(), self.branch)
    }
}

/// Case-insensitive filesystems by default on Windows and macOS.
#[must_use]
pub fn default_case_fold() -> bool {
    cfg!(any(target_os = "windows", target_os = "macos"))
}

/// Lexical normalization: drops `.`, resolves `..` against preceding normal
/// components, and strips trailing separators. Never touches the filesystem.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(comp),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

fn canonical_string(path: &Path, case_fold: bool) -> String {
    let s = normalize_path(path).to_string_lossy().replace('\\', "/");
    if case_fold { s.to_lowercase() } else { s }
}

/// Component-wise proper-prefix test on normalized paths.
///
/// `/h/ab` is not a prefix of `/h/abc`, and a path is never a proper prefix
/// of itself.
#[must_use]
pub fn is_proper_prefix(ancestor: &Path, descendant: &Path, case_fold: bool) -> bool {
    let a = canonical_string(ancestor, case_fold);
    let d = canonical_string(descendant, case_fold);
    a != d && Path::new(&d).starts_with(Path::new(&a))
}

#[must_use]
pub fn same_directory(a: &Path, b: &Path, case_fold: bool) -> bool {
    canonical_string(a, case_fold) == canonical_string(b, case_fold)
}

/// `dir` equals `ancestor` or lies below it, after normalization.
#[must_use]
pub fn is_at_or_under(dir: &Path, ancestor: &Path, case_fold: bool) -> bool {
    same_directory(dir, ancestor, case_fold) || is_proper_prefix(ancestor, dir, case_fold)
}

fn slug(directory: &Path) -> String {
    let base = normalize_path(directory)
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let mapped: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed: String = mapped.trim_matches('_').chars().take(SLUG_MAX).collect();
    if trimmed.is_empty() {
        "root".to_owned()
    } else {
        trimmed
    }
}
