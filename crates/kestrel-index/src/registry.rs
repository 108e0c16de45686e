//! Maps workspace folders to corpora and decides which ones answer a request.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::store::CorpusInfo;
use crate::tag::{
    NO_BRANCH, Tag, is_at_or_under, is_proper_prefix, normalize_path, same_directory,
};
use crate::walker::FileWalker;

pub struct TagRegistry {
    walker: Arc<dyn FileWalker>,
    case_fold: bool,
}

impl std::fmt::Debug for TagRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagRegistry")
            .field("case_fold", &self.case_fold)
            .finish_non_exhaustive()
    }
}

impl TagRegistry {
    #[must_use]
    pub fn new(walker: Arc<dyn FileWalker>, case_fold: bool) -> Self {
        Self { walker, case_fold }
    }

    #[must_use]
    pub fn case_fold(&self) -> bool {
        self.case_fold
    }

    /// Corpus id for `tag` under this registry's path rules.
    #[must_use]
    pub fn corpus_id(&self, tag: &Tag) -> String {
        tag.corpus_id_with(self.case_fold)
    }

    /// Directories under `root` down to `max_depth` levels, as unbranched tags.
    #[must_use]
    pub fn candidate_tags(&self, root: &Path, max_depth: usize) -> Vec<Tag> {
        self.walker
            .dirs(root, max_depth)
            .into_iter()
            .map(Tag::unbranched)
            .collect()
    }

    /// Candidates with a committed corpus on any branch, keeping only the
    /// deepest directory of each lineage. Input order is preserved.
    #[must_use]
    pub fn resolve(&self, candidates: &[Tag], stored: &[CorpusInfo]) -> Vec<Tag> {
        let mut seen = HashSet::new();
        let matching: Vec<Tag> = candidates
            .iter()
            .filter(|tag| {
                let key = Tag::unbranched(normalize_path(&tag.directory));
                !corpora_for(&key, stored, self.case_fold).is_empty()
                    && seen.insert(self.corpus_id(&key))
            })
            .cloned()
            .collect();
        dedup_deepest(matching, self.case_fold)
    }
}

/// Stored corpora answering for `requested`.
///
/// A branched request needs the exact `(directory, branch)`. An unbranched
/// one takes the unbranched corpus of the directory when it exists, and
/// every indexed branch of it otherwise.
#[must_use]
pub fn corpora_for<'a>(
    requested: &Tag,
    stored: &'a [CorpusInfo],
    case_fold: bool,
) -> Vec<&'a CorpusInfo> {
    let same_dir = stored
        .iter()
        .filter(|info| same_directory(&info.tag.directory, &requested.directory, case_fold));
    if requested.branch == NO_BRANCH {
        prefer_unbranched(same_dir.collect(), case_fold)
    } else {
        same_dir
            .filter(|info| info.tag.branch == requested.branch)
            .collect()
    }
}

/// Stored corpora at or below `root`, resolved per directory like an
/// unbranched [`corpora_for`].
#[must_use]
pub fn corpora_under<'a>(
    root: &Path,
    stored: &'a [CorpusInfo],
    case_fold: bool,
) -> Vec<&'a CorpusInfo> {
    prefer_unbranched(
        stored
            .iter()
            .filter(|info| is_at_or_under(&info.tag.directory, root, case_fold))
            .collect(),
        case_fold,
    )
}

fn prefer_unbranched(matches: Vec<&CorpusInfo>, case_fold: bool) -> Vec<&CorpusInfo> {
    matches
        .iter()
        .filter(|info| {
            info.tag.branch == NO_BRANCH
                || !matches.iter().any(|other| {
                    other.tag.branch == NO_BRANCH
                        && same_directory(&other.tag.directory, &info.tag.directory, case_fold)
                })
        })
        .copied()
        .collect()
}

/// Drop every tag whose directory is a proper ancestor of another tag's
/// directory.
#[must_use]
pub fn dedup_deepest(tags: Vec<Tag>, case_fold: bool) -> Vec<Tag> {
    let dirs: Vec<PathBuf> = tags.iter().map(|t| normalize_path(&t.directory)).collect();
    tags.into_iter()
        .enumerate()
        .filter(|(i, _)| {
            !dirs
                .iter()
                .enumerate()
                .any(|(j, other)| *i != j && is_proper_prefix(&dirs[*i], other, case_fold))
        })
        .map(|(_, tag)| tag)
        .collect()
}

/// Shortest trailing path (at least two components when available) that no
/// other entry in `all` shares.
#[must_use]
pub fn unique_suffix(path: &Path, all: &[PathBuf]) -> String {
    let parts = components(path);
    let others: Vec<Vec<String>> = all
        .iter()
        .filter(|p| p.as_path() != path)
        .map(|p| components(p))
        .collect();

    let mut n = parts.len().min(2);
    while n < parts.len() {
        let suffix = &parts[parts.len() - n..];
        if !others.iter().any(|o| o.ends_with(suffix)) {
            break;
        }
        n += 1;
    }
    parts[parts.len() - n..].join("/")
}

fn components(path: &Path) -> Vec<String> {
    normalize_path(path)
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}
