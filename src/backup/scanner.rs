//! Repository discovery
//!
//! Finds the bare repositories directly below the repository root. A
//! directory qualifies when its name ends in `.git`, or when it contains both
//! an `objects/` and a `refs/` directory. Nothing is cached between scans.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{BackupError, BackupResult};

/// Conventional suffix of bare repository directories
pub const BARE_SUFFIX: &str = ".git";

/// Why a directory was recognised as a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    /// Directory name ends in `.git`
    Suffixed,
    /// No suffix, but has `objects/` and `refs/`
    Bare,
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suffixed => write!(f, "suffixed"),
            Self::Bare => write!(f, "bare"),
        }
    }
}

/// A repository found by a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryRef {
    /// Directory name without the `.git` suffix
    pub name: String,
    /// Absolute path to the repository directory
    pub path: PathBuf,
    pub kind: RepositoryKind,
}

/// Enumerates backup candidates under a root directory
pub struct RepositoryScanner {
    root: PathBuf,
}

impl RepositoryScanner {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a scan
    ///
    /// Only the root listing happens here; each entry is inspected as the
    /// returned iterator advances. Entries are visited in name order and a
    /// repository reachable under two names (e.g. via a symlink) is yielded
    /// once. A symlink to another repository directly under the root is an
    /// alias and never wins over the real directory.
    pub fn scan(&self) -> BackupResult<Scan> {
        if !self.root.is_dir() {
            return Err(BackupError::RootMissing(self.root.clone()));
        }

        let root = fs::canonicalize(&self.root)?;
        let mut entries: Vec<PathBuf> = fs::read_dir(&root)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();

        Ok(Scan {
            root,
            entries: entries.into_iter(),
            seen: HashSet::new(),
        })
    }
}

/// Lazy sequence of repositories produced by `RepositoryScanner::scan`
pub struct Scan {
    root: PathBuf,
    entries: std::vec::IntoIter<PathBuf>,
    seen: HashSet<PathBuf>,
}

impl Iterator for Scan {
    type Item = RepositoryRef;

    fn next(&mut self) -> Option<RepositoryRef> {
        for path in self.entries.by_ref() {
            let Some(repository) = detect(&path) else {
                continue;
            };

            let identity = fs::canonicalize(&repository.path).unwrap_or_else(|_| repository.path.clone());
            if is_alias(&self.root, &path, &identity) {
                debug!(
                    path = %path.display(),
                    target = %identity.display(),
                    "skipping symlink to a repository under the root"
                );
                continue;
            }
            if !self.seen.insert(identity) {
                debug!(path = %repository.path.display(), "skipping duplicate repository");
                continue;
            }

            return Some(repository);
        }
        None
    }
}

/// `path` is a symlink to a repository that the scan of `root` reaches on its own
fn is_alias(root: &Path, path: &Path, target: &Path) -> bool {
    let is_link = fs::symlink_metadata(path).map_or(false, |m| m.file_type().is_symlink());
    is_link && target != path && target.parent() == Some(root) && detect(target).is_some()
}

/// Classify one root entry
fn detect(path: &Path) -> Option<RepositoryRef> {
    if !path.is_dir() {
        return None;
    }

    let dir_name = path.file_name()?.to_string_lossy().into_owned();

    let kind = if dir_name.len() > BARE_SUFFIX.len() && dir_name.ends_with(BARE_SUFFIX) {
        RepositoryKind::Suffixed
    } else if path.join("objects").is_dir() && path.join("refs").is_dir() {
        RepositoryKind::Bare
    } else {
        return None;
    };

    let name = dir_name
        .strip_suffix(BARE_SUFFIX)
        .filter(|_| kind == RepositoryKind::Suffixed)
        .unwrap_or(&dir_name)
        .to_string();

    Some(RepositoryRef {
        name,
        path: path.to_path_buf(),
        kind,
    })
}
