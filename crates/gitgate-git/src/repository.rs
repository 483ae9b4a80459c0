//! On-disk bare repositories.

use crate::{GitError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Entries every bare repository carries, compared case-insensitively.
const BARE_MARKERS: [&str; 4] = ["config", "head", "objects", "refs"];

/// A bare repository directory.
///
/// Nothing is cached: a `Repository` is looked up for one request and
/// dropped with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    path: PathBuf,
}

impl Repository {
    /// Opens `path`, checking for the bare repository markers.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !has_bare_markers(&path).await {
            return Err(GitError::NotARepository(path));
        }
        Ok(Self { path })
    }

    /// Wraps `path` without checking it.
    ///
    /// Used for directories that exist but do not look like a bare
    /// repository; git itself gets the final say when it runs.
    pub fn assume(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the repository directory.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn has_bare_markers(path: &Path) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(path).await else {
        return false;
    };

    let mut names = HashSet::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        names.insert(entry.file_name().to_string_lossy().to_lowercase());
    }

    BARE_MARKERS.iter().all(|marker| names.contains(*marker))
}
