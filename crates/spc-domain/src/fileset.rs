use std::path::{Path, PathBuf};

use serde::Serialize;
use time::OffsetDateTime;

/// Database-side handle binding a submission to its repository directory.
///
/// `repo_path` is relative to the configured storage directory and is never
/// reassigned once a repository has been initialized there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSet {
    repo_path: PathBuf,
    #[serde(with = "time::serde::rfc3339")]
    created: OffsetDateTime,
}

impl FileSet {
    #[must_use]
    pub fn new(repo_path: impl Into<PathBuf>, created: OffsetDateTime) -> Self {
        Self {
            repo_path: repo_path.into(),
            created,
        }
    }

    #[must_use]
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    #[must_use]
    pub fn created(&self) -> OffsetDateTime {
        self.created
    }

    /// Absolute location of the working directory under `storage_dir`.
    #[must_use]
    pub fn full_path(&self, storage_dir: &Path) -> PathBuf {
        storage_dir.join(&self.repo_path)
    }
}

impl std::fmt::Display for FileSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<storage_dir>/{}", self.repo_path.display())
    }
}
