use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use spc_domain::{FileSet, Revision, RevisionContent, Submission};
use time::OffsetDateTime;
use tracing::{info, warn};

use super::{
    archive::write_tree_zip,
    checkout::{RestoreTarget, ScopedCheckout},
    license::{LicenseRenderer, PlaceholderRenderer},
    paths::{allocate_repo_path, Clock, SystemClock},
};
use crate::core::{
    config::StorageSettings,
    errors::{RepoError, Result, StorageError},
    fs::list_files,
    vcs::{CommandRunner, Repository, VersionControlBackend},
};

/// Nested view of a working tree: files are names, directories map their
/// name to their children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FileTree {
    File(String),
    Dir(BTreeMap<String, Vec<FileTree>>),
}

/// Entry point for everything that touches the storage directory.
#[derive(Clone)]
pub struct RepositoryStore {
    settings: StorageSettings,
    runner: CommandRunner,
    clock: Arc<dyn Clock>,
    renderer: Arc<dyn LicenseRenderer>,
}

impl std::fmt::Debug for RepositoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryStore")
            .field("settings", &self.settings)
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

impl RepositoryStore {
    /// Resolves the configured backend and its executable up front.
    pub fn new(settings: StorageSettings) -> Result<Self> {
        let runner = CommandRunner::from_settings(&settings)?;
        Ok(Self {
            settings,
            runner,
            clock: Arc::new(SystemClock),
            renderer: Arc::new(PlaceholderRenderer),
        })
    }

    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: impl LicenseRenderer + 'static) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }

    pub fn settings(&self) -> &StorageSettings {
        &self.settings
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    pub fn backend(&self) -> &dyn VersionControlBackend {
        self.runner.backend()
    }

    pub fn renderer(&self) -> &dyn LicenseRenderer {
        self.renderer.as_ref()
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    pub fn full_path(&self, fileset: &FileSet) -> PathBuf {
        fileset.full_path(&self.settings.storage_dir)
    }

    /// Reserve a fresh repository path for revision `pk`.
    pub fn allocate_fileset(&self, pk: u64) -> FileSet {
        let now = self.now();
        FileSet::new(allocate_repo_path(&self.settings.storage_dir, pk, now), now)
    }

    pub fn open_repository(&self, fileset: &FileSet) -> Result<Repository> {
        Repository::open(&self.runner, &self.full_path(fileset))
    }

    pub fn create_repository(&self, fileset: &FileSet) -> Result<Repository> {
        Repository::init(&self.runner, &self.full_path(fileset))
    }

    /// Drop untracked files and force the working tree back to `hash`.
    pub fn restore(&self, fileset: &FileSet, hash: &str) -> Result<String> {
        let mut repo = self.open_repository(fileset)?;
        repo.purge()?;
        repo.reset_to(hash)
    }

    /// Point the working tree at `hash` and leave it there.
    ///
    /// Returns whether the tree ended up at `hash`. Callers must check out the
    /// latest revision again themselves; prefer [`Self::scoped_checkout`].
    pub fn checkout_revision(&self, fileset: &FileSet, hash: &str) -> Result<bool> {
        let mut repo = self.open_repository(fileset)?;
        let wanted = hash.trim().to_ascii_lowercase();
        match repo.check_out(Some(&wanted)) {
            Ok(current) => Ok(!wanted.is_empty() && current.starts_with(&wanted)),
            Err(StorageError::Repo(err)) => {
                warn!(repo = %fileset, hash, %err, "could not check out revision");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Check out `hash` until the returned guard is finished or dropped.
    ///
    /// The tree returns to the submission's latest stored hash. A submission
    /// without recorded hashes gets the tree back where it was found.
    pub fn scoped_checkout(&self, submission: &Submission, hash: &str) -> Result<ScopedCheckout> {
        let fileset = require_fileset(submission)?;
        let repo = self.open_repository(fileset)?;
        let restore_to = match submission.latest_hash() {
            Some(latest) => RestoreTarget::Stored(latest.to_string()),
            None => repo
                .revision_id()
                .map_or(RestoreTarget::Alias, RestoreTarget::Previous),
        };
        ScopedCheckout::begin(repo, hash, restore_to)
    }

    /// Sorted relative paths of the files currently in the working tree.
    pub fn list_current_files(&self, fileset: &FileSet) -> Result<Vec<String>> {
        let root = self.full_path(fileset);
        list_files(&root, &self.settings.blocklist).map_err(|e| StorageError::io("list", &root, e))
    }

    pub fn file_tree(&self, fileset: &FileSet) -> Result<FileTree> {
        let root = self.full_path(fileset);
        build_tree(&root, &self.settings.blocklist).map_err(|e| StorageError::io("list", &root, e))
    }

    /// Files of `submission` as they were at `hash`.
    pub fn list_files_at(&self, submission: &Submission, hash: &str) -> Result<Vec<String>> {
        let scoped = self
            .scoped_checkout(submission, hash)
            .map_err(|err| not_available(hash, err))?;
        let files = list_files(scoped.path(), &self.settings.blocklist)
            .map_err(|e| not_available(hash, StorageError::io("list", scoped.path(), e)))?;
        scoped.finish().map_err(|err| not_available(hash, err))?;
        Ok(files)
    }

    /// Write a ZIP of `submission` at `hash` to `dest`, then restore the
    /// latest revision. Returns the archived paths.
    pub fn build_download_archive(
        &self,
        submission: &Submission,
        hash: &str,
        dest: &Path,
    ) -> Result<Vec<String>> {
        let scoped = self
            .scoped_checkout(submission, hash)
            .map_err(|err| not_available(hash, err))?;
        let metadata = vec![self.backend().metadata_dir().to_string()];
        let files =
            write_tree_zip(scoped.path(), dest, &metadata).map_err(|err| not_available(hash, err))?;
        scoped.finish().map_err(|err| not_available(hash, err))?;
        info!(
            submission = submission.id,
            hash,
            dest = %dest.display(),
            files = files.len(),
            "built download archive"
        );
        Ok(files)
    }

    /// `<slug>-<submission id>-<revision number>.zip`, numbering from 1.
    pub fn download_archive_name(submission: &Submission, revision: &Revision) -> Result<String> {
        let index = submission.revision_index(revision.id).ok_or_else(|| {
            StorageError::type_mismatch(format!(
                "revision {} does not belong to submission {}",
                revision.id, submission.id
            ))
        })?;
        let slug = submission.slug().unwrap_or_else(|| revision.slug());
        Ok(format!("{slug}-{}-{}.zip", submission.id, index + 1))
    }

    /// File name and body offered when a snippet is downloaded.
    pub fn snippet_download(revision: &Revision, source_url: &str) -> Result<(String, String)> {
        let RevisionContent::Snippet { code } = &revision.content else {
            return Err(StorageError::type_mismatch(format!(
                "revision {} is not a snippet",
                revision.id
            )));
        };
        Ok((
            revision.snippet_file_name(),
            format!("# Source: {source_url}\n\n{code}"),
        ))
    }
}

fn require_fileset(submission: &Submission) -> Result<&FileSet> {
    submission.fileset.as_ref().ok_or_else(|| {
        RepoError::new(format!("submission {} has no repository", submission.id)).into()
    })
}

fn not_available(hash: &str, err: StorageError) -> StorageError {
    match err {
        StorageError::ToolNotFound { .. } | StorageError::NotAvailable { .. } => err,
        other => StorageError::NotAvailable {
            hash: hash.to_string(),
            reason: other.to_string(),
        },
    }
}

fn build_tree(path: &Path, skip: &[String]) -> std::io::Result<FileTree> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !path.is_dir() {
        return Ok(FileTree::File(name));
    }
    let mut entries: Vec<_> = fs::read_dir(path)?
        .filter_map(std::result::Result::ok)
        .filter(|entry| {
            let entry_name = entry.file_name();
            !skip.iter().any(|s| entry_name.to_str() == Some(s.as_str()))
        })
        .map(|entry| entry.path())
        .collect();
    entries.sort();
    let children = entries
        .iter()
        .map(|child| build_tree(child, skip))
        .collect::<std::io::Result<Vec<_>>>()?;
    Ok(FileTree::Dir(BTreeMap::from([(name, children)])))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use spc_domain::{License, SubmissionKind, UserRef};

    use super::*;

    #[test]
    fn file_tree_nests_directories_and_hides_vcs_dirs() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let root = temp.path().join("000042");
        fs::create_dir_all(root.join(".hg/store"))?;
        fs::create_dir_all(root.join("dir1"))?;
        fs::create_dir_all(root.join("dir2"))?;
        fs::write(root.join("dir1/abc.png"), b"")?;
        fs::write(root.join("ghw.png"), b"")?;

        let tree = build_tree(&root, &[".hg".to_string()])?;
        assert_eq!(
            serde_json::to_value(&tree)?,
            json!({"000042": [{"dir1": ["abc.png"]}, {"dir2": []}, "ghw.png"]})
        );
        Ok(())
    }

    #[test]
    fn archive_names_count_revisions_from_one() -> anyhow::Result<()> {
        let user = UserRef::new(1, "ada");
        let mut sub = Submission::new(17, SubmissionKind::Package, user.clone());
        let license = License::builtin("cc0").expect("cc0");
        let empty = || RevisionContent::Package { upload: None };
        let first = Revision::new(3, "Fancy Plots", license.clone(), user.clone(), empty());
        let second = Revision::new(8, "Fancy Plots", license, user, empty());
        sub.push_revision(first, Some("a".repeat(40)))?;
        sub.push_revision(second.clone(), Some("b".repeat(40)))?;

        assert_eq!(
            RepositoryStore::download_archive_name(&sub, &second)?,
            "fancy-plots-17-2.zip"
        );
        Ok(())
    }

    #[test]
    fn snippet_downloads_carry_a_source_line() -> anyhow::Result<()> {
        let rev = Revision::new(
            1,
            "Draw an ellipse",
            License::builtin("cc0").expect("cc0"),
            UserRef::new(1, "ada"),
            RevisionContent::Snippet {
                code: "print('hi')".into(),
            },
        );
        let (name, body) = RepositoryStore::snippet_download(&rev, "http://scpyce.org/3")?;
        assert_eq!(name, "draw_an_ellipse.py");
        assert_eq!(body, "# Source: http://scpyce.org/3\n\nprint('hi')");
        Ok(())
    }

    #[test]
    fn read_failures_become_not_available() {
        let err = not_available("abc", RepoError::new("boom").into());
        assert_eq!(err.code(), "SPC500");
        let fatal = not_available(
            "abc",
            StorageError::ToolNotFound {
                tool: "hg".into(),
                detail: "missing".into(),
            },
        );
        assert_eq!(fatal.code(), "SPC100");
    }
}
