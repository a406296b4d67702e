use std::{fs, path::Path};

use spc_domain::{FileSet, PackageUpload, Revision, RevisionContent, Submission, SubmissionKind};
use tracing::{error, info, warn};

use super::{
    archive::{extract_package, validate_package},
    license::render_license,
    store::RepositoryStore,
};
use crate::core::{
    errors::{RepoError, Result, StorageError},
    fs::{purge_except, remove_dir_all_writable},
    vcs::{is_full_hash, Repository},
};

const DESCRIPTION_FILENAME: &str = "DESCRIPTION.txt";

/// Stores one revision of a submission in its repository.
///
/// The caller records the returned hash on the revision. When `store` fails
/// the caller must `revert` (or use `store_or_revert`) so no half-written
/// tree is left behind as the submission's current state.
#[derive(Debug)]
pub struct SubmissionStorage<'a> {
    store: &'a RepositoryStore,
    submission: &'a mut Submission,
    revision: &'a Revision,
    is_new: bool,
    previous_hash: Option<String>,
    touched: bool,
}

enum Content<'r> {
    Snippet(&'r str),
    Package(&'r PackageUpload),
}

impl<'a> SubmissionStorage<'a> {
    pub fn new(
        store: &'a RepositoryStore,
        submission: &'a mut Submission,
        revision: &'a Revision,
        is_new: bool,
    ) -> Self {
        let previous_hash = submission.latest_hash().map(ToOwned::to_owned);
        Self {
            store,
            submission,
            revision,
            is_new,
            previous_hash,
            touched: false,
        }
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Fileset the submission is bound to, once one exists.
    pub fn fileset(&self) -> Option<&FileSet> {
        self.submission.fileset.as_ref()
    }

    /// Write the revision's content, commit it, and return the new hash.
    pub fn store(&mut self) -> Result<String> {
        if self.submission.frozen {
            return Err(StorageError::Frozen {
                submission: self.submission.id,
            });
        }
        let content = self.content()?;
        // reject before touching the filesystem
        let license_text = render_license(
            self.store.renderer(),
            self.revision,
            self.store.settings(),
            self.store.now(),
        )?;
        if let Content::Package(upload) = content {
            validate_package(upload, self.store.settings().library_max_size)?;
        }

        let mut repo = if self.is_new {
            self.create_repo()?
        } else {
            self.existing_repo()?
        };

        let username = self.revision.created_by.username.as_str();
        let author = self.revision.created_by.profile_url.as_str();
        let message = match content {
            Content::Snippet(code) => {
                let file_name = self.revision.snippet_file_name();
                write_file(repo.dir(), &file_name, code)?;
                write_file(repo.dir(), &self.store.settings().license_filename, &license_text)?;
                if self.is_new {
                    format!(
                        "Add \"{file_name}\" to the repo based on the web submission \
                         by user \"{username}\""
                    )
                } else {
                    format!(
                        "Update of file(s) in the repo based on the web submission \
                         by user \"{username}\""
                    )
                }
            }
            Content::Package(upload) => {
                let metadata_dir = repo.backend().metadata_dir();
                if !self.is_new {
                    purge_except(repo.dir(), &[metadata_dir])
                        .map_err(|e| StorageError::io("clear", repo.dir(), e))?;
                }
                let mut blocklist = self.store.settings().blocklist.clone();
                if !blocklist.iter().any(|d| d == metadata_dir) {
                    blocklist.push(metadata_dir.to_string());
                }
                extract_package(upload, repo.dir(), &blocklist)?;
                write_file(repo.dir(), DESCRIPTION_FILENAME, &self.revision.description)?;
                write_file(repo.dir(), &self.store.settings().license_filename, &license_text)?;
                if self.is_new {
                    "Add files from web-uploaded ZIP file, DESCRIPTION.txt".to_string()
                } else {
                    "Update files from web-uploaded ZIP file, DESCRIPTION.txt".to_string()
                }
            }
        };

        repo.add_remove()?;
        let hash = repo.commit(&message, author)?;
        if !is_full_hash(&hash) {
            return Err(RepoError::new(format!("commit produced an unexpected id '{hash}'")).into());
        }
        info!(
            repo = %repo,
            revision = self.revision.id,
            user = self.revision.created_by.id,
            hash = %hash,
            kind = %self.submission.kind(),
            "committed submission content"
        );
        Ok(hash)
    }

    /// Undo whatever `store` did.
    ///
    /// A new submission loses its whole repository; an edit is rolled back to
    /// `hash_id`. Returns whether the rollback succeeded. Only a missing tool
    /// or a contract violation is returned as an error.
    pub fn revert(&mut self, hash_id: Option<&str>) -> Result<bool> {
        if self.is_new {
            let Some(fileset) = self.submission.fileset.clone() else {
                return Ok(true);
            };
            let full_path = self.store.full_path(&fileset);
            return match remove_dir_all_writable(&full_path) {
                Ok(()) => {
                    error!(
                        repo = %fileset,
                        revision = self.revision.id,
                        user = self.revision.created_by.id,
                        "removed created repo on error"
                    );
                    self.submission.fileset = None;
                    Ok(true)
                }
                Err(err) => {
                    error!(repo = %fileset, %err, "unable to remove repo on error");
                    Ok(false)
                }
            };
        }

        let Some(hash_id) = hash_id else {
            return Err(StorageError::type_mismatch(
                "hash_id is required to revert an edited submission",
            ));
        };
        let fileset = self.submission.fileset.clone().ok_or_else(|| {
            StorageError::type_mismatch(format!(
                "submission {} has no fileset to revert",
                self.submission.id
            ))
        })?;
        match self.store.restore(&fileset, hash_id) {
            Ok(current) => {
                error!(
                    repo = %fileset,
                    revision = self.revision.id,
                    restored = %current,
                    "reverted repo changes on error"
                );
                Ok(true)
            }
            Err(err @ StorageError::ToolNotFound { .. }) => Err(err),
            Err(err) => {
                error!(repo = %fileset, %err, "unable to revert changes in repo");
                Ok(false)
            }
        }
    }

    /// `store`, rolling back and returning the original error on failure.
    pub fn store_or_revert(&mut self) -> Result<String> {
        let err = match self.store() {
            Ok(hash) => return Ok(hash),
            Err(err) => err,
        };
        if !self.touched {
            return Err(err);
        }
        let previous = self.previous_hash.clone();
        match self.revert(previous.as_deref()) {
            Ok(true) => {}
            Ok(false) => warn!(submission = self.submission.id, "rollback was incomplete"),
            Err(revert_err) => {
                error!(submission = self.submission.id, %revert_err, "rollback failed");
            }
        }
        Err(err)
    }

    fn content(&self) -> Result<Content<'a>> {
        let revision: &'a Revision = self.revision;
        match (&revision.content, self.submission.kind()) {
            (RevisionContent::Snippet { code }, SubmissionKind::Snippet) => {
                Ok(Content::Snippet(code.as_str()))
            }
            (RevisionContent::Package { upload }, SubmissionKind::Package) => upload
                .as_ref()
                .map(Content::Package)
                .ok_or_else(|| StorageError::type_mismatch("uploaded file not passed to revision")),
            (RevisionContent::Link { .. }, _) | (_, SubmissionKind::Link) => Err(
                StorageError::type_mismatch("link submissions are not stored in a repository"),
            ),
            (_, kind) => Err(StorageError::type_mismatch(format!(
                "revision {} does not carry {kind} content",
                revision.id
            ))),
        }
    }

    fn create_repo(&mut self) -> Result<Repository> {
        if self.submission.fileset.is_some() {
            return Err(StorageError::type_mismatch(format!(
                "submission {} already has a repository; store it as an edit",
                self.submission.id
            )));
        }
        let fileset = self.store.allocate_fileset(self.revision.id);
        self.submission.fileset = Some(fileset.clone());
        self.touched = true;
        let repo = self.store.create_repository(&fileset)?;
        info!(
            repo = %fileset,
            revision = self.revision.id,
            user = self.revision.created_by.id,
            "created an empty repository"
        );
        Ok(repo)
    }

    fn existing_repo(&mut self) -> Result<Repository> {
        let fileset = self.submission.fileset.clone().ok_or_else(|| {
            StorageError::type_mismatch(format!(
                "submission {} has no repository to update",
                self.submission.id
            ))
        })?;
        let mut repo = self.store.open_repository(&fileset)?;
        // a reader may have left the tree at an older revision
        let latest = match self.submission.latest_hash() {
            Some(hash) => repo.reset_to(hash),
            None => repo.check_out(None),
        };
        let latest = match latest {
            Ok(latest) => latest,
            Err(err) => {
                warn!(repo = %fileset, %err, "could not reach the latest revision; not storing");
                return Err(err);
            }
        };
        self.previous_hash.get_or_insert(latest);
        self.touched = true;
        Ok(repo)
    }
}

fn write_file(dir: &Path, name: &str, contents: &str) -> Result<()> {
    let path = dir.join(name);
    fs::write(&path, contents).map_err(|source| StorageError::io("write", path, source))
}
