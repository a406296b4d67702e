use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{CommandOutcome, CommandRunner, Verb, VersionControlBackend};
use crate::core::{
    errors::{RepoError, Result, StorageError},
    fs::absolute,
};

/// Where a handle believes its working tree is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "revision", rename_all = "kebab-case")]
pub enum RepoState {
    Uninitialized,
    Initialized,
    Clean,
    Dirty,
    CheckedOutAt(String),
}

impl RepoState {
    /// True when the tree sits on the latest revision.
    pub fn is_at_latest(&self) -> bool {
        !matches!(self, Self::CheckedOutAt(_))
    }
}

/// One working-directory repository driven through a [`CommandRunner`].
#[derive(Debug, Clone)]
pub struct Repository {
    runner: CommandRunner,
    dir: PathBuf,
    remote: Option<String>,
    state: RepoState,
}

impl Repository {
    /// Create an empty repository at `dest`, creating the directory if needed.
    pub fn init(runner: &CommandRunner, dest: &Path) -> Result<Self> {
        fs::create_dir_all(dest).map_err(|source| StorageError::io("create", dest, source))?;
        let mut repo = Self {
            runner: runner.clone(),
            dir: dest.to_path_buf(),
            remote: None,
            state: RepoState::Uninitialized,
        };
        let outcome = repo.runner.run(Verb::Init, &[], &repo.dir)?;
        repo.expect_success(Verb::Init, outcome, "Could not initialize the repository")?;
        repo.state = RepoState::Initialized;
        let backend = repo.backend().name();
        debug!(repo = %repo.dir.display(), backend, "initialized repository");
        Ok(repo)
    }

    /// Bind to an existing repository without touching it.
    pub fn open(runner: &CommandRunner, dir: &Path) -> Result<Self> {
        if !runner.backend().is_repository(dir) {
            return Err(RepoError::new(format!(
                "no {} repository at {}",
                runner.backend().name(),
                dir.display()
            ))
            .into());
        }
        Ok(Self {
            runner: runner.clone(),
            dir: dir.to_path_buf(),
            remote: runner.backend().read_remote(dir),
            state: RepoState::Clean,
        })
    }

    pub fn open_or_init(runner: &CommandRunner, dir: &Path) -> Result<Self> {
        if runner.backend().is_repository(dir) {
            Self::open(runner, dir)
        } else {
            Self::init(runner, dir)
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn backend(&self) -> &dyn VersionControlBackend {
        self.runner.backend()
    }

    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref()
    }

    pub fn state(&self) -> &RepoState {
        &self.state
    }

    /// Stage files matching `patterns` for the next commit.
    pub fn add<S: AsRef<str>>(&mut self, patterns: &[S]) -> Result<()> {
        let args: Vec<String> = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        let outcome = self.runner.run(Verb::Add, &args, &self.dir)?;
        self.expect_success(Verb::Add, outcome, "Could not add one or more files to repository.")?;
        self.state = RepoState::Dirty;
        Ok(())
    }

    /// Stage every new file and every deletion in the working tree.
    pub fn add_remove(&mut self) -> Result<()> {
        let outcome = self.runner.run(Verb::AddRemove, &[], &self.dir)?;
        self.expect_success(
            Verb::AddRemove,
            outcome,
            "Could not stage additions and removals.",
        )?;
        self.state = RepoState::Dirty;
        Ok(())
    }

    /// Delete untracked files from the working tree.
    pub fn purge(&mut self) -> Result<()> {
        let outcome = self.runner.run(Verb::Purge, &[], &self.dir)?;
        self.expect_success(Verb::Purge, outcome, "Could not purge untracked files.")
    }

    /// Force the working tree to `revision`, discarding local modifications.
    pub fn reset_to(&mut self, revision: &str) -> Result<String> {
        let args = self.backend().reset_args(revision);
        let outcome = self.runner.run(Verb::Reset, &args, &self.dir)?;
        self.expect_success(Verb::Reset, outcome, "Could not reset the working directory")?;
        let current = self.revision_id()?;
        self.state = RepoState::Clean;
        debug!(repo = %self.dir.display(), revision = %current, "reset working tree");
        Ok(current)
    }

    /// Update the working tree to `revision` (the latest one when `None`).
    ///
    /// Returns the revision id the tree ends up at.
    pub fn check_out(&mut self, revision: Option<&str>) -> Result<String> {
        let latest = self.backend().latest_alias();
        let target = revision.unwrap_or(latest);
        let args = self.backend().checkout_args(target);
        let outcome = self.runner.run(Verb::Checkout, &args, &self.dir)?;
        self.expect_success(
            Verb::Checkout,
            outcome,
            "Could not update the working directory",
        )?;
        let current = self.revision_id()?;
        self.state = if target == latest {
            RepoState::Clean
        } else {
            RepoState::CheckedOutAt(current.clone())
        };
        debug!(repo = %self.dir.display(), revision = %current, "checked out");
        Ok(current)
    }

    /// Commit staged changes as `user` and return the resulting revision id.
    ///
    /// Nothing to commit is not an error; the current id is returned.
    pub fn commit(&mut self, message: &str, user: &str) -> Result<String> {
        let backend = self.backend();
        let args = backend.commit_args(message, user);
        let env = backend.author_env(user);
        let spec = backend.spec(Verb::Commit);
        let outcome = self
            .runner
            .run_with_env(Verb::Commit, &args, &env, &self.dir)?;
        if let CommandOutcome::Code(code) = outcome {
            if code != 0 && spec.reason(code) == Some("Nothing changed") {
                debug!(repo = %self.dir.display(), "nothing changed; commit skipped");
                self.state = RepoState::Clean;
                return self.revision_id();
            }
        }
        self.expect_success(Verb::Commit, outcome, "Could not commit changes to the repository")?;
        self.state = RepoState::Clean;
        let id = self.revision_id()?;
        info!(repo = %self.dir.display(), revision = %id, user, "committed");
        Ok(id)
    }

    /// Copy the repository to `dest` and return a handle bound there.
    pub fn clone(&self, dest: &Path) -> Result<Self> {
        let source = absolute(&self.dir).map_err(|e| StorageError::io("resolve", &self.dir, e))?;
        let dest = absolute(dest).map_err(|e| StorageError::io("resolve", dest, e))?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io("create", parent, e))?;
        }
        let args = vec![
            source.display().to_string(),
            dest.display().to_string(),
        ];
        let outcome = self.runner.run(Verb::Clone, &args, &self.dir)?;
        self.expect_success(Verb::Clone, outcome, "Could not clone the repository")?;
        debug!(from = %source.display(), to = %dest.display(), "cloned repository");
        Self::open(&self.runner, &dest)
    }

    /// Record the location `push` and `pull` synchronize with.
    pub fn set_remote(&mut self, location: &str) -> Result<()> {
        self.backend()
            .write_remote(&self.dir, location)
            .map_err(|source| StorageError::io("configure remote for", &self.dir, source))?;
        self.remote = Some(location.to_string());
        Ok(())
    }

    pub fn push(&mut self) -> Result<()> {
        self.require_remote(Verb::Push)?;
        let outcome = self.runner.run(Verb::Push, &[], &self.dir)?;
        if let CommandOutcome::Code(code) = outcome {
            let reason = self.backend().spec(Verb::Push).reason(code);
            if code != 0 && reason == Some("Nothing to push") {
                debug!(repo = %self.dir.display(), "nothing to push");
                return Ok(());
            }
        }
        self.expect_success(Verb::Push, outcome, "Could not push changes to the remote")
    }

    pub fn pull(&mut self) -> Result<()> {
        self.require_remote(Verb::Pull)?;
        let outcome = self.runner.run(Verb::Pull, &[], &self.dir)?;
        self.expect_success(Verb::Pull, outcome, "Could not pull changes from the remote")?;
        self.state = RepoState::Clean;
        Ok(())
    }

    /// Number of heads in the repository.
    pub fn heads(&self) -> Result<usize> {
        match self.runner.run(Verb::Heads, &[], &self.dir)? {
            CommandOutcome::Output(text) => Ok(self.backend().count_heads(&text)),
            other => Err(self.failure(Verb::Heads, &other, "Could not list repository heads")),
        }
    }

    pub fn merge(&mut self) -> Result<()> {
        let outcome = self.runner.run(Verb::Merge, &[], &self.dir)?;
        self.expect_success(Verb::Merge, outcome, "Could not merge heads")?;
        self.state = RepoState::Dirty;
        Ok(())
    }

    /// Check out the latest revision, commit, then push.
    ///
    /// A failed checkout aborts before anything is committed.
    pub fn commit_and_push_updates(&mut self, message: &str, user: &str) -> Result<String> {
        if let Err(err) = self.check_out(None) {
            warn!(repo = %self.dir.display(), %err, "checkout failed; not committing");
            return Err(err);
        }
        let id = self.commit(message, user)?;
        self.push()?;
        Ok(id)
    }

    /// Pull, then merge and auto-commit if the pull left several heads.
    ///
    /// Merge conflicts are returned as errors and left for manual resolution.
    pub fn pull_update_and_merge(&mut self) -> Result<String> {
        self.pull()?;
        if self.heads()? > 1 {
            self.merge()?;
            let message = format!(
                "AUTO COMMIT - dvcs_wrapper with {} backend: updated and merged changes.",
                self.backend().name()
            );
            let user = self.backend().name();
            return self.commit(&message, user);
        }
        self.revision_id()
    }

    /// Full revision id of the working tree's parent.
    pub fn revision_id(&self) -> Result<String> {
        match self.runner.run(Verb::Summary, &[], &self.dir)? {
            CommandOutcome::Output(text) => self.backend().parse_revision_id(&text).ok_or_else(|| {
                RepoError::new("Could not determine the current revision")
                    .for_verb(Verb::Summary)
                    .with_diagnostic(&text)
                    .into()
            }),
            other => Err(self.failure(
                Verb::Summary,
                &other,
                "Could not determine the current revision",
            )),
        }
    }

    fn require_remote(&self, verb: Verb) -> Result<()> {
        if self.remote.is_some() {
            return Ok(());
        }
        Err(RepoError::new(format!("no remote configured for {self}"))
            .for_verb(verb)
            .into())
    }

    fn expect_success(&self, verb: Verb, outcome: CommandOutcome, message: &str) -> Result<()> {
        if outcome.is_success() {
            return Ok(());
        }
        Err(self.failure(verb, &outcome, message))
    }

    fn failure(&self, verb: Verb, outcome: &CommandOutcome, message: &str) -> StorageError {
        let code = outcome.code();
        let reason = self.backend().spec(verb).reason(code);
        let mut err = RepoError::new(message).for_verb(verb).with_code(code, reason);
        if let CommandOutcome::Diagnostic { text, .. } = outcome {
            err = err.with_diagnostic(text);
        }
        warn!(repo = %self.dir.display(), %verb, code, %err, "version control command failed");
        err.into()
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} repo [{}]", self.backend().name(), self.dir.display())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::{config::StderrPolicy, vcs::Mercurial};

    #[test]
    fn open_requires_metadata_dir() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let runner = CommandRunner::new(
            Arc::new(Mercurial),
            Some(Path::new("/bin/sh")),
            StderrPolicy::ExitCode,
        )?;
        assert!(matches!(
            Repository::open(&runner, temp.path()),
            Err(StorageError::Repo(_))
        ));

        fs::create_dir(temp.path().join(".hg"))?;
        let mut repo = Repository::open(&runner, temp.path())?;
        assert_eq!(repo.state(), &RepoState::Clean);
        assert_eq!(repo.to_string(), format!("hg repo [{}]", temp.path().display()));

        let err = repo.push().unwrap_err();
        assert!(err.to_string().contains("no remote configured"));
        Ok(())
    }
}
