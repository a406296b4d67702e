use std::path::Path;

use tracing::{debug, error};

use crate::core::{
    errors::{Result, StorageError},
    vcs::Repository,
};

/// Where a [`ScopedCheckout`] puts the tree back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreTarget {
    /// Force the tree (and the git branch) to the latest stored hash.
    Stored(String),
    /// Return to the revision the tree sat on before the checkout.
    Previous(String),
    /// The backend's latest alias (`tip`, `main`).
    Alias,
}

/// A working tree temporarily moved to a historical revision.
///
/// The tree goes back to its [`RestoreTarget`] when the guard is finished or
/// dropped, whichever comes first.
#[derive(Debug)]
pub struct ScopedCheckout {
    repo: Repository,
    revision: String,
    restore_to: RestoreTarget,
    restored: bool,
}

impl ScopedCheckout {
    /// Check `repo` out at `hash`.
    pub fn begin(mut repo: Repository, hash: &str, restore_to: RestoreTarget) -> Result<Self> {
        let wanted = hash.trim().to_ascii_lowercase();
        let checked_out = repo.check_out(Some(&wanted));
        let mut guard = Self {
            repo,
            revision: String::new(),
            restore_to,
            restored: false,
        };
        let current = checked_out?;
        if wanted.is_empty() || !current.starts_with(&wanted) {
            return Err(StorageError::NotAvailable {
                hash: hash.to_string(),
                reason: format!("checkout landed on {current}"),
            });
        }
        debug!(repo = %guard.repo.dir().display(), revision = %current, "scoped checkout");
        guard.revision = current;
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        self.repo.dir()
    }

    /// Full id of the revision the tree is at.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Restore the tree now and report where it ended up.
    pub fn finish(mut self) -> Result<String> {
        self.restored = true;
        self.restore()
    }

    fn restore(&mut self) -> Result<String> {
        match self.restore_to.clone() {
            RestoreTarget::Stored(latest) => self.repo.reset_to(&latest),
            RestoreTarget::Previous(previous) => self.repo.check_out(Some(&previous)),
            RestoreTarget::Alias => self.repo.check_out(None),
        }
    }
}

impl Drop for ScopedCheckout {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        if let Err(err) = self.restore() {
            error!(
                repo = %self.repo.dir().display(),
                %err,
                "could not restore the working tree after a checkout"
            );
        }
    }
}
