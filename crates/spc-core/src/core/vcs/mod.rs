//! Version control plumbing: the verb vocabulary, the backends that map it
//! onto concrete tools, the subprocess runner, and the repository handle.

use std::{fmt, io, path::Path, str::FromStr, sync::Arc};

use serde::Serialize;

use crate::core::{
    config::BackendKind,
    errors::{Result, StorageError},
};

mod git;
mod mercurial;
pub(crate) mod process;
mod repository;
mod runner;

pub use git::Git;
pub use mercurial::Mercurial;
pub use repository::{RepoState, Repository};
pub use runner::{CommandOutcome, CommandRunner};

/// Allow-listed logical operations the runner will execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Pull,
    Checkout,
    Merge,
    Clone,
    Init,
    Add,
    AddRemove,
    Heads,
    Commit,
    Push,
    Summary,
    Purge,
    Reset,
}

impl Verb {
    pub const ALL: [Verb; 13] = [
        Verb::Pull,
        Verb::Checkout,
        Verb::Merge,
        Verb::Clone,
        Verb::Init,
        Verb::Add,
        Verb::AddRemove,
        Verb::Heads,
        Verb::Commit,
        Verb::Push,
        Verb::Summary,
        Verb::Purge,
        Verb::Reset,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Checkout => "checkout",
            Self::Merge => "merge",
            Self::Clone => "clone",
            Self::Init => "init",
            Self::Add => "add",
            Self::AddRemove => "addremove",
            Self::Heads => "heads",
            Self::Commit => "commit",
            Self::Push => "push",
            Self::Summary => "summary",
            Self::Purge => "purge",
            Self::Reset => "reset",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self> {
        let lowered = value.trim().to_ascii_lowercase();
        if lowered == "update" {
            return Ok(Self::Checkout);
        }
        Self::ALL
            .into_iter()
            .find(|verb| verb.as_str() == lowered)
            .ok_or_else(|| StorageError::type_mismatch(format!("'{value}' is not an allowed verb")))
    }
}

/// What a successful call hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    ExitCode,
    Stdout,
}

/// Per-backend translation of one verb.
#[derive(Debug, Clone, Copy)]
pub struct VerbSpec {
    /// Sub-command and fixed arguments placed before caller arguments.
    pub command: &'static [&'static str],
    pub output: OutputMode,
    /// Known non-zero exit codes and what they mean.
    pub errors: &'static [(i32, &'static str)],
}

impl VerbSpec {
    pub const fn new(
        command: &'static [&'static str],
        output: OutputMode,
        errors: &'static [(i32, &'static str)],
    ) -> Self {
        Self {
            command,
            output,
            errors,
        }
    }

    pub fn reason(&self, code: i32) -> Option<&'static str> {
        self.errors
            .iter()
            .find(|(known, _)| *known == code)
            .map(|(_, reason)| *reason)
    }
}

/// One concrete version control tool.
pub trait VersionControlBackend: fmt::Debug + Send + Sync {
    /// Short name used in logs and the auto-merge commit message.
    fn name(&self) -> &'static str;

    fn default_executable(&self) -> &'static str;

    /// Directory holding the tool's metadata inside a working tree.
    fn metadata_dir(&self) -> &'static str;

    /// Revision name that always means "most recent".
    fn latest_alias(&self) -> &'static str;

    fn spec(&self, verb: Verb) -> VerbSpec;

    /// Environment applied to every invocation.
    fn base_env(&self) -> Vec<(String, String)>;

    fn commit_args(&self, message: &str, user: &str) -> Vec<String>;

    /// Extra environment for verbs that record an author.
    fn author_env(&self, _user: &str) -> Vec<(String, String)> {
        Vec::new()
    }

    fn checkout_args(&self, revision: &str) -> Vec<String> {
        vec![revision.to_string()]
    }

    fn reset_args(&self, revision: &str) -> Vec<String> {
        vec![revision.to_string()]
    }

    /// Extract the full revision id from `summary` output.
    fn parse_revision_id(&self, output: &str) -> Option<String>;

    fn count_heads(&self, output: &str) -> usize {
        output.lines().filter(|line| !line.trim().is_empty()).count()
    }

    fn read_remote(&self, repo_dir: &Path) -> Option<String>;

    fn write_remote(&self, repo_dir: &Path, location: &str) -> io::Result<()>;

    fn is_repository(&self, dir: &Path) -> bool {
        dir.join(self.metadata_dir()).is_dir()
    }
}

/// Instantiate the backend configured for this deployment.
pub fn backend_for(kind: BackendKind) -> Result<Arc<dyn VersionControlBackend>> {
    match kind {
        BackendKind::Mercurial => Ok(Arc::new(Mercurial)),
        BackendKind::Git => Ok(Arc::new(Git)),
        BackendKind::Bazaar => Err(StorageError::UnsupportedBackend {
            name: kind.as_str().to_string(),
        }),
    }
}

pub(crate) fn is_full_hash(candidate: &str) -> bool {
    candidate.len() == 40 && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}
