#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]

//! Revision-controlled storage for submission content.
//!
//! Every snippet or package submission owns one working-directory repository
//! under the configured storage root. This crate drives the version control
//! tool, places submitted content, and reads historical revisions back out.

mod core;

pub mod vcs {
    pub use crate::core::vcs::*;
}

pub use crate::core::config::{BackendKind, EnvSnapshot, StderrPolicy, StorageSettings};
pub use crate::core::errors::{RepoError, Result, StorageError};
pub use crate::core::storage::archive::{
    extract_package, validate_package, write_tree_zip, Extraction,
};
pub use crate::core::storage::checkout::{RestoreTarget, ScopedCheckout};
pub use crate::core::storage::license::{
    render_license, LicenseContext, LicenseRenderer, PlaceholderRenderer,
};
pub use crate::core::storage::paths::{allocate_repo_path, Clock, FixedClock, SystemClock};
pub use crate::core::storage::store::{FileTree, RepositoryStore};
pub use crate::core::storage::submission::SubmissionStorage;
pub use crate::core::vcs::{
    backend_for, CommandOutcome, CommandRunner, RepoState, Repository, Verb,
    VersionControlBackend,
};
