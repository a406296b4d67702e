#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

//! Entity model shared by the storage core and its callers.

pub mod fileset;
pub mod license;
pub mod revision;
pub mod slug;
pub mod submission;

pub use fileset::FileSet;
pub use license::License;
pub use revision::{PackageSource, PackageUpload, Revision, RevisionContent, UserRef};
pub use slug::{slugify, snippet_file_name};
pub use submission::{DomainError, Submission, SubmissionKind};
