//! Submission storage: path allocation, content placement, license files,
//! and reading historical revisions back out of a repository.

pub mod archive;
pub mod checkout;
pub mod license;
pub mod paths;
pub mod store;
pub mod submission;
