//! Internal implementation modules for `spc-core`.
//!
//! Callers should use the re-exports at the crate root.

pub mod config;
pub mod errors;
pub(crate) mod fs;
pub mod storage;
pub mod vcs;
