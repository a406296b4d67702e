//! Storage settings assembled from the environment and an optional file.

pub mod settings;

pub use settings::*;
