//! forge-core — shared domain types for the Forge compilation scheduler.
//!
//! Packages, stemcells, compiled-package records, instance-group modeling,
//! the compilation configuration, and the content-digest helpers used to
//! derive dependency and cache keys.

pub mod config;
pub mod digest;
pub mod types;

pub use config::{CompilationConfig, ConfigError};
pub use types::*;
