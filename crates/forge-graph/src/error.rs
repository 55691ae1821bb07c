//! Task-graph error types.

use thiserror::Error;

/// Result type alias for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors that can occur while building or querying the task graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("circular dependency detected in package '{package}': {cycle}")]
    CircularDependency { package: String, cycle: String },

    #[error("package '{name}' (dependency of '{dependent}') is not part of the release")]
    UnknownDependency { name: String, dependent: String },

    #[error("package '{name}' hasn't been compiled yet")]
    DependencyNotCompiled { name: String },
}
