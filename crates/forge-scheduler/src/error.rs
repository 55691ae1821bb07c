//! Scheduler error types.

use thiserror::Error;

use forge_cache::CacheError;
use forge_graph::GraphError;
use forge_lock::LockError;
use forge_pool::PoolError;

pub type CompileStepResult<T> = Result<T, CompileStepError>;

/// Errors that can end a compilation run.
#[derive(Debug, Error)]
pub enum CompileStepError {
    /// The run was cancelled before every package was resolved.
    #[error("package compilation cancelled")]
    Cancelled,

    #[error("failed to compile '{package}' against stemcell '{stemcell}': {source}")]
    CompileFailed {
        package: String,
        stemcell: String,
        source: PoolError,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Lock(#[from] LockError),

    /// A spawned compile future panicked. Treated as fatal because the
    /// worker accounting for that task can no longer be trusted.
    #[error("compile task aborted unexpectedly: {0}")]
    TaskPanicked(String),
}
