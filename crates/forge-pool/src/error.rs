//! Pool error types.

use thiserror::Error;

use crate::agent::AgentError;
use crate::cloud::CloudError;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors that can occur while preparing or releasing workers.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create compilation worker after {tries} attempt(s): {source}")]
    CreateVm { tries: u32, source: CloudError },

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    /// In reuse mode there must never be more workers for a stemcell than
    /// the configured worker count. Hitting this is a scheduler bug.
    #[error("more compilation workers for stemcell '{stemcell}' than the configured limit ({limit})")]
    WorkerLimitExceeded { stemcell: String, limit: u32 },
}
