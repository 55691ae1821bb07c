//! forge-pool — the compilation instance pool.
//!
//! Manages ephemeral or reused compute workers per stemcell: creates a
//! worker bootstrapped with the stemcell image (with bounded retry on
//! retryable provider failures), brings its agent up, and either destroys
//! it after the task or returns it to a per-stemcell idle set. Teardown is
//! idempotent and runs on every exit path — leaked compute is a bug, not
//! an operational inconvenience.

pub mod agent;
pub mod cloud;
pub mod error;
pub mod pool;

pub use agent::{AgentClient, AgentClientFactory, AgentError, CompileOutcome, CompileRequest};
pub use cloud::{CloudError, CloudProvider};
pub use error::{PoolError, PoolResult};
pub use pool::{CompilationPool, Worker};
