//! forge-scheduler — the package compilation step.
//!
//! [`PackageCompileStep`] drives a [`forge_graph::TaskGraph`] to
//! completion: tasks whose dependencies are resolved are dispatched to a
//! bounded set of concurrent compile attempts, each of which takes the
//! compile lock, re-checks the cache, and only then occupies a pool
//! worker for the remote compile RPC. Cancellation is cooperative and
//! checked between dispatches; in-flight compiles always run to
//! completion so no worker is abandoned.

pub mod error;
pub mod step;
pub mod tracker;

pub use error::{CompileStepError, CompileStepResult};
pub use step::PackageCompileStep;
pub use tracker::{NullTracker, TaskTracker};
