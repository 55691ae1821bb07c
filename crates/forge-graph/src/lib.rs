//! forge-graph — the compile-task graph.
//!
//! Turns instance groups into per-stemcell `CompileTask` nodes: one task
//! per `(package, stemcell)` pair, with immediate-dependency edges, a
//! memoized transitive closure per package, and content-derived
//! `dependency_key` / `cache_key` values. Cycles in the package dependency
//! graph are a release-configuration error and fail graph construction.

pub mod error;
pub mod graph;
pub mod task;

pub use error::{GraphError, GraphResult};
pub use graph::{TaskGraph, build_tasks};
pub use task::{CompileTask, TaskId};
