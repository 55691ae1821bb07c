//! Compile tasks — the unit of scheduling.

use std::sync::Arc;

use forge_core::{CompiledPackage, Package, Stemcell};

/// Opaque handle for a task within its [`TaskGraph`](crate::TaskGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub(crate) usize);

/// One package needing compilation for one stemcell.
///
/// Created while walking instance groups; discarded once the scheduling
/// run completes. Never persisted.
#[derive(Debug)]
pub struct CompileTask {
    pub(crate) id: TaskId,
    pub(crate) package: Arc<Package>,
    pub(crate) stemcell: Arc<Stemcell>,
    pub(crate) dependency_key: String,
    pub(crate) cache_key: String,
    /// Immediate dependencies only; transitivity is captured in the
    /// dependency key, not in edges.
    pub(crate) dependencies: Vec<TaskId>,
    pub(crate) dependents: Vec<TaskId>,
    pub(crate) compiled: Option<CompiledPackage>,
    /// Instance groups that need this package on this stemcell.
    pub(crate) jobs: Vec<String>,
}

impl CompileTask {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn package(&self) -> &Arc<Package> {
        &self.package
    }

    pub fn stemcell(&self) -> &Arc<Stemcell> {
        &self.stemcell
    }

    pub fn dependency_key(&self) -> &str {
        &self.dependency_key
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn dependencies(&self) -> &[TaskId] {
        &self.dependencies
    }

    pub fn dependents(&self) -> &[TaskId] {
        &self.dependents
    }

    pub fn compiled(&self) -> Option<&CompiledPackage> {
        self.compiled.as_ref()
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    pub fn jobs(&self) -> &[String] {
        &self.jobs
    }

    /// Human-readable description used in logs and errors.
    pub fn desc(&self) -> String {
        format!(
            "package '{}' for stemcell '{}'",
            self.package.desc(),
            self.stemcell.desc()
        )
    }
}
