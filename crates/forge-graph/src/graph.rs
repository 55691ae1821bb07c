//! Task graph construction and bookkeeping.
//!
//! `build_tasks` walks every instance group's job templates and creates
//! one `CompileTask` per `(package, stemcell)` pair, wiring immediate
//! dependency edges in both directions. The transitive closure behind the
//! dependency key is computed once per package and memoized — it is a
//! property of the release, not of any particular stemcell.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info};

use forge_core::digest;
use forge_core::{CompiledPackage, DependencyEntry, InstanceGroup, Package, PackageSet, Stemcell, StemcellKey};

use crate::error::{GraphError, GraphResult};
use crate::task::{CompileTask, TaskId};

/// The per-run compile-task graph.
///
/// Tasks are identified by `(package name, stemcell)` and addressed by
/// opaque `TaskId`s. The graph is built once, then mutated only through
/// [`TaskGraph::mark_compiled`] as the scheduler resolves tasks.
#[derive(Debug, Default)]
pub struct TaskGraph {
    tasks: Vec<CompileTask>,
    index: HashMap<(String, StemcellKey), TaskId>,
}

impl TaskGraph {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, id: TaskId) -> &CompileTask {
        &self.tasks[id.0]
    }

    pub fn get(&self, package_name: &str, stemcell: &StemcellKey) -> Option<&CompileTask> {
        self.index
            .get(&(package_name.to_string(), stemcell.clone()))
            .map(|id| &self.tasks[id.0])
    }

    pub fn tasks(&self) -> impl Iterator<Item = &CompileTask> {
        self.tasks.iter()
    }

    /// Tasks eligible for dispatch: not yet compiled, with every immediate
    /// dependency resolved. By induction over the edges this implies the
    /// whole closure is resolved.
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| self.is_ready(t))
            .map(|t| t.id)
            .collect()
    }

    fn is_ready(&self, task: &CompileTask) -> bool {
        !task.is_compiled()
            && task
                .dependencies
                .iter()
                .all(|dep| self.tasks[dep.0].is_compiled())
    }

    pub fn all_compiled(&self) -> bool {
        self.tasks.iter().all(|t| t.is_compiled())
    }

    pub fn compiled_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_compiled()).count()
    }

    /// Record a task's compiled package and return the dependents that
    /// became ready as a result.
    pub fn mark_compiled(&mut self, id: TaskId, compiled: CompiledPackage) -> Vec<TaskId> {
        self.tasks[id.0].compiled = Some(compiled);

        let dependents = self.tasks[id.0].dependents.clone();
        let unblocked: Vec<TaskId> = dependents
            .into_iter()
            .filter(|dep| self.is_ready(&self.tasks[dep.0]))
            .collect();

        if !unblocked.is_empty() {
            debug!(
                task = %self.tasks[id.0].desc(),
                unblocked = unblocked.len(),
                "dependents became ready"
            );
        }
        unblocked
    }

    /// The immediate-dependency artifact references for a task's
    /// `compile_package` RPC. Fails if any immediate dependency has not
    /// been compiled yet.
    pub fn dependency_spec(&self, id: TaskId) -> GraphResult<HashMap<String, DependencyEntry>> {
        let task = &self.tasks[id.0];
        let mut spec = HashMap::with_capacity(task.dependencies.len());
        for dep_id in &task.dependencies {
            let dep = &self.tasks[dep_id.0];
            let compiled = dep.compiled().ok_or_else(|| GraphError::DependencyNotCompiled {
                name: dep.package.name.clone(),
            })?;
            spec.insert(
                dep.package.name.clone(),
                DependencyEntry::from_compiled(compiled),
            );
        }
        Ok(spec)
    }
}

/// Build the task graph for a set of instance groups.
///
/// `packages` resolves dependency names declared by each package; a name
/// that cannot be resolved is a release-configuration error, as is any
/// dependency cycle.
pub fn build_tasks(groups: &[InstanceGroup], packages: &PackageSet) -> GraphResult<TaskGraph> {
    let mut builder = Builder {
        packages,
        graph: TaskGraph::default(),
        closures: HashMap::new(),
    };

    for group in groups {
        info!(
            instance_group = %group.name,
            stemcell = %group.stemcell.desc(),
            templates = group.templates.len(),
            "collecting packages to compile"
        );
        for template in &group.templates {
            for package_name in &template.packages {
                let package = packages
                    .get(package_name)
                    .ok_or_else(|| GraphError::UnknownDependency {
                        name: package_name.clone(),
                        dependent: format!("{}/{}", template.release, template.name),
                    })?
                    .clone();
                builder.ensure_task(&package, &group.stemcell, &group.name)?;
            }
        }
    }

    Ok(builder.graph)
}

struct Builder<'a> {
    packages: &'a PackageSet,
    graph: TaskGraph,
    /// Package name → sorted `(name, fingerprint)` pairs of its transitive
    /// dependency closure. Stemcell-independent.
    closures: HashMap<String, Arc<Vec<(String, String)>>>,
}

impl Builder<'_> {
    fn ensure_task(
        &mut self,
        package: &Arc<Package>,
        stemcell: &Arc<Stemcell>,
        group: &str,
    ) -> GraphResult<TaskId> {
        let key = (package.name.clone(), stemcell.key());
        if let Some(&id) = self.graph.index.get(&key) {
            let task = &mut self.graph.tasks[id.0];
            if !task.jobs.iter().any(|j| j == group) {
                task.jobs.push(group.to_string());
            }
            return Ok(id);
        }

        let closure = self.closure(package, &mut Vec::new())?;
        let dependency_key = digest::dependency_key(&closure);
        let cache_key = digest::cache_key(&dependency_key, &stemcell.sha1);

        debug!(
            package = %package.desc(),
            stemcell = %stemcell.desc(),
            "created compile task"
        );

        let id = TaskId(self.graph.tasks.len());
        self.graph.tasks.push(CompileTask {
            id,
            package: package.clone(),
            stemcell: stemcell.clone(),
            dependency_key,
            cache_key,
            dependencies: Vec::new(),
            dependents: Vec::new(),
            compiled: None,
            jobs: vec![group.to_string()],
        });
        self.graph.index.insert(key, id);

        for dep_name in &package.dependency_set {
            let dep = self
                .packages
                .get(dep_name)
                .ok_or_else(|| GraphError::UnknownDependency {
                    name: dep_name.clone(),
                    dependent: package.name.clone(),
                })?
                .clone();
            let dep_id = self.ensure_task(&dep, stemcell, group)?;
            self.graph.tasks[id.0].dependencies.push(dep_id);
            self.graph.tasks[dep_id.0].dependents.push(id);
        }

        Ok(id)
    }

    /// Transitive dependency closure of `package`, excluding the package
    /// itself. A vanilla DFS with an explicit visiting stack for cycle
    /// detection, memoized per package name.
    fn closure(
        &mut self,
        package: &Arc<Package>,
        visiting: &mut Vec<String>,
    ) -> GraphResult<Arc<Vec<(String, String)>>> {
        if let Some(cached) = self.closures.get(&package.name) {
            return Ok(cached.clone());
        }
        if visiting.iter().any(|n| n == &package.name) {
            let mut cycle = visiting.clone();
            cycle.push(package.name.clone());
            return Err(GraphError::CircularDependency {
                package: package.name.clone(),
                cycle: cycle.join(" -> "),
            });
        }

        visiting.push(package.name.clone());
        let mut pairs: BTreeMap<String, String> = BTreeMap::new();
        for dep_name in &package.dependency_set {
            let dep = self
                .packages
                .get(dep_name)
                .ok_or_else(|| GraphError::UnknownDependency {
                    name: dep_name.clone(),
                    dependent: package.name.clone(),
                })?
                .clone();
            pairs.insert(dep.name.clone(), dep.fingerprint.clone());
            for (name, fingerprint) in self.closure(&dep, visiting)?.iter() {
                pairs.insert(name.clone(), fingerprint.clone());
            }
        }
        visiting.pop();

        let closure = Arc::new(pairs.into_iter().collect::<Vec<_>>());
        self.closures.insert(package.name.clone(), closure.clone());
        Ok(closure)
    }
}
