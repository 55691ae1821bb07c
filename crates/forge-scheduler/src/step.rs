//! The package compilation step.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use forge_cache::PackageCache;
use forge_core::{CompilationConfig, CompiledPackage, DependencyEntry, Package, Stemcell};
use forge_graph::{TaskGraph, TaskId};
use forge_lock::{CompileLock, LockKey};
use forge_pool::{CompilationPool, CompileRequest, PoolError};

use crate::error::{CompileStepError, CompileStepResult};
use crate::tracker::TaskTracker;

/// Drives a task graph to completion against the pool and the cache.
///
/// Constructed per deployment run and consumed by [`perform`]. The graph
/// is only mutated here, on the driver loop; spawned compile attempts
/// work on snapshots and report back through their join handles.
///
/// [`perform`]: PackageCompileStep::perform
pub struct PackageCompileStep {
    graph: TaskGraph,
    pool: Arc<CompilationPool>,
    cache: PackageCache,
    lock: Arc<dyn CompileLock>,
    tracker: Arc<dyn TaskTracker>,
    workers: u32,
    compilations_performed: Arc<AtomicUsize>,
}

impl PackageCompileStep {
    pub fn new(
        graph: TaskGraph,
        pool: Arc<CompilationPool>,
        cache: PackageCache,
        lock: Arc<dyn CompileLock>,
        tracker: Arc<dyn TaskTracker>,
        config: &CompilationConfig,
    ) -> Self {
        Self {
            graph,
            pool,
            cache,
            lock,
            tracker,
            workers: config.workers,
            compilations_performed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of tasks in the graph, cached or not.
    pub fn compile_tasks_count(&self) -> usize {
        self.graph.len()
    }

    /// Compilations actually performed on a worker. Cache hits do not
    /// count.
    pub fn compilations_performed(&self) -> usize {
        self.compilations_performed.load(Ordering::SeqCst)
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Run the step: resolve every task in the graph, through the cache
    /// where possible and on a pool worker otherwise.
    ///
    /// On any exit path the pool's idle workers are drained, so a failed
    /// or cancelled run leaks no compute. Cancellation stops further
    /// dispatch but lets in-flight compiles finish and be recorded.
    pub async fn perform(&mut self) -> CompileStepResult<()> {
        if self.graph.is_empty() {
            info!("no packages to compile");
            return Ok(());
        }

        info!(tasks = self.graph.len(), "compiling packages");
        let result = self.run().await;
        self.pool.drain().await;
        result?;

        if self.compilations_performed() == 0 {
            info!("all packages were already compiled");
        } else {
            info!(
                performed = self.compilations_performed(),
                cached = self.graph.compiled_count() - self.compilations_performed(),
                "package compilation finished"
            );
        }
        Ok(())
    }

    async fn run(&mut self) -> CompileStepResult<()> {
        let mut ready: VecDeque<TaskId> = self.graph.ready_tasks().into();
        let mut in_flight: JoinSet<(TaskId, CompileStepResult<CompileOutput>)> = JoinSet::new();
        let mut failure: Option<CompileStepError> = None;
        let mut cancelled = false;

        loop {
            if !cancelled && self.tracker.cancelled() {
                info!("cancellation requested, draining in-flight compilations");
                cancelled = true;
            }

            while failure.is_none() && !cancelled && in_flight.len() < self.workers as usize {
                let Some(id) = ready.pop_front() else { break };
                match self.context_for(id) {
                    Ok(context) => {
                        debug!(task = %self.graph.task(id).desc(), "dispatching compile task");
                        in_flight.spawn(async move { (id, context.compile().await) });
                    }
                    Err(e) => {
                        // Keep draining in-flight compiles; aborting them
                        // would strand their workers.
                        failure = Some(e);
                    }
                }
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            match joined {
                Ok((id, Ok(output))) => {
                    if output.performed {
                        self.compilations_performed.fetch_add(1, Ordering::SeqCst);
                    }
                    let unblocked = self.graph.mark_compiled(id, output.compiled);
                    ready.extend(unblocked);
                    self.tracker.checkpoint();
                }
                Ok((id, Err(e))) => {
                    warn!(task = %self.graph.task(id).desc(), error = %e, "compile task failed");
                    failure.get_or_insert(e);
                }
                Err(join_error) => {
                    failure.get_or_insert(CompileStepError::TaskPanicked(join_error.to_string()));
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if cancelled && !self.graph.all_compiled() {
            return Err(CompileStepError::Cancelled);
        }
        Ok(())
    }

    /// Snapshot everything a compile attempt needs so it can run without
    /// touching the graph.
    fn context_for(&self, id: TaskId) -> CompileStepResult<TaskContext> {
        let task = self.graph.task(id);
        Ok(TaskContext {
            package: task.package().clone(),
            stemcell: task.stemcell().clone(),
            dependency_key: task.dependency_key().to_string(),
            cache_key: task.cache_key().to_string(),
            dependencies: self.graph.dependency_spec(id)?,
            pool: self.pool.clone(),
            cache: self.cache.clone(),
            lock: self.lock.clone(),
        })
    }
}

struct CompileOutput {
    compiled: CompiledPackage,
    /// False when the task resolved from the cache under the lock.
    performed: bool,
}

/// One compile attempt, detached from the graph.
struct TaskContext {
    package: Arc<Package>,
    stemcell: Arc<Stemcell>,
    dependency_key: String,
    cache_key: String,
    dependencies: HashMap<String, DependencyEntry>,
    pool: Arc<CompilationPool>,
    cache: PackageCache,
    lock: Arc<dyn CompileLock>,
}

impl TaskContext {
    /// Lock, re-check the cache, and compile on a worker if still needed.
    ///
    /// The lock is held for the whole attempt and released on drop, on
    /// every path. A concurrent run compiling the same artifact blocks
    /// here and then resolves from the cache re-check.
    async fn compile(self) -> CompileStepResult<CompileOutput> {
        let key = LockKey::new(
            &self.package.lock_id(),
            &self.stemcell.operating_system,
            &self.stemcell.version,
        );
        let _guard = self.lock.acquire(&key).await?;

        if let Some(compiled) = self
            .cache
            .lookup(&self.package, &self.stemcell, &self.dependency_key, &self.cache_key)
            .await?
        {
            return Ok(CompileOutput { compiled, performed: false });
        }

        let build = self.cache.next_build_number(&self.package, &self.stemcell)?;
        info!(
            package = %self.package.desc(),
            stemcell = %self.stemcell.desc(),
            build,
            "compiling package"
        );

        let worker = self
            .pool
            .prepare_worker(&self.stemcell, &self.package.name)
            .await
            .map_err(|e| self.failed(e))?;

        let request = CompileRequest {
            blobstore_id: self.package.blobstore_id.clone(),
            sha1: self.package.sha1.clone(),
            name: self.package.name.clone(),
            version: format!("{}.{}", self.package.version, build),
            dependencies: self.dependencies.clone(),
        };
        let outcome = match worker.compile_package(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The worker's state after a failed compile is unknown;
                // never return it to the idle set.
                self.pool.release_worker(worker, false).await;
                return Err(self.failed(PoolError::Agent(e)));
            }
        };

        let compiled = CompiledPackage {
            package_name: self.package.name.clone(),
            package_version: self.package.version.clone(),
            package_fingerprint: self.package.fingerprint.clone(),
            stemcell_os: self.stemcell.operating_system.clone(),
            stemcell_version: self.stemcell.version.clone(),
            dependency_key: self.dependency_key.clone(),
            build,
            sha1: outcome.sha1,
            blobstore_id: outcome.blobstore_id,
        };
        let stored = self.cache.store(&compiled, &self.cache_key).await;
        self.pool.release_worker(worker, true).await;
        stored?;

        Ok(CompileOutput { compiled, performed: true })
    }

    fn failed(&self, source: PoolError) -> CompileStepError {
        CompileStepError::CompileFailed {
            package: self.package.desc(),
            stemcell: self.stemcell.desc(),
            source,
        }
    }
}
