//! Shared fixtures and fakes for the scheduler integration tests.
//!
//! The fake stack mirrors the seams the scheduler is built against: a
//! [`MockCloud`] that tracks instance lifecycle (including the high-water
//! mark of concurrently live instances), a [`MockAgentHub`] whose agents
//! record every `compile_package` request in call order, and a
//! [`StaticTracker`] with a settable cancellation flag.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use serde_json::Value;

use forge_cache::{CompiledPackageStore, InMemoryGlobalCache, PackageCache};
use forge_core::{
    CompilationConfig, CompiledPackage, InstanceGroup, JobTemplate, Package, PackageSet, Stemcell,
    digest,
};
use forge_graph::build_tasks;
use forge_lock::InMemoryLockRegistry;
use forge_pool::{
    AgentClient, AgentClientFactory, AgentError, CloudError, CloudProvider, CompilationPool,
    CompileOutcome, CompileRequest,
};
use forge_scheduler::{PackageCompileStep, TaskTracker};

// ── Tracing setup ───────────────────────────────────────────────────

static TRACING_INIT: Once = Once::new();

/// Initialize a test tracing subscriber. Controlled by `RUST_LOG`; safe
/// to call from every test.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── Cloud fake ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockCloud {
    pub create_attempts: AtomicU32,
    created: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    metadata: Mutex<Vec<(String, HashMap<String, String>)>>,
    create_failures: Mutex<VecDeque<CloudError>>,
    live: AtomicI64,
    max_live: AtomicI64,
}

impl MockCloud {
    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn metadata(&self) -> Vec<(String, HashMap<String, String>)> {
        self.metadata.lock().unwrap().clone()
    }

    /// Highest number of instances alive at any one moment.
    pub fn max_live(&self) -> i64 {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Queue a failure for the next `create_vm` call.
    pub fn fail_next_create(&self, error: CloudError) {
        self.create_failures.lock().unwrap().push_back(error);
    }
}

#[async_trait::async_trait]
impl CloudProvider for MockCloud {
    async fn create_vm(
        &self,
        _agent_id: &str,
        _stemcell_cid: &str,
        _cloud_properties: &Value,
        _networks: &Value,
        _env: &Value,
    ) -> Result<String, CloudError> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.create_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let cid = {
            let mut created = self.created.lock().unwrap();
            let cid = format!("vm-{}", created.len() + 1);
            created.push(cid.clone());
            cid
        };
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(cid)
    }

    async fn delete_vm(&self, vm_cid: &str) -> Result<(), CloudError> {
        self.deleted.lock().unwrap().push(vm_cid.to_string());
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_vm_metadata(
        &self,
        vm_cid: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), CloudError> {
        self.metadata
            .lock()
            .unwrap()
            .push((vm_cid.to_string(), metadata.clone()));
        Ok(())
    }
}

// ── Agent fake ──────────────────────────────────────────────────────

/// Factory plus shared per-run agent state. Compile requests are recorded
/// in the order the agents received them.
#[derive(Default)]
pub struct MockAgentHub {
    requests: Mutex<Vec<CompileRequest>>,
    failing_packages: Mutex<HashSet<String>>,
}

impl MockAgentHub {
    pub fn requests(&self) -> Vec<CompileRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn compiled_names(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.name).collect()
    }

    /// Make every compile of `package` fail at the agent.
    pub fn fail_compiles_of(&self, package: &str) {
        self.failing_packages
            .lock()
            .unwrap()
            .insert(package.to_string());
    }
}

/// Factory handle handed to the pool; keeps the hub itself shareable with
/// the test body.
pub struct HubFactory(pub Arc<MockAgentHub>);

impl AgentClientFactory for HubFactory {
    fn client(&self, agent_id: &str) -> Arc<dyn AgentClient> {
        Arc::new(MockAgentClient {
            agent_id: agent_id.to_string(),
            hub: self.0.clone(),
        })
    }
}

struct MockAgentClient {
    agent_id: String,
    hub: Arc<MockAgentHub>,
}

#[async_trait::async_trait]
impl AgentClient for MockAgentClient {
    async fn wait_until_ready(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn update_settings(&self, _trusted_certs: &str) -> Result<(), AgentError> {
        Ok(())
    }

    async fn apply(&self, _state: &Value) -> Result<(), AgentError> {
        Ok(())
    }

    async fn compile_package(
        &self,
        request: &CompileRequest,
    ) -> Result<CompileOutcome, AgentError> {
        self.hub.requests.lock().unwrap().push(request.clone());
        if self
            .hub
            .failing_packages
            .lock()
            .unwrap()
            .contains(&request.name)
        {
            return Err(AgentError::CompileFailed {
                agent_id: self.agent_id.clone(),
                message: format!("packaging script for '{}' exited 1", request.name),
            });
        }
        Ok(CompileOutcome {
            sha1: format!("compiled-sha-{}", request.name),
            blobstore_id: format!("compiled-blob-{}", request.name),
        })
    }
}

// ── Tracker fake ────────────────────────────────────────────────────

pub struct StaticTracker {
    cancelled: AtomicBool,
    checkpoints: AtomicUsize,
    cancel_after: AtomicUsize,
}

impl Default for StaticTracker {
    fn default() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            checkpoints: AtomicUsize::new(0),
            cancel_after: AtomicUsize::new(usize::MAX),
        }
    }
}

impl StaticTracker {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Flip to cancelled once `n` checkpoints have been recorded, to
    /// observe cancellation while compiles are in flight.
    pub fn cancel_after_checkpoints(&self, n: usize) {
        self.cancel_after.store(n, Ordering::SeqCst);
    }

    pub fn checkpoints(&self) -> usize {
        self.checkpoints.load(Ordering::SeqCst)
    }
}

impl TaskTracker for StaticTracker {
    fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn checkpoint(&self) {
        let seen = self.checkpoints.fetch_add(1, Ordering::SeqCst) + 1;
        if seen >= self.cancel_after.load(Ordering::SeqCst) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

pub fn package(name: &str, deps: &[&str]) -> Package {
    Package {
        name: name.to_string(),
        version: "1".to_string(),
        fingerprint: format!("fp-{name}"),
        dependency_set: deps.iter().map(|d| d.to_string()).collect(),
        blobstore_id: format!("blob-{name}"),
        sha1: format!("src-sha-{name}"),
    }
}

pub fn stemcell() -> Arc<Stemcell> {
    Arc::new(Stemcell {
        name: "base-jammy".to_string(),
        operating_system: "ubuntu-jammy".to_string(),
        version: "1.95".to_string(),
        cid: "stemcell-cid".to_string(),
        sha1: "stemcell-sha".to_string(),
    })
}

pub fn group(name: &str, stemcell: &Arc<Stemcell>, packages: &[&str]) -> InstanceGroup {
    InstanceGroup {
        name: name.to_string(),
        stemcell: stemcell.clone(),
        templates: vec![JobTemplate {
            name: format!("{name}-job"),
            release: "test-release".to_string(),
            packages: packages.iter().map(|p| p.to_string()).collect(),
        }],
    }
}

pub fn config(workers: u32, reuse: bool) -> CompilationConfig {
    CompilationConfig {
        deployment: "mycloud".to_string(),
        workers,
        reuse_compilation_vms: reuse,
        max_vm_create_tries: 3,
        ..CompilationConfig::default()
    }
}

/// The dependency key a no-dependency package gets in the graph. Useful
/// for pre-seeding cache entries that must match graph-computed keys.
pub fn leaf_dependency_key() -> String {
    digest::dependency_key(&[])
}

pub fn leaf_cache_key(stemcell: &Stemcell) -> String {
    digest::cache_key(&leaf_dependency_key(), &stemcell.sha1)
}

/// A plausible pre-existing compiled record for a no-dependency package.
pub fn compiled_leaf(package: &Package, stemcell: &Stemcell, build: u32) -> CompiledPackage {
    CompiledPackage {
        package_name: package.name.clone(),
        package_version: package.version.clone(),
        package_fingerprint: package.fingerprint.clone(),
        stemcell_os: stemcell.operating_system.clone(),
        stemcell_version: stemcell.version.clone(),
        dependency_key: leaf_dependency_key(),
        build,
        sha1: format!("cached-sha-{}", package.name),
        blobstore_id: format!("cached-blob-{}", package.name),
    }
}

// ── Scenario ────────────────────────────────────────────────────────

/// Wires the fake stack around a [`PackageCompileStep`]. The cache index,
/// lock registry, and global tier outlive individual steps so tests can
/// run several steps (sequentially or concurrently) against the same
/// shared state, the way concurrent orchestrator runs share them.
pub struct Scenario {
    pub cloud: Arc<MockCloud>,
    pub hub: Arc<MockAgentHub>,
    pub index: CompiledPackageStore,
    pub locks: Arc<InMemoryLockRegistry>,
    pub global: Option<Arc<InMemoryGlobalCache>>,
    pub tracker: Arc<StaticTracker>,
    config: CompilationConfig,
}

impl Scenario {
    pub fn new(config: CompilationConfig) -> Self {
        init_tracing();
        Self {
            cloud: Arc::new(MockCloud::default()),
            hub: Arc::new(MockAgentHub::default()),
            index: CompiledPackageStore::open_in_memory().expect("in-memory index"),
            locks: Arc::new(InMemoryLockRegistry::new()),
            global: None,
            tracker: Arc::new(StaticTracker::default()),
            config,
        }
    }

    pub fn with_global(mut self) -> Self {
        self.global = Some(Arc::new(InMemoryGlobalCache::new()));
        self
    }

    pub fn global(&self) -> &Arc<InMemoryGlobalCache> {
        self.global.as_ref().expect("scenario has no global tier")
    }

    pub fn step(&self, groups: &[InstanceGroup], packages: &PackageSet) -> PackageCompileStep {
        let graph = build_tasks(groups, packages).expect("valid task graph");
        let pool = Arc::new(CompilationPool::new(
            self.cloud.clone(),
            Arc::new(HubFactory(self.hub.clone())),
            self.config.clone(),
        ));
        let cache = PackageCache::new(
            self.index.clone(),
            self.global
                .as_ref()
                .map(|g| g.clone() as Arc<dyn forge_cache::GlobalPackageCache>),
        );
        PackageCompileStep::new(
            graph,
            pool,
            cache,
            self.locks.clone(),
            self.tracker.clone(),
            &self.config,
        )
    }
}
