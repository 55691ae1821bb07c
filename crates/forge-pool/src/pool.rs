//! CompilationPool — creates, reuses, and tears down compilation workers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use forge_core::{CompilationConfig, Stemcell, StemcellKey};

use crate::agent::{AgentClient, AgentClientFactory, AgentError, CompileOutcome, CompileRequest};
use crate::cloud::CloudProvider;
use crate::error::{PoolError, PoolResult};

/// A live compilation worker, bound to exactly one stemcell image.
pub struct Worker {
    cid: String,
    agent_id: String,
    stemcell: StemcellKey,
    agent: Arc<dyn AgentClient>,
}

impl Worker {
    pub fn cid(&self) -> &str {
        &self.cid
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn stemcell(&self) -> &StemcellKey {
        &self.stemcell
    }

    /// Run the remote compile RPC on this worker's agent.
    pub async fn compile_package(
        &self,
        request: &CompileRequest,
    ) -> Result<CompileOutcome, AgentError> {
        self.agent.compile_package(request).await
    }
}

#[derive(Default)]
struct PoolState {
    /// Idle reusable workers per stemcell.
    idle: HashMap<StemcellKey, VecDeque<Worker>>,
    /// Live (idle + checked out) worker count per stemcell.
    live: HashMap<StemcellKey, u32>,
    total: u32,
}

impl PoolState {
    fn live_for(&self, key: &StemcellKey) -> u32 {
        self.live.get(key).copied().unwrap_or(0)
    }

    fn reserve(&mut self, key: &StemcellKey) {
        *self.live.entry(key.clone()).or_insert(0) += 1;
        self.total += 1;
    }

    fn unreserve(&mut self, key: &StemcellKey) {
        if let Some(count) = self.live.get_mut(key) {
            *count = count.saturating_sub(1);
        }
        self.total = self.total.saturating_sub(1);
    }
}

/// Manages compilation workers across stemcells.
///
/// Pool membership is guarded by an internal lock distinct from any
/// compile lock — which worker runs a task is orthogonal to the task's
/// cache state.
pub struct CompilationPool {
    provider: Arc<dyn CloudProvider>,
    agents: Arc<dyn AgentClientFactory>,
    config: CompilationConfig,
    state: Mutex<PoolState>,
}

impl CompilationPool {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        agents: Arc<dyn AgentClientFactory>,
        config: CompilationConfig,
    ) -> Self {
        Self {
            provider,
            agents,
            config,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Hand out a worker for the given stemcell: an idle reusable worker
    /// when reuse is enabled and one exists, otherwise a freshly created
    /// one. Every prepared worker is re-tagged with `compiling` before it
    /// is returned.
    pub async fn prepare_worker(
        &self,
        stemcell: &Stemcell,
        compiling: &str,
    ) -> PoolResult<Worker> {
        let key = stemcell.key();

        if self.config.reuse_compilation_vms {
            let reused = {
                let mut state = self.state.lock().await;
                state.idle.get_mut(&key).and_then(VecDeque::pop_front)
            };
            if let Some(worker) = reused {
                info!(
                    cid = %worker.cid,
                    stemcell = %key,
                    "reusing compilation worker"
                );
                if let Err(e) = self.tag_worker(&worker, compiling).await {
                    self.tear_down(worker).await;
                    return Err(PoolError::Cloud(e));
                }
                return Ok(worker);
            }
        }

        {
            let mut state = self.state.lock().await;
            if self.config.reuse_compilation_vms && state.live_for(&key) >= self.config.workers {
                return Err(PoolError::WorkerLimitExceeded {
                    stemcell: key.to_string(),
                    limit: self.config.workers,
                });
            }
            state.reserve(&key);
        }

        match self.create_worker(stemcell, compiling).await {
            Ok(worker) => Ok(worker),
            Err(e) => {
                self.state.lock().await.unreserve(&key);
                Err(e)
            }
        }
    }

    /// Return a worker after its task. `reuse = true` parks it in the
    /// idle set (when reuse is configured); otherwise the worker is torn
    /// down synchronously. This runs on failure paths too — a worker is
    /// never left checked out.
    pub async fn release_worker(&self, worker: Worker, reuse: bool) {
        if reuse && self.config.reuse_compilation_vms {
            debug!(cid = %worker.cid, "returning compilation worker to the idle set");
            let mut state = self.state.lock().await;
            state
                .idle
                .entry(worker.stemcell.clone())
                .or_default()
                .push_back(worker);
        } else {
            self.tear_down(worker).await;
        }
    }

    /// Tear down all idle workers. Called once the run finishes, whether
    /// it succeeded or not.
    pub async fn drain(&self) {
        let idle: Vec<Worker> = {
            let mut state = self.state.lock().await;
            state.idle.drain().flat_map(|(_, q)| q).collect()
        };
        if idle.is_empty() {
            return;
        }
        info!(workers = idle.len(), "tearing down idle compilation workers");
        for worker in idle {
            self.tear_down(worker).await;
        }
    }

    /// Idle reusable workers for a stemcell.
    pub async fn idle_count(&self, stemcell: &StemcellKey) -> usize {
        self.state
            .lock()
            .await
            .idle
            .get(stemcell)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Live workers (idle + checked out) across all stemcells.
    pub async fn total_workers(&self) -> u32 {
        self.state.lock().await.total
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn create_worker(&self, stemcell: &Stemcell, compiling: &str) -> PoolResult<Worker> {
        let agent_id = Uuid::new_v4().to_string();
        info!(
            stemcell = %stemcell.desc(),
            %agent_id,
            "creating compilation worker"
        );

        let cid = self.create_vm_with_retries(&agent_id, stemcell).await?;
        let worker = Worker {
            cid,
            agent_id: agent_id.clone(),
            stemcell: stemcell.key(),
            agent: self.agents.client(&agent_id),
        };

        if let Err(e) = self.bring_up(&worker).await {
            // An unreachable agent leaves the worker in an unrecoverable
            // state; clean it up before propagating.
            warn!(cid = %worker.cid, error = %e, "agent bring-up failed, tearing worker down");
            self.tear_down(worker).await;
            return Err(PoolError::Agent(e));
        }
        if let Err(e) = self.tag_worker(&worker, compiling).await {
            self.tear_down(worker).await;
            return Err(PoolError::Cloud(e));
        }

        Ok(worker)
    }

    async fn create_vm_with_retries(
        &self,
        agent_id: &str,
        stemcell: &Stemcell,
    ) -> PoolResult<String> {
        let mut attempt = 1;
        loop {
            match self
                .provider
                .create_vm(
                    agent_id,
                    &stemcell.cid,
                    &self.config.cloud_properties,
                    &self.config.networks,
                    &self.config.env,
                )
                .await
            {
                Ok(cid) => {
                    debug!(%cid, attempt, "compilation vm created");
                    return Ok(cid);
                }
                Err(e) if e.retryable && attempt < self.config.max_vm_create_tries => {
                    warn!(
                        attempt,
                        max_tries = self.config.max_vm_create_tries,
                        error = %e,
                        "retryable vm creation failure"
                    );
                    attempt += 1;
                }
                Err(e) => {
                    return Err(PoolError::CreateVm { tries: attempt, source: e });
                }
            }
        }
    }

    async fn bring_up(&self, worker: &Worker) -> Result<(), AgentError> {
        worker.agent.wait_until_ready().await?;
        if let Some(certs) = &self.config.trusted_certs {
            worker.agent.update_settings(certs).await?;
        }
        worker.agent.apply(&self.initial_state(&worker.agent_id)).await
    }

    /// Minimal apply state for a compilation worker: no release job, just
    /// the deployment name and a synthetic `compilation-<id>` group.
    fn initial_state(&self, agent_id: &str) -> serde_json::Value {
        json!({
            "deployment": self.config.deployment,
            "job": { "name": format!("compilation-{agent_id}") },
            "index": 0,
            "id": agent_id,
            "networks": self.config.networks,
        })
    }

    async fn tag_worker(
        &self,
        worker: &Worker,
        compiling: &str,
    ) -> Result<(), crate::cloud::CloudError> {
        let mut metadata = self.config.tags.clone();
        metadata.insert("compiling".to_string(), compiling.to_string());
        self.provider.set_vm_metadata(&worker.cid, &metadata).await
    }

    /// Delete a worker's compute instance. Idempotent: deleting an
    /// already-gone instance logs and continues.
    async fn tear_down(&self, worker: Worker) {
        info!(cid = %worker.cid, "deleting compilation worker");
        if let Err(e) = self.provider.delete_vm(&worker.cid).await {
            warn!(cid = %worker.cid, error = %e, "failed to delete compilation worker, continuing");
        }
        self.state.lock().await.unreserve(&worker.stemcell);
    }
}
