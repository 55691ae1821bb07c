//! Compilation configuration.
//!
//! A single immutable struct passed at scheduler construction, resolved
//! from the deployment manifest's compilation block by the embedding
//! orchestrator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by [`CompilationConfig::validate`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("compilation workers must be greater than zero")]
    ZeroWorkers,

    #[error("max_vm_create_tries must be at least 1")]
    ZeroCreateTries,
}

/// Configuration for a compilation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationConfig {
    /// Deployment this run belongs to, used for worker tagging and the
    /// initial agent apply state.
    pub deployment: String,
    /// Upper bound on concurrently live compilation workers.
    pub workers: u32,
    /// Return workers to a per-stemcell idle set instead of destroying
    /// them after each task.
    pub reuse_compilation_vms: bool,
    /// How many times a retryable VM-creation failure is attempted before
    /// escalating.
    pub max_vm_create_tries: u32,
    /// Provider-specific properties forwarded verbatim to `create_vm`.
    pub cloud_properties: serde_json::Value,
    /// Network settings forwarded verbatim to `create_vm` and the agent
    /// apply state. Reservation itself happens upstream.
    pub networks: serde_json::Value,
    /// Environment forwarded verbatim to `create_vm`.
    pub env: serde_json::Value,
    /// Operator-visible tags applied to every worker's compute metadata.
    pub tags: HashMap<String, String>,
    /// Certificates pushed to freshly created agents, when configured.
    pub trusted_certs: Option<String>,
}

impl Default for CompilationConfig {
    fn default() -> Self {
        Self {
            deployment: String::new(),
            workers: 1,
            reuse_compilation_vms: false,
            max_vm_create_tries: 5,
            cloud_properties: serde_json::Value::Null,
            networks: serde_json::Value::Null,
            env: serde_json::Value::Null,
            tags: HashMap::new(),
            trusted_certs: None,
        }
    }
}

impl CompilationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.max_vm_create_tries == 0 {
            return Err(ConfigError::ZeroCreateTries);
        }
        Ok(())
    }
}
