//! Remote agent RPC interface.
//!
//! The agent runs inside each worker. The pool drives bring-up
//! (`wait_until_ready`, `update_settings`, `apply`); the scheduler issues
//! `compile_package`. Artifacts move by blobstore reference only — no
//! package bytes flow through this interface.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use forge_core::DependencyEntry;

/// Errors surfaced by the agent transport or the agent itself.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("timed out waiting for agent {agent_id} during {operation}")]
    Timeout { agent_id: String, operation: String },

    #[error("agent {agent_id} reported compile failure: {message}")]
    CompileFailed { agent_id: String, message: String },

    #[error("agent rpc error: {0}")]
    Rpc(String),
}

/// Arguments to the remote `compile_package` RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileRequest {
    /// Source artifact reference.
    pub blobstore_id: String,
    pub sha1: String,
    pub name: String,
    /// `"{package.version}.{build}"`.
    pub version: String,
    /// Immediate dependencies only, keyed by package name. The agent
    /// resolves further transitivity from its own package cache.
    pub dependencies: HashMap<String, DependencyEntry>,
}

/// Successful compile result: the output artifact reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOutcome {
    pub sha1: String,
    pub blobstore_id: String,
}

/// RPC client for one agent.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Block until the agent responds, bounded by the transport's RPC
    /// timeout.
    async fn wait_until_ready(&self) -> Result<(), AgentError>;

    /// Push trusted certificates to a freshly created agent.
    async fn update_settings(&self, trusted_certs: &str) -> Result<(), AgentError>;

    /// Apply an instance state. Compilation workers get a minimal state
    /// with no release job assigned.
    async fn apply(&self, state: &Value) -> Result<(), AgentError>;

    /// Compile one package remotely.
    async fn compile_package(&self, request: &CompileRequest)
    -> Result<CompileOutcome, AgentError>;
}

/// Creates an [`AgentClient`] for a given agent id over the messaging
/// transport.
pub trait AgentClientFactory: Send + Sync {
    fn client(&self, agent_id: &str) -> Arc<dyn AgentClient>;
}
