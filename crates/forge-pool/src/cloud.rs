//! Compute-provider interface.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// A provider failure. The provider adapter decides whether the failure
/// is transient; the pool never infers retryability from error identity.
#[derive(Debug, Clone, Error)]
#[error("cloud provider error: {message} (retryable: {retryable})")]
pub struct CloudError {
    pub retryable: bool,
    pub message: String,
}

impl CloudError {
    /// A transient infrastructure failure worth retrying.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self { retryable: true, message: message.into() }
    }

    /// A failure that retrying cannot fix.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self { retryable: false, message: message.into() }
    }
}

/// The cloud driver used to run compilation workers. Implementations live
/// outside this crate; the pool only drives the interface.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Create a compute instance booted from the stemcell image, returning
    /// its cid.
    async fn create_vm(
        &self,
        agent_id: &str,
        stemcell_cid: &str,
        cloud_properties: &Value,
        networks: &Value,
        env: &Value,
    ) -> Result<String, CloudError>;

    /// Delete a compute instance by cid.
    async fn delete_vm(&self, vm_cid: &str) -> Result<(), CloudError>;

    /// Replace the operator-visible metadata tags on an instance.
    async fn set_vm_metadata(
        &self,
        vm_cid: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), CloudError>;
}
