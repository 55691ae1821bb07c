//! forge-lock — the advisory compile lock.
//!
//! Two concurrent orchestrator runs sharing a release must not compile
//! the same `(package, stemcell)` artifact twice. The lock is named by a
//! typed [`LockKey`] and acquired through the injectable [`CompileLock`]
//! trait: production substitutes a DB-row or coordination-service
//! implementation, tests and single-node deployments use the in-process
//! [`InMemoryLockRegistry`].
//!
//! Acquisition blocks until the current holder releases. The returned
//! guard releases on drop, so the lock is released on every exit path.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Identifies the artifact being guarded: one lock per
/// `(package, stemcell os/version)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub package_id: String,
    pub stemcell_os: String,
    pub stemcell_version: String,
}

impl LockKey {
    pub fn new(package_id: &str, stemcell_os: &str, stemcell_version: &str) -> Self {
        Self {
            package_id: package_id.to_string(),
            stemcell_os: stemcell_os.to_string(),
            stemcell_version: stemcell_version.to_string(),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "compile:{}:{}/{}",
            self.package_id, self.stemcell_os, self.stemcell_version
        )
    }
}

/// Errors that can occur while acquiring a compile lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to acquire compile lock {key}: {reason}")]
    Acquire { key: String, reason: String },
}

pub type LockResult<T> = Result<T, LockError>;

/// Held lock. Dropping the guard releases the lock.
pub struct LockGuard {
    _held: Box<dyn std::any::Any + Send>,
}

impl LockGuard {
    pub fn new(held: impl std::any::Any + Send + 'static) -> Self {
        Self { _held: Box::new(held) }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").finish_non_exhaustive()
    }
}

/// Cluster-wide advisory lock provider.
#[async_trait]
pub trait CompileLock: Send + Sync {
    /// Block until the lock for `key` is acquired.
    async fn acquire(&self, key: &LockKey) -> LockResult<LockGuard>;
}

/// In-process lock registry: one `tokio::sync::Mutex` per key, created
/// lazily and never removed (the set of keys is bounded by the release's
/// package count).
#[derive(Debug, Default)]
pub struct InMemoryLockRegistry {
    locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl InMemoryLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CompileLock for InMemoryLockRegistry {
    async fn acquire(&self, key: &LockKey) -> LockResult<LockGuard> {
        let slot = {
            let mut locks = self.locks.lock().await;
            locks.entry(key.clone()).or_default().clone()
        };
        debug!(lock = %key, "acquiring compile lock");
        let held = slot.lock_owned().await;
        debug!(lock = %key, "compile lock acquired");
        Ok(LockGuard::new(held))
    }
}
