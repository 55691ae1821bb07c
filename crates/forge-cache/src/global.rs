//! Global compiled-package cache tier.
//!
//! Deployment-independent and content-addressed: entries are keyed by
//! `(package name, cache_key)` where the cache key already encodes the
//! dependency closure and the stemcell image. Writes of identical content
//! are idempotent, so the tier is used without locking — a duplicate push
//! from a concurrent deployment is benign.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CacheResult;

/// A global-cache entry: just the output artifact reference. Build numbers
/// and dependency keys are per-deployment notions and stay local.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalEntry {
    pub sha1: String,
    pub blobstore_id: String,
}

/// The global cache tier. Production backs this with a shared blobstore;
/// tests use [`InMemoryGlobalCache`].
#[async_trait]
pub trait GlobalPackageCache: Send + Sync {
    async fn exists(&self, package_name: &str, cache_key: &str) -> CacheResult<bool>;

    async fn fetch(&self, package_name: &str, cache_key: &str)
    -> CacheResult<Option<GlobalEntry>>;

    async fn save(&self, package_name: &str, cache_key: &str, entry: GlobalEntry)
    -> CacheResult<()>;
}

/// In-memory global cache for tests and single-node setups.
#[derive(Debug, Default)]
pub struct InMemoryGlobalCache {
    entries: Mutex<HashMap<(String, String), GlobalEntry>>,
}

impl InMemoryGlobalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seed an entry, for tests that start with a warm global cache.
    pub fn put(&self, package_name: &str, cache_key: &str, entry: GlobalEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((package_name.to_string(), cache_key.to_string()), entry);
    }
}

#[async_trait]
impl GlobalPackageCache for InMemoryGlobalCache {
    async fn exists(&self, package_name: &str, cache_key: &str) -> CacheResult<bool> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&(package_name.to_string(), cache_key.to_string())))
    }

    async fn fetch(
        &self,
        package_name: &str,
        cache_key: &str,
    ) -> CacheResult<Option<GlobalEntry>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(package_name.to_string(), cache_key.to_string()))
            .cloned())
    }

    async fn save(
        &self,
        package_name: &str,
        cache_key: &str,
        entry: GlobalEntry,
    ) -> CacheResult<()> {
        self.put(package_name, cache_key, entry);
        Ok(())
    }
}
