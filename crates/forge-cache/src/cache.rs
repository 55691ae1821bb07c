//! PackageCache — the tiered lookup/store protocol.

use std::sync::Arc;

use tracing::{debug, info};

use forge_core::{CompiledPackage, Package, Stemcell};

use crate::error::CacheResult;
use crate::global::{GlobalEntry, GlobalPackageCache};
use crate::store::CompiledPackageStore;

/// Two-tier compiled-package cache: the per-deployment index plus an
/// optional global tier.
#[derive(Clone)]
pub struct PackageCache {
    index: CompiledPackageStore,
    global: Option<Arc<dyn GlobalPackageCache>>,
}

impl PackageCache {
    pub fn new(index: CompiledPackageStore, global: Option<Arc<dyn GlobalPackageCache>>) -> Self {
        Self { index, global }
    }

    /// Resolve a task against both tiers.
    ///
    /// A local hit returns as-is. A global hit is materialized into the
    /// local index with a fresh build number so later runs and parallel
    /// deployments resolve locally. Callers hold the compile lock for the
    /// `(package, stemcell)` pair while mutating.
    pub async fn lookup(
        &self,
        package: &Package,
        stemcell: &Stemcell,
        dependency_key: &str,
        cache_key: &str,
    ) -> CacheResult<Option<CompiledPackage>> {
        if let Some(compiled) = self.index.find(package, stemcell, dependency_key)? {
            info!(
                package = %package.desc(),
                stemcell = %stemcell.desc(),
                "found compiled package in deployment index"
            );
            return Ok(Some(compiled));
        }

        let Some(global) = &self.global else {
            return Ok(None);
        };
        let Some(entry) = global.fetch(&package.name, cache_key).await? else {
            debug!(
                package = %package.desc(),
                stemcell = %stemcell.desc(),
                "package needs to be compiled"
            );
            return Ok(None);
        };

        info!(
            package = %package.desc(),
            stemcell = %stemcell.desc(),
            "found compiled package in global cache"
        );
        let build = self.index.next_build_number(package, stemcell)?;
        let compiled = CompiledPackage {
            package_name: package.name.clone(),
            package_version: package.version.clone(),
            package_fingerprint: package.fingerprint.clone(),
            stemcell_os: stemcell.operating_system.clone(),
            stemcell_version: stemcell.version.clone(),
            dependency_key: dependency_key.to_string(),
            build,
            sha1: entry.sha1,
            blobstore_id: entry.blobstore_id,
        };
        self.index.insert(&compiled)?;
        Ok(Some(compiled))
    }

    /// Record a freshly compiled package in the local index and, when the
    /// global tier is configured, push it there unless already present.
    /// The existence check happens immediately before the push and is not
    /// locked; a duplicate push of identical content is tolerated.
    pub async fn store(&self, compiled: &CompiledPackage, cache_key: &str) -> CacheResult<()> {
        self.index.insert(compiled)?;

        let Some(global) = &self.global else {
            debug!("global cache not configured, skipping upload");
            return Ok(());
        };
        if global.exists(&compiled.package_name, cache_key).await? {
            debug!(
                package = %compiled.package_name,
                "already exists in global cache, skipping upload"
            );
            return Ok(());
        }
        info!(package = %compiled.package_name, "uploading to global cache");
        global
            .save(
                &compiled.package_name,
                cache_key,
                GlobalEntry {
                    sha1: compiled.sha1.clone(),
                    blobstore_id: compiled.blobstore_id.clone(),
                },
            )
            .await
    }

    /// Allocate the next build number for `(package, stemcell)`.
    pub fn next_build_number(&self, package: &Package, stemcell: &Stemcell) -> CacheResult<u32> {
        self.index.next_build_number(package, stemcell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global::InMemoryGlobalCache;
    use std::collections::BTreeSet;

    fn package(name: &str) -> Package {
        Package {
            name: name.to_string(),
            version: "1".to_string(),
            fingerprint: format!("fp-{name}"),
            dependency_set: BTreeSet::new(),
            blobstore_id: format!("blob-{name}"),
            sha1: format!("sha1-{name}"),
        }
    }

    fn stemcell() -> Stemcell {
        Stemcell {
            name: "base-jammy".to_string(),
            operating_system: "ubuntu-jammy".to_string(),
            version: "1.95".to_string(),
            cid: "cid-jammy".to_string(),
            sha1: "stemcell-sha".to_string(),
        }
    }

    fn compiled(package: &Package, stemcell: &Stemcell, build: u32) -> CompiledPackage {
        CompiledPackage {
            package_name: package.name.clone(),
            package_version: package.version.clone(),
            package_fingerprint: package.fingerprint.clone(),
            stemcell_os: stemcell.operating_system.clone(),
            stemcell_version: stemcell.version.clone(),
            dependency_key: "dk".to_string(),
            build,
            sha1: "out-sha".to_string(),
            blobstore_id: "out-blob".to_string(),
        }
    }

    #[tokio::test]
    async fn local_hit_wins_without_touching_global() {
        let index = CompiledPackageStore::open_in_memory().unwrap();
        let global = Arc::new(InMemoryGlobalCache::new());
        let cache = PackageCache::new(index.clone(), Some(global.clone()));
        let pkg = package("ruby");
        let sc = stemcell();

        index.insert(&compiled(&pkg, &sc, 1)).unwrap();

        let found = cache.lookup(&pkg, &sc, "dk", "ck").await.unwrap().unwrap();
        assert_eq!(found.build, 1);
        assert!(global.is_empty());
    }

    #[tokio::test]
    async fn global_hit_is_materialized_locally() {
        let index = CompiledPackageStore::open_in_memory().unwrap();
        let global = Arc::new(InMemoryGlobalCache::new());
        global.put(
            "ruby",
            "ck",
            GlobalEntry {
                sha1: "global-sha".to_string(),
                blobstore_id: "global-blob".to_string(),
            },
        );
        let cache = PackageCache::new(index.clone(), Some(global));
        let pkg = package("ruby");
        let sc = stemcell();

        let found = cache.lookup(&pkg, &sc, "dk", "ck").await.unwrap().unwrap();
        assert_eq!(found.sha1, "global-sha");
        assert_eq!(found.build, 1);

        // Now present in the local index.
        assert_eq!(index.find(&pkg, &sc, "dk").unwrap(), Some(found));
    }

    #[tokio::test]
    async fn miss_without_global_tier_returns_none() {
        let index = CompiledPackageStore::open_in_memory().unwrap();
        let cache = PackageCache::new(index, None);
        let pkg = package("ruby");
        let sc = stemcell();

        assert!(cache.lookup(&pkg, &sc, "dk", "ck").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_pushes_to_global_only_once() {
        let index = CompiledPackageStore::open_in_memory().unwrap();
        let global = Arc::new(InMemoryGlobalCache::new());
        let cache = PackageCache::new(index, Some(global.clone()));
        let pkg = package("ruby");
        let sc = stemcell();

        cache.store(&compiled(&pkg, &sc, 1), "ck").await.unwrap();
        assert_eq!(global.len(), 1);

        // A second store of the same content finds the entry and skips
        // the push (still one entry either way).
        cache.store(&compiled(&pkg, &sc, 2), "ck").await.unwrap();
        assert_eq!(global.len(), 1);
    }
}
