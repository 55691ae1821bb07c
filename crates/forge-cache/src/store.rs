//! CompiledPackageStore — redb-backed per-deployment index.
//!
//! Holds one `CompiledPackage` record per `(package, dependency_key,
//! stemcell)` tuple plus the build-number sequence per `(package,
//! stemcell)`. Supports on-disk and in-memory backends (the latter for
//! testing). Mutations happen only under the compile lock for the
//! corresponding key, so the store itself needs no cross-process
//! coordination.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata};
use tracing::debug;

use forge_core::{CompiledPackage, Package, Stemcell};

use crate::error::{CacheError, CacheResult};
use crate::tables::{BUILD_NUMBERS, COMPILED_PACKAGES};

/// Convert any `Display` error into a `CacheError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| CacheError::$variant(e.to_string())
    };
}

/// Thread-safe compiled-package index backed by redb.
#[derive(Clone)]
pub struct CompiledPackageStore {
    db: Arc<Database>,
}

impl CompiledPackageStore {
    /// Open (or create) a persistent index at the given path.
    pub fn open(path: &Path) -> CacheResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "compiled-package index opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory index (for testing).
    pub fn open_in_memory() -> CacheResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory compiled-package index opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> CacheResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(COMPILED_PACKAGES).map_err(map_err!(Table))?;
        txn.open_table(BUILD_NUMBERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Look up the record for `(package, dependency_key, stemcell)`.
    pub fn find(
        &self,
        package: &Package,
        stemcell: &Stemcell,
        dependency_key: &str,
    ) -> CacheResult<Option<CompiledPackage>> {
        let key = record_key(package, stemcell, dependency_key);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(COMPILED_PACKAGES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let compiled: CompiledPackage =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(compiled))
            }
            None => Ok(None),
        }
    }

    /// Insert a compiled-package record. Writing an identical record twice
    /// is harmless; records are content-addressed by their key.
    pub fn insert(&self, compiled: &CompiledPackage) -> CacheResult<()> {
        let key = format!(
            "{}:{}:{}/{}:{}",
            compiled.package_name,
            compiled.package_fingerprint,
            compiled.stemcell_os,
            compiled.stemcell_version,
            compiled.dependency_key,
        );
        let value = serde_json::to_vec(compiled).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(COMPILED_PACKAGES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, build = compiled.build, "compiled package recorded");
        Ok(())
    }

    /// Allocate the next build number for `(package, stemcell)`. Starts at
    /// 1 and increments monotonically.
    pub fn next_build_number(&self, package: &Package, stemcell: &Stemcell) -> CacheResult<u32> {
        let key = build_key(package, stemcell);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let next;
        {
            let mut table = txn.open_table(BUILD_NUMBERS).map_err(map_err!(Table))?;
            let last = table
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|g| g.value())
                .unwrap_or(0);
            next = last + 1;
            table.insert(key.as_str(), next).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(next)
    }

    /// Number of records in the index.
    pub fn len(&self) -> CacheResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(COMPILED_PACKAGES).map_err(map_err!(Table))?;
        table.len().map_err(map_err!(Read))
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn record_key(package: &Package, stemcell: &Stemcell, dependency_key: &str) -> String {
    format!(
        "{}:{}:{}/{}:{}",
        package.name, package.fingerprint, stemcell.operating_system, stemcell.version, dependency_key,
    )
}

fn build_key(package: &Package, stemcell: &Stemcell) -> String {
    format!(
        "{}:{}:{}/{}",
        package.name, package.fingerprint, stemcell.operating_system, stemcell.version,
    )
}
