//! forge-cache — the two-tier compiled-package cache.
//!
//! Tier one is a per-deployment index of `CompiledPackage` records keyed
//! by `(package, dependency_key, stemcell)`, backed by redb. Tier two is
//! an optional global, deployment-independent cache addressed by
//! `(package name, cache_key)` behind the [`GlobalPackageCache`] trait.
//!
//! The [`PackageCache`] facade implements the lookup/store protocol: a
//! local miss falls through to the global tier, and a global hit is
//! materialized into the local index so later runs resolve locally.

pub mod cache;
pub mod error;
pub mod global;
pub mod store;
mod tables;

pub use cache::PackageCache;
pub use error::{CacheError, CacheResult};
pub use global::{GlobalEntry, GlobalPackageCache, InMemoryGlobalCache};
pub use store::CompiledPackageStore;
