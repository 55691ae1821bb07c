//! Shared types used across Forge crates.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A source package from an uploaded release.
///
/// Immutable once fingerprinted — the fingerprint is a content hash over
/// the package's source inputs, so two packages with the same fingerprint
/// are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    /// Release-level version string (distinct from the fingerprint).
    pub version: String,
    /// Content hash over the package's source inputs.
    pub fingerprint: String,
    /// Names of packages this package requires directly.
    pub dependency_set: BTreeSet<String>,
    /// Source artifact reference in the blobstore.
    pub blobstore_id: String,
    pub sha1: String,
}

impl Package {
    /// Human-readable `name/version` identifier used in logs and errors.
    pub fn desc(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }

    /// Identity used for compile-lock scoping: name plus fingerprint, so
    /// renamed-but-identical packages never share a lock with a different
    /// package that happens to reuse the name.
    pub fn lock_id(&self) -> String {
        format!("{}-{}", self.name, self.fingerprint)
    }
}

/// A versioned base OS image, the binary-compatibility target for
/// compiled output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stemcell {
    pub name: String,
    pub operating_system: String,
    pub version: String,
    /// Compute-image identity understood by the cloud provider.
    pub cid: String,
    /// Content hash of the stemcell image.
    pub sha1: String,
}

impl Stemcell {
    pub fn desc(&self) -> String {
        format!("{}/{}", self.operating_system, self.version)
    }

    pub fn key(&self) -> StemcellKey {
        StemcellKey {
            operating_system: self.operating_system.clone(),
            version: self.version.clone(),
        }
    }
}

/// Hashable `(operating_system, version)` pair identifying a stemcell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StemcellKey {
    pub operating_system: String,
    pub version: String,
}

impl fmt::Display for StemcellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.operating_system, self.version)
    }
}

/// Immutable record of a successful compilation.
///
/// Written once per unique `(package, dependency_key, stemcell)` tuple;
/// never mutated, only superseded by a higher `build`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledPackage {
    pub package_name: String,
    pub package_version: String,
    pub package_fingerprint: String,
    pub stemcell_os: String,
    pub stemcell_version: String,
    /// Hash over the transitive dependency closure's fingerprints.
    pub dependency_key: String,
    /// Per-`(package, stemcell)` build sequence number.
    pub build: u32,
    /// Output artifact reference in the blobstore.
    pub sha1: String,
    pub blobstore_id: String,
}

impl CompiledPackage {
    /// The `version.build` string handed to agents when this record is
    /// referenced as a dependency.
    pub fn version_with_build(&self) -> String {
        format!("{}.{}", self.package_version, self.build)
    }
}

/// Immediate-dependency artifact reference passed to the remote
/// `compile_package` RPC. Immediate dependencies only — the agent resolves
/// further transitivity from its own package cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEntry {
    pub name: String,
    pub version: String,
    pub sha1: String,
    pub blobstore_id: String,
}

impl DependencyEntry {
    pub fn from_compiled(compiled: &CompiledPackage) -> Self {
        Self {
            name: compiled.package_name.clone(),
            version: compiled.version_with_build(),
            sha1: compiled.sha1.clone(),
            blobstore_id: compiled.blobstore_id.clone(),
        }
    }
}

/// A job template referenced by an instance group, naming the packages it
/// needs at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTemplate {
    pub name: String,
    pub release: String,
    pub packages: Vec<String>,
}

/// An instance group from the deployment manifest, already bound to a
/// stemcell. Manifest parsing happens upstream; Forge only consumes the
/// resolved form.
#[derive(Debug, Clone)]
pub struct InstanceGroup {
    pub name: String,
    pub stemcell: Arc<Stemcell>,
    pub templates: Vec<JobTemplate>,
}

/// Resolves package names to packages within a release version.
#[derive(Debug, Default, Clone)]
pub struct PackageSet {
    by_name: HashMap<String, Arc<Package>>,
}

impl PackageSet {
    pub fn new(packages: impl IntoIterator<Item = Package>) -> Self {
        let by_name = packages
            .into_iter()
            .map(|p| (p.name.clone(), Arc::new(p)))
            .collect();
        Self { by_name }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Package>> {
        self.by_name.get(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
