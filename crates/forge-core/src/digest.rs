//! Stable content digests for dependency and cache keys.
//!
//! Key derivation must be order-independent: the same dependency closure
//! always yields the same key, regardless of traversal order. Inputs are
//! sorted before hashing and separated by NUL bytes so concatenation
//! ambiguity cannot alias two different closures.

use sha2::{Digest, Sha256};

/// Hash over a transitive dependency closure's `(name, fingerprint)`
/// pairs. Detects when a dependency change requires recompilation even if
/// the package's own source is unchanged.
pub fn dependency_key(closure: &[(String, String)]) -> String {
    let mut pairs: Vec<&(String, String)> = closure.iter().collect();
    pairs.sort();

    let mut hasher = Sha256::new();
    for (name, fingerprint) in pairs {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(fingerprint.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Cache key: dependency key combined with the stemcell's content hash.
/// Two stemcells with different base images never share a cache entry,
/// even with identical dependency closures.
pub fn cache_key(dependency_key: &str, stemcell_sha1: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(dependency_key.as_bytes());
    hasher.update([0u8]);
    hasher.update(stemcell_sha1.as_bytes());
    hex::encode(hasher.finalize())
}
