//! redb table definitions for the per-deployment compiled-package index.
//!
//! Keys are composite strings; values are JSON-serialized domain types.

use redb::TableDefinition;

/// Compiled packages keyed by
/// `{package_name}:{package_fingerprint}:{os}/{version}:{dependency_key}`.
pub const COMPILED_PACKAGES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("compiled_packages");

/// Last issued build number keyed by
/// `{package_name}:{package_fingerprint}:{os}/{version}`.
pub const BUILD_NUMBERS: TableDefinition<&str, u32> = TableDefinition::new("build_numbers");
