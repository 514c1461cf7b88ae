use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::meta_key::ComponentType;
use crate::semver::SemanticVersion;

/// A snapshot of a component's environment at execution time, as reported by
/// a worker in a `response_manifest` wire message.
///
/// `packages` is a `BTreeMap` rather than a `HashMap` so that the canonical
/// JSON fed into [`Manifest::recompute_packages_hash`] has a deterministic
/// key order — the hash invariant ("identical package sets and names produce
/// identical `packages_hash`") depends on that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ComponentType,
    pub version: SemanticVersion,
    pub packages: BTreeMap<String, String>,
    pub packages_semver: bool,
    #[serde(rename = "hash")]
    pub packages_hash: String,
    /// Free-form attributes a caller may attach without the core type
    /// growing new fields per use site (see design notes, "dynamic manifest
    /// attachment").
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub appendix: BTreeMap<String, String>,
}

impl Manifest {
    /// Builds a manifest and derives `packages_hash` from `name` + `packages`.
    pub fn new(
        name: impl Into<String>,
        kind: ComponentType,
        version: SemanticVersion,
        packages: BTreeMap<String, String>,
        packages_semver: bool,
    ) -> Self {
        let name = name.into();
        let packages_hash = Self::hash_packages(&name, &packages);
        Self {
            name,
            kind,
            version,
            packages,
            packages_semver,
            packages_hash,
            appendix: BTreeMap::new(),
        }
    }

    /// SHA-256 over the canonical JSON of `packages` with `name` appended as
    /// salt, hex-encoded.
    pub fn hash_packages(name: &str, packages: &BTreeMap<String, String>) -> String {
        let canonical = serde_json::to_vec(packages).expect("BTreeMap<String, String> always serializes");
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hasher.update(name.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Recomputes `packages_hash` in place after `packages` or `name` change.
    pub fn recompute_packages_hash(&mut self) {
        self.packages_hash = Self::hash_packages(&self.name, &self.packages);
    }

    /// Sets an appendix attribute, returning `self` for chaining.
    pub fn with_appendix(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.appendix.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packages() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("numpy".to_string(), "1.26.0".to_string()),
            ("scikit-learn".to_string(), "1.4.0".to_string()),
        ])
    }

    #[test]
    fn identical_name_and_packages_hash_identically() {
        let a = Manifest::new("fit-model", ComponentType::Library, SemanticVersion::zero(), packages(), true);
        let b = Manifest::new("fit-model", ComponentType::Library, SemanticVersion::new("master", 0, 1), packages(), false);
        assert_eq!(a.packages_hash, b.packages_hash, "version and flag must not affect the hash");
    }

    #[test]
    fn different_name_changes_the_hash() {
        let a = Manifest::new("fit-model", ComponentType::Library, SemanticVersion::zero(), packages(), true);
        let b = Manifest::new("other-model", ComponentType::Library, SemanticVersion::zero(), packages(), true);
        assert_ne!(a.packages_hash, b.packages_hash);
    }

    #[test]
    fn recompute_follows_mutation() {
        let mut m = Manifest::new("fit-model", ComponentType::Library, SemanticVersion::zero(), packages(), true);
        let before = m.packages_hash.clone();
        m.packages.insert("pandas".to_string(), "2.2.0".to_string());
        m.recompute_packages_hash();
        assert_ne!(before, m.packages_hash);
    }
}
