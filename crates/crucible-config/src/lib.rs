//! The `CoordinatorConfig` knob surface (spec §6): every recognized option
//! as a `#[derive(Serialize, Deserialize)]` struct with a `#[serde(default
//! = "fn")]` per field, composed the way this codebase family groups its
//! own per-concern config sections (registry/retry/readiness/publish in the
//! shipper's own config crate).
//!
//! Loading a config file from a CLI-flag path is a host concern
//! (`crucible-cli`), not this crate's: this crate only turns a TOML string
//! into a validated `CoordinatorConfig`, or the other way around, and knows
//! nothing about the filesystem.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Everything a coordinator needs to run, assembled from TOML or defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub coordinator: CoordinatorSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub pac: PacSection,
    #[serde(default)]
    pub worker: WorkerSection,
}

impl CoordinatorConfig {
    /// Parses a `CoordinatorConfig` from an in-memory TOML document. Every
    /// field missing from `toml_str` falls back to its serde default, so
    /// `from_toml_str("")` is equivalent to `Default::default()`.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("parsing coordinator config TOML")
    }

    /// Serializes back to TOML, e.g. for a host to write out the effective
    /// config after CLI overrides are applied.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing coordinator config to TOML")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSection {
    pub host: String,
    pub worker_manager_port: u16,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), worker_manager_port: 9_009 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub default_num_slot: usize,
    pub enable_compatibility_check_on_caching: bool,
    pub enable_compatibility_check_on_new_worker: bool,
    #[serde(rename = "__debug_disable_level3_check")]
    pub debug_disable_level3_check: bool,
    #[serde(rename = "__debug_worker_creation_dry_run")]
    pub debug_worker_creation_dry_run: bool,
    #[serde(rename = "__debug_singleton_worker")]
    pub debug_singleton_worker: bool,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            default_num_slot: 4,
            enable_compatibility_check_on_caching: true,
            enable_compatibility_check_on_new_worker: true,
            debug_disable_level3_check: false,
            debug_worker_creation_dry_run: false,
            debug_singleton_worker: false,
        }
    }
}

/// Which physical store backs the abstract `StorageProvider` contract.
/// Only `Filesystem` has a reference implementation in this crate family
/// (`crucible-storage`); the other two are recognized config values for a
/// host that supplies its own `StorageProvider` impl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageEngine {
    Forkbase,
    Filesystem,
    Rdbms,
}

impl Default for StorageEngine {
    fn default() -> Self {
        StorageEngine::Filesystem
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub storage_engine: StorageEngine,
    /// Root directory for `StorageEngine::Filesystem`.
    pub filesystem_root: String,
    /// Connection string for `StorageEngine::Rdbms`; unused otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rdbms_url: Option<String>,
    /// Endpoint for `StorageEngine::Forkbase`; unused otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forkbase_endpoint: Option<String>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            storage_engine: StorageEngine::default(),
            filesystem_root: "./crucible-state/storage".to_string(),
            rdbms_url: None,
            forkbase_endpoint: None,
        }
    }
}

/// Which eviction policy governs the worker pool cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicyKind {
    Lru,
    Lfu,
    Fifo,
    Pac,
}

impl Default for CachePolicyKind {
    fn default() -> Self {
        CachePolicyKind::Lru
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub policy: CachePolicyKind,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self { policy: CachePolicyKind::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacSection {
    pub alpha: f64,
    pub history_capacity: usize,
    pub enable_sl: bool,
    pub enable_ul: bool,
}

impl Default for PacSection {
    fn default() -> Self {
        Self { alpha: 0.2, history_capacity: 50, enable_sl: true, enable_ul: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    /// How long `get_worker` waits for a freshly launched worker's `ready`
    /// announcement before treating the launch as failed.
    #[serde(with = "humantime_serde")]
    pub launch_timeout: Duration,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self { launch_timeout: Duration::from_secs(30) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_toml() {
        let config = CoordinatorConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        let parsed = CoordinatorConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn empty_document_yields_every_default() {
        let config = CoordinatorConfig::from_toml_str("").unwrap();
        assert_eq!(config, CoordinatorConfig::default());
    }

    #[test]
    fn partial_document_fills_missing_fields_with_defaults() {
        let toml_str = r#"
[scheduler]
default_num_slot = 8
__debug_singleton_worker = true
"#;
        let config = CoordinatorConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.scheduler.default_num_slot, 8);
        assert!(config.scheduler.debug_singleton_worker);
        assert!(config.scheduler.enable_compatibility_check_on_caching, "untouched fields keep their default");
        assert_eq!(config.pac.alpha, 0.2);
    }

    #[test]
    fn recognizes_the_pac_policy_and_knobs() {
        let toml_str = r#"
[cache]
policy = "pac"

[pac]
alpha = 0.35
history_capacity = 10
enable_ul = false
"#;
        let config = CoordinatorConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.cache.policy, CachePolicyKind::Pac);
        assert_eq!(config.pac.alpha, 0.35);
        assert!(!config.pac.enable_ul);
    }

    #[test]
    fn worker_launch_timeout_accepts_humantime_strings() {
        let toml_str = r#"
[worker]
launch_timeout = "45s"
"#;
        let config = CoordinatorConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.worker.launch_timeout, Duration::from_secs(45));
    }
}
