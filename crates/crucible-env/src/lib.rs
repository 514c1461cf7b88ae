//! The `Env` record (design notes §9): this codebase family usually reaches
//! for a global singleton (config, logger, physical store) wired up once at
//! process start. Here those handles are instead bundled into one value
//! passed explicitly through the scheduler and coordinator constructors, so
//! a test can build an isolated `Env` pointed at a tempdir without any
//! process-global state to race or reset between cases.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use crucible_config::{CoordinatorConfig, StorageEngine};
use crucible_storage::{FilesystemStorageProvider, StorageProvider};

/// Provider handles a coordinator needs, built once per process (or per
/// test) from a [`CoordinatorConfig`].
pub struct Env {
    pub config: CoordinatorConfig,
    pub storage: Arc<dyn StorageProvider>,
    pub state_dir: PathBuf,
}

impl Env {
    pub fn new(config: CoordinatorConfig, storage: Arc<dyn StorageProvider>, state_dir: impl Into<PathBuf>) -> Self {
        Self { config, storage, state_dir: state_dir.into() }
    }

    /// Builds an `Env` whose `StorageProvider` is the filesystem reference
    /// implementation rooted at `config.storage.filesystem_root`. Any other
    /// configured `storage_engine` has no in-crate implementation, so this
    /// constructor is only valid for `StorageEngine::Filesystem`; a host
    /// wiring up ForkBase or an RDBMS must build its own `Arc<dyn
    /// StorageProvider>` and call [`Env::new`] directly.
    pub fn with_filesystem_storage(config: CoordinatorConfig, state_dir: impl Into<PathBuf>) -> Result<Self> {
        if config.storage.storage_engine != StorageEngine::Filesystem {
            bail!(
                "storage_engine {:?} has no built-in provider; construct its StorageProvider and use Env::new",
                config.storage.storage_engine
            );
        }
        let root = Path::new(&config.storage.filesystem_root);
        let storage = Arc::new(FilesystemStorageProvider::open(root)?);
        Ok(Self::new(config, storage, state_dir))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("lock")
    }

    pub fn events_path(&self) -> PathBuf {
        self.state_dir.join("events.jsonl")
    }
}
