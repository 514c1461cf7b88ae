//! A single-instance-per-host advisory lock, guarding a coordinator's
//! on-disk state directory (or, reused by `crucible-storage`, a single
//! filesystem storage root) against a second process mutating it
//! concurrently.
//!
//! The lock file is written atomically (temp file + rename) and carries a
//! [`LockInfo`] payload so a competing process can report *who* holds the
//! lock. A lock older than its configured staleness timeout is treated as
//! abandoned and may be stolen — the prior owner is assumed to have crashed
//! without releasing it.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload recorded inside a lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
    /// Human-readable identifier for what is being locked, e.g. a workspace
    /// id or storage-root path. Purely informational.
    pub label: String,
}

impl LockInfo {
    fn current(label: impl Into<String>) -> Self {
        Self {
            pid: process::id(),
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
            acquired_at: Utc::now(),
            label: label.into(),
        }
    }
}

/// An RAII guard: the lock file is removed when this value is dropped.
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Acquires the lock at `path`, stealing it if the existing holder's
/// `acquired_at` is older than `stale_after`.
///
/// Returns an error if a live (non-stale) lock is already held.
pub fn acquire(path: impl AsRef<Path>, label: impl Into<String>, stale_after: Duration) -> Result<LockGuard> {
    let path = path.as_ref();
    if let Some(existing) = try_read(path)? {
        let age = Utc::now().signed_duration_since(existing.acquired_at);
        let age = age.to_std().unwrap_or(Duration::ZERO);
        if age < stale_after {
            bail!(
                "lock {:?} already held by pid {} on {} since {}",
                path,
                existing.pid,
                existing.hostname,
                existing.acquired_at
            );
        }
    }

    let info = LockInfo::current(label);
    let payload = serde_json::to_vec_pretty(&info).context("serializing lock info")?;
    let tmp_path = path.with_extension("tmp");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating lock dir {parent:?}"))?;
    }
    fs::write(&tmp_path, payload).with_context(|| format!("writing lock temp file {tmp_path:?}"))?;
    fs::rename(&tmp_path, path).with_context(|| format!("renaming lock file into place {path:?}"))?;
    Ok(LockGuard { path: path.to_path_buf() })
}

fn try_read(path: &Path) -> Result<Option<LockInfo>> {
    match fs::read(path) {
        Ok(bytes) => {
            let info = serde_json::from_slice(&bytes).context("parsing existing lock file")?;
            Ok(Some(info))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context("reading existing lock file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::thread;

    #[test]
    #[serial]
    fn acquires_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordinator.lock");
        {
            let _guard = acquire(&path, "ws-1", Duration::from_secs(60)).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists(), "guard drop should remove the lock file");
    }

    #[test]
    #[serial]
    fn rejects_concurrent_live_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordinator.lock");
        let _first = acquire(&path, "ws-1", Duration::from_secs(60)).unwrap();
        let second = acquire(&path, "ws-2", Duration::from_secs(60));
        assert!(second.is_err());
    }

    #[test]
    #[serial]
    fn steals_a_stale_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordinator.lock");
        let first = acquire(&path, "ws-1", Duration::from_millis(10)).unwrap();
        thread::sleep(Duration::from_millis(30));
        let second = acquire(&path, "ws-2", Duration::from_millis(10));
        assert!(second.is_ok());
        std::mem::forget(first); // avoid double-remove racing the test's own cleanup
    }
}
