use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use crucible_errors::CoreResult;
use crucible_types::BlobHash;

use crate::{backend_error, not_found, EntryKind, Fetched, ForkSource, Locator, Payload, StorageProvider};

const NULL_PARENT: &str = "<null>";

/// A [`StorageProvider`] backed by the local filesystem, laid out exactly as
/// spec §6 describes:
///
/// ```text
/// <root>/<key>/<branch>/@HEAD          -- ascii hash of the current head
/// <root>/<key>/<branch>/<hash>/VALUE   -- the payload
/// <root>/<key>/<branch>/<hash>/PARENTS -- newline-separated ascii hashes, or "<null>"
/// ```
///
/// This is the one reference backend the core ships with; RDBMS and remote-KV
/// backends are specified only by the [`StorageProvider`] trait.
pub struct FilesystemStorageProvider {
    root: PathBuf,
    _lock: crucible_lock::LockGuard,
}

impl FilesystemStorageProvider {
    /// Opens (creating if absent) a storage root, taking an exclusive
    /// single-writer lock for the lifetime of the returned provider.
    pub fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let lock = crucible_lock::acquire(
            root.join(".storage.lock"),
            root.to_string_lossy().into_owned(),
            Duration::from_secs(300),
        )?;
        Ok(Self { root, _lock: lock })
    }

    fn key_dir(&self, key: &str) -> PathBuf {
        self.root.join(sanitize(key))
    }

    fn branch_dir(&self, key: &str, branch: &str) -> PathBuf {
        self.key_dir(key).join(sanitize(branch))
    }

    fn entry_dir(&self, key: &str, branch: &str, hash: &BlobHash) -> PathBuf {
        self.branch_dir(key, branch).join(hash.to_hex())
    }

    fn head_path(&self, key: &str, branch: &str) -> PathBuf {
        self.branch_dir(key, branch).join("@HEAD")
    }

    fn read_head(&self, key: &str, branch: &str) -> CoreResult<BlobHash> {
        let path = self.head_path(key, branch);
        let text = fs::read_to_string(&path)
            .map_err(|_| not_found(format!("no head for {key}@{branch}")))?;
        text.trim()
            .parse()
            .map_err(|e| backend_error(format!("corrupt head file {path:?}: {e}")))
    }

    /// Scans every branch under `key` for an entry matching `hash`. Used for
    /// hash-based lookups, which the trait allows to scan branches.
    fn find_branch_for_hash(&self, key: &str, hash: &BlobHash) -> CoreResult<String> {
        for branch in self.list_branches(key)? {
            if self.entry_dir(key, &branch, hash).join("VALUE").exists() {
                return Ok(branch);
            }
        }
        Err(not_found(format!("hash {hash} not found under any branch of {key}")))
    }

    fn write_entry(
        &self,
        key: &str,
        branch: &str,
        hash: &BlobHash,
        bytes: &[u8],
        parents: &[BlobHash],
    ) -> CoreResult<()> {
        let dir = self.entry_dir(key, branch, hash);
        fs::create_dir_all(&dir).map_err(|e| backend_error(e))?;
        fs::write(dir.join("VALUE"), bytes).map_err(|e| backend_error(e))?;
        let parents_text = if parents.is_empty() {
            NULL_PARENT.to_string()
        } else {
            parents.iter().map(|p| p.to_hex()).collect::<Vec<_>>().join("\n")
        };
        fs::write(dir.join("PARENTS"), parents_text).map_err(|e| backend_error(e))?;
        Ok(())
    }

    fn advance_head(&self, key: &str, branch: &str, hash: &BlobHash) -> CoreResult<()> {
        let path = self.head_path(key, branch);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| backend_error(e))?;
        }
        fs::write(&path, hash.to_hex()).map_err(|e| backend_error(e))?;
        Ok(())
    }
}

impl StorageProvider for FilesystemStorageProvider {
    fn get(&self, key: &str, locator: Locator, kind: EntryKind) -> CoreResult<Fetched> {
        let (branch, hash) = match locator {
            Locator::Branch(branch) => {
                let hash = self.read_head(key, &branch)?;
                (branch, hash)
            }
            Locator::Hash(hash) => {
                let branch = self.find_branch_for_hash(key, &hash)?;
                (branch, hash)
            }
            Locator::BranchHash(branch, hash) => (branch, hash),
        };
        let value_path = self.entry_dir(key, &branch, &hash).join("VALUE");
        if !value_path.exists() {
            return Err(not_found(format!("{key}@{branch}#{hash}")));
        }
        match kind {
            EntryKind::File => Ok(Fetched::Path(value_path)),
            EntryKind::String => {
                let bytes = fs::read(&value_path).map_err(|e| backend_error(e))?;
                Ok(Fetched::Bytes(bytes))
            }
        }
    }

    fn put(&self, key: &str, branch: &str, kind: EntryKind, value: Payload) -> CoreResult<BlobHash> {
        let bytes = match (&kind, &value) {
            (EntryKind::File, Payload::File(path)) => fs::read(path).map_err(|e| backend_error(e))?,
            (EntryKind::String, Payload::Bytes(b)) => b.clone(),
            _ => return Err(backend_error("EntryKind/Payload mismatch in put()")),
        };
        let previous = self.read_head(key, branch).ok();
        let salt = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let hash = BlobHash::compute(salt, key, branch, &bytes);
        let parents: Vec<BlobHash> = previous.into_iter().collect();
        self.write_entry(key, branch, &hash, &bytes, &parents)?;
        self.advance_head(key, branch, &hash)?;
        Ok(hash)
    }

    fn head(&self, key: &str, branch: &str) -> CoreResult<BlobHash> {
        self.read_head(key, branch)
    }

    fn branch(&self, key: &str, new_branch: &str, source: ForkSource) -> CoreResult<()> {
        let (source_branch, hash) = match source {
            ForkSource::BasedOnBranch(base) => {
                let hash = self.read_head(key, &base)?;
                (base, hash)
            }
            ForkSource::ReferHash(hash) => {
                let branch = self.find_branch_for_hash(key, &hash)?;
                (branch, hash)
            }
        };
        let src_dir = self.entry_dir(key, &source_branch, &hash);
        let dst_dir = self.entry_dir(key, new_branch, &hash);
        fs::create_dir_all(&dst_dir).map_err(|e| backend_error(e))?;
        fs::copy(src_dir.join("VALUE"), dst_dir.join("VALUE")).map_err(|e| backend_error(e))?;
        // A fork starts a new lineage root on `new_branch`: its PARENTS is
        // empty even though the *content* is shared with `source_branch`.
        // Lineage walks on the new branch must not reach back across the
        // fork point into the source branch's history.
        fs::write(dst_dir.join("PARENTS"), NULL_PARENT).map_err(|e| backend_error(e))?;
        self.advance_head(key, new_branch, &hash)?;
        Ok(())
    }

    fn list_keys(&self) -> CoreResult<Vec<String>> {
        list_dir_names(&self.root).map_err(|e| backend_error(e))
    }

    fn list_branches(&self, key: &str) -> CoreResult<Vec<String>> {
        let dir = self.key_dir(key);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        list_dir_names(&dir).map_err(|e| backend_error(e))
    }

    fn meta(&self, key: &str, locator: Locator) -> CoreResult<Vec<BlobHash>> {
        let (branch, hash) = match locator {
            Locator::Branch(branch) => {
                let hash = self.read_head(key, &branch)?;
                (branch, hash)
            }
            Locator::Hash(hash) => {
                let branch = self.find_branch_for_hash(key, &hash)?;
                (branch, hash)
            }
            Locator::BranchHash(branch, hash) => (branch, hash),
        };
        let parents_path = self.entry_dir(key, &branch, &hash).join("PARENTS");
        let text = fs::read_to_string(&parents_path).map_err(|e| backend_error(e))?;
        if text.trim() == NULL_PARENT {
            return Ok(Vec::new());
        }
        text.lines()
            .map(|l| l.trim().parse().map_err(|e| backend_error(format!("corrupt parents file: {e}"))))
            .collect()
    }

    fn merge(
        &self,
        key: &str,
        head_branch: &str,
        merge_branch: &str,
        kind: EntryKind,
        resolved_value: Payload,
    ) -> CoreResult<BlobHash> {
        let head_hash = self.read_head(key, head_branch)?;
        let merge_hash = self.read_head(key, merge_branch)?;
        let bytes = match (&kind, &resolved_value) {
            (EntryKind::File, Payload::File(path)) => fs::read(path).map_err(|e| backend_error(e))?,
            (EntryKind::String, Payload::Bytes(b)) => b.clone(),
            _ => return Err(backend_error("EntryKind/Payload mismatch in merge()")),
        };
        let salt = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let new_hash = BlobHash::compute(salt, key, head_branch, &bytes);
        self.write_entry(key, head_branch, &new_hash, &bytes, &[head_hash, merge_hash])?;
        self.advance_head(key, head_branch, &new_hash)?;
        Ok(new_hash)
    }
}

fn list_dir_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// `::` is a legal path component character on the filesystems this runs on
/// in practice, but we replace it defensively so storage roots remain
/// portable to backends (and OSes) that reserve it.
fn sanitize(segment: &str) -> String {
    segment.replace("::", "__")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> (tempfile::TempDir, FilesystemStorageProvider) {
        let dir = tempfile::tempdir().unwrap();
        let provider = FilesystemStorageProvider::open(dir.path()).unwrap();
        (dir, provider)
    }

    #[test]
    fn put_then_get_round_trips_and_advances_head() {
        let (_dir, store) = provider();
        let hash = store
            .put("library::svm", "master", EntryKind::String, Payload::Bytes(b"v1".to_vec()))
            .unwrap();
        assert_eq!(store.head("library::svm", "master").unwrap(), hash);
        let Fetched::Bytes(bytes) = store.get("library::svm", Locator::Branch("master".into()), EntryKind::String).unwrap() else {
            panic!("expected bytes");
        };
        assert_eq!(bytes, b"v1");
    }

    #[test]
    fn identical_payloads_get_distinct_hashes() {
        let (_dir, store) = provider();
        let h1 = store.put("k", "master", EntryKind::String, Payload::Bytes(b"same".to_vec())).unwrap();
        let h2 = store.put("k", "master", EntryKind::String, Payload::Bytes(b"same".to_vec())).unwrap();
        assert_ne!(h1, h2, "writes are never deduplicated (write-id semantics)");
    }

    #[test]
    fn never_written_branch_is_not_found_not_empty() {
        let (_dir, store) = provider();
        let err = store.head("k", "never-written").unwrap_err();
        assert!(matches!(err, crucible_errors::CoreError::NotFound(_)));
    }

    #[test]
    fn branch_fork_preserves_payload_and_new_branch_is_independent() {
        let (_dir, store) = provider();
        let h1 = store.put("k", "master", EntryKind::String, Payload::Bytes(b"v1".to_vec())).unwrap();
        store.branch("k", "dev", ForkSource::BasedOnBranch("master".into())).unwrap();
        assert_eq!(store.head("k", "dev").unwrap(), h1);
        store.put("k", "master", EntryKind::String, Payload::Bytes(b"v2".to_vec())).unwrap();
        assert_eq!(store.head("k", "dev").unwrap(), h1, "forked branch unaffected by later master writes");
    }

    #[test]
    fn meta_walks_one_parent_back() {
        let (_dir, store) = provider();
        let h1 = store.put("k", "master", EntryKind::String, Payload::Bytes(b"v1".to_vec())).unwrap();
        let h2 = store.put("k", "master", EntryKind::String, Payload::Bytes(b"v2".to_vec())).unwrap();
        let parents = store.meta("k", Locator::Hash(h2)).unwrap();
        assert_eq!(parents, vec![h1]);
        let root_parents = store.meta("k", Locator::Hash(h1)).unwrap();
        assert!(root_parents.is_empty());
    }
}
