//! The **Semantic VCS** (spec §4.C): a two-level store built on
//! [`crucible_storage::StorageProvider`].
//!
//! - A **VersionMapping** string store keyed by
//!   `"<prefix>::VersionMapping::<type>::<name>::<branch.api.inc>"` whose
//!   branch-head payload is a blob hash.
//! - An **Entity** store (string or file, caller's choice) keyed by
//!   `"<prefix>::Entity::<type>::<name>"` whose branch heads hold the
//!   payload itself.
//!
//! `get_semantic_version` resolves a fully-versioned [`MetaKey`] by first
//! reading its hash out of VersionMapping, then fetching that hash from
//! Entity — so looking a version up never depends on it still being the
//! Entity branch's current head.

use std::sync::Arc;

use crucible_errors::{CoreError, CoreResult};
use crucible_storage::{EntryKind, Fetched, ForkSource, Locator, Payload, StorageProvider};
use crucible_types::{BlobHash, MetaKey};

/// One step of a [`SemanticVcs::lineage`] walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineageEntry {
    /// A single-parent commit.
    Commit(BlobHash),
    /// A merge commit with more than one parent. The walk stops here — per
    /// the source design, lineage traversal through merge ancestry is not
    /// implemented upstream and is left as a documented fault rather than
    /// guessed at (spec §9 open questions).
    MergeAncestor(BlobHash),
}

pub struct SemanticVcs {
    storage: Arc<dyn StorageProvider>,
    prefix: String,
}

impl SemanticVcs {
    pub fn new(storage: Arc<dyn StorageProvider>, prefix: impl Into<String>) -> Self {
        Self { storage, prefix: prefix.into() }
    }

    fn entity_key(&self, key: &MetaKey) -> String {
        format!("{}::Entity::{}::{}", self.prefix, key.kind, key.name)
    }

    fn version_mapping_key(&self, key: &MetaKey) -> String {
        format!("{}::VersionMapping::{}::{}::{}", self.prefix, key.kind, key.name, key.version)
    }

    /// Writes `payload` to Entity under `key`'s branch, then records the
    /// resulting hash in VersionMapping at `key`'s fully-versioned path.
    pub fn put(&self, key: &MetaKey, kind: EntryKind, payload: Payload) -> CoreResult<BlobHash> {
        let entity_key = self.entity_key(key);
        let hash = self.storage.put(&entity_key, &key.version.branch, kind, payload)?;
        let mapping_key = self.version_mapping_key(key);
        self.storage.put(
            &mapping_key,
            &key.version.branch,
            EntryKind::String,
            Payload::Bytes(hash.to_hex().into_bytes()),
        )?;
        Ok(hash)
    }

    /// The current Entity branch head for `key`'s `(type, name)`, ignoring
    /// `key.version` entirely.
    pub fn get_branch_head(&self, key: &MetaKey, kind: EntryKind) -> CoreResult<Fetched> {
        let entity_key = self.entity_key(key);
        self.storage.get(&entity_key, Locator::Branch(key.version.branch.clone()), kind)
    }

    /// Resolves `key`'s exact semantic version via VersionMapping, then
    /// fetches the payload from Entity by that hash.
    pub fn get_semantic_version(&self, key: &MetaKey, kind: EntryKind) -> CoreResult<Fetched> {
        let hash = self.resolve_version_hash(key)?;
        let entity_key = self.entity_key(key);
        self.storage.get(&entity_key, Locator::BranchHash(key.version.branch.clone(), hash), kind)
    }

    fn resolve_version_hash(&self, key: &MetaKey) -> CoreResult<BlobHash> {
        let mapping_key = self.version_mapping_key(key);
        let fetched = self
            .storage
            .get(&mapping_key, Locator::Branch(key.version.branch.clone()), EntryKind::String)
            .map_err(|e| match e {
                CoreError::NotFound(_) => CoreError::NotFound(format!("no VersionMapping entry for {key}")),
                other => other,
            })?;
        let Fetched::Bytes(bytes) = fetched else {
            return Err(CoreError::StorageBackendError("VersionMapping entry was not a string".into()));
        };
        let text = String::from_utf8(bytes)
            .map_err(|e| CoreError::StorageBackendError(format!("VersionMapping payload not utf8: {e}")))?;
        text.parse()
            .map_err(|e| CoreError::StorageBackendError(format!("VersionMapping payload not a hash: {e}")))
    }

    /// Resolves `key`'s exact semantic version hash, forks Entity to
    /// `new_branch` at that hash, and records the same hash in
    /// VersionMapping under the new branch (same api/inc, new branch name).
    pub fn branch_on_semantic_version(&self, key: &MetaKey, new_branch: &str) -> CoreResult<MetaKey> {
        let hash = self.resolve_version_hash(key)?;
        let entity_key = self.entity_key(key);
        self.storage.branch(&entity_key, new_branch, ForkSource::ReferHash(hash))?;

        let mut new_key = key.clone();
        new_key.version.branch = new_branch.to_string();
        let mapping_key = self.version_mapping_key(&new_key);
        self.storage.put(
            &mapping_key,
            new_branch,
            EntryKind::String,
            Payload::Bytes(hash.to_hex().into_bytes()),
        )?;
        Ok(new_key)
    }

    /// Three-way merges `merge_key`'s branch into `head_key`'s branch,
    /// recording the caller-resolved payload as the new head, and writes
    /// the resulting hash into VersionMapping under `new_head_key`.
    ///
    /// All three keys must share `(type, name)`; conflict resolution of the
    /// payload itself is the caller's responsibility.
    pub fn merge(
        &self,
        head_key: &MetaKey,
        merge_key: &MetaKey,
        new_head_key: &MetaKey,
        kind: EntryKind,
        resolved_payload: Payload,
    ) -> CoreResult<BlobHash> {
        if !head_key.type_name_equal_to(merge_key) || !head_key.type_name_equal_to(new_head_key) {
            return Err(CoreError::InvariantViolation(
                "merge requires head_key, merge_key, and new_head_key to share (type, name)".into(),
            ));
        }
        let entity_key = self.entity_key(head_key);
        let new_hash = self.storage.merge(
            &entity_key,
            &head_key.version.branch,
            &merge_key.version.branch,
            kind,
            resolved_payload,
        )?;
        let mapping_key = self.version_mapping_key(new_head_key);
        self.storage.put(
            &mapping_key,
            &new_head_key.version.branch,
            EntryKind::String,
            Payload::Bytes(new_hash.to_hex().into_bytes()),
        )?;
        Ok(new_hash)
    }

    /// Walks `parents` pointers from `key`'s branch head. Single-parent
    /// edges append to the returned lineage (newest first, matching the
    /// source's ordering); a merge node terminates the walk.
    ///
    /// Every step reads `PARENTS` scoped to `key`'s own branch
    /// ([`Locator::BranchHash`]), not by hash alone: a fork copies a
    /// branch's head hash onto the new branch with a fresh (empty)
    /// `PARENTS`, so the same hash has different parentage depending on
    /// which branch's copy is read. Resolving by hash alone would pick
    /// whichever branch happens to sort first among those sharing it,
    /// silently walking across the fork point on an unlucky branch name.
    pub fn lineage(&self, key: &MetaKey) -> CoreResult<Vec<LineageEntry>> {
        let entity_key = self.entity_key(key);
        let branch = key.version.branch.clone();
        let mut current = self.storage.head(&entity_key, &branch)?;
        let mut out = vec![LineageEntry::Commit(current)];
        loop {
            let parents = self.storage.meta(&entity_key, Locator::BranchHash(branch.clone(), current))?;
            match parents.as_slice() {
                [] => break,
                [single] => {
                    out.push(LineageEntry::Commit(*single));
                    current = *single;
                }
                _multi => {
                    out.push(LineageEntry::MergeAncestor(current));
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Fetches an Entity payload for `key`'s `(type, name)` by an exact
    /// content hash on `key`'s own branch, rather than by its current
    /// branch head — used to resolve [`lineage`](Self::lineage) entries,
    /// which record hashes rather than keys, scoped to the same branch
    /// `lineage` walked them on.
    pub fn get_entity_by_hash(&self, key: &MetaKey, hash: BlobHash, kind: EntryKind) -> CoreResult<Fetched> {
        let entity_key = self.entity_key(key);
        self.storage.get(&entity_key, Locator::BranchHash(key.version.branch.clone(), hash), kind)
    }

    pub fn list_components(&self) -> CoreResult<Vec<String>> {
        self.storage.list_keys()
    }

    pub fn list_branches(&self, key: &MetaKey) -> CoreResult<Vec<String>> {
        self.storage.list_branches(&self.entity_key(key))
    }

    /// Every known `branch.api.inc` version recorded for `key`'s
    /// `(type, name)`, scanned from the VersionMapping prefix.
    pub fn list_versions(&self, key: &MetaKey) -> CoreResult<Vec<String>> {
        let prefix = format!("{}::VersionMapping::{}::{}::", self.prefix, key.kind, key.name);
        Ok(self
            .storage
            .list_keys()?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}
