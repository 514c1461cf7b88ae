//! The abstract **Storage Provider** contract (spec §4.B) plus a
//! filesystem-backed reference implementation.
//!
//! This crate deliberately knows nothing about semantic versions or
//! pipelines — it is a byte-keyed blob+branch store. `crucible-vcs` builds
//! the two-level, version-aware store on top of it.

mod filesystem;

pub use filesystem::FilesystemStorageProvider;

use crucible_errors::{CoreError, CoreResult};
use crucible_types::BlobHash;

/// Whether a stored entry's payload is an opaque byte string or a path to a
/// file on disk (e.g. a large dataset/library archive a caller would rather
/// stream than buffer in memory).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    String,
}

/// How to look up an entry: by a branch's current head, by an exact content
/// hash, or by a hash already known to belong to a specific branch.
#[derive(Debug, Clone)]
pub enum Locator {
    Branch(String),
    /// Looks the hash up by scanning every branch under the key and using
    /// whichever one contains it first (see
    /// [`crate::FilesystemStorageProvider`]'s branch ordering). Ambiguous
    /// once a fork shares content with its source branch — prefer
    /// [`Locator::BranchHash`] whenever the caller already knows the
    /// branch the hash was read from.
    Hash(BlobHash),
    /// A content hash scoped to the branch it was produced on. Reads that
    /// branch's own copy of the entry directly, with no cross-branch
    /// scanning — the only locator a lineage walk should use, since a fork
    /// copies a hash's `VALUE` into the new branch but gives it its own
    /// `PARENTS`, so the same hash resolves to different parentage
    /// depending on which branch's copy is read.
    BranchHash(String, BlobHash),
}

/// The payload supplied to [`StorageProvider::put`]/[`StorageProvider::merge`].
#[derive(Debug, Clone)]
pub enum Payload {
    File(std::path::PathBuf),
    Bytes(Vec<u8>),
}

/// The payload returned by [`StorageProvider::get`].
#[derive(Debug, Clone)]
pub enum Fetched {
    Path(std::path::PathBuf),
    Bytes(Vec<u8>),
}

/// How to fork a branch in [`StorageProvider::branch`].
#[derive(Debug, Clone)]
pub enum ForkSource {
    BasedOnBranch(String),
    ReferHash(BlobHash),
}

/// Abstract blob+branch store (spec §4.B). Implementations may be
/// single-writer (filesystem, RDBMS) or multi-writer with their own
/// branching (a remote versioned KV store); this trait does not assume
/// either.
pub trait StorageProvider: Send + Sync {
    /// Fetches an entry by branch head or by content hash. Returns
    /// [`CoreError::NotFound`] if the key/branch/hash combination has never
    /// been written.
    fn get(&self, key: &str, locator: Locator, kind: EntryKind) -> CoreResult<Fetched>;

    /// Writes `value` under `key`/`branch`, advancing that branch's head,
    /// and returns the new blob hash.
    fn put(&self, key: &str, branch: &str, kind: EntryKind, value: Payload) -> CoreResult<BlobHash>;

    /// The current head hash for `key`/`branch`.
    fn head(&self, key: &str, branch: &str) -> CoreResult<BlobHash>;

    /// Forks `new_branch` from an existing branch's head or from a specific
    /// hash.
    fn branch(&self, key: &str, new_branch: &str, source: ForkSource) -> CoreResult<()>;

    fn list_keys(&self) -> CoreResult<Vec<String>>;

    fn list_branches(&self, key: &str) -> CoreResult<Vec<String>>;

    /// Parent hashes recorded at commit time for the entry named by
    /// `locator` — lineage one step back. Multiple parents mean the entry is
    /// a merge commit.
    fn meta(&self, key: &str, locator: Locator) -> CoreResult<Vec<BlobHash>>;

    /// Three-way merges `merge_branch` into `head_branch`, recording
    /// `resolved_value` (supplied by the caller; conflict resolution is the
    /// caller's responsibility) as the new head of `head_branch`, with both
    /// prior heads recorded as parents.
    fn merge(
        &self,
        key: &str,
        head_branch: &str,
        merge_branch: &str,
        kind: EntryKind,
        resolved_value: Payload,
    ) -> CoreResult<BlobHash>;
}

pub(crate) fn not_found(what: impl std::fmt::Display) -> CoreError {
    CoreError::NotFound(what.to_string())
}

pub(crate) fn backend_error(what: impl std::fmt::Display) -> CoreError {
    CoreError::StorageBackendError(what.to_string())
}
