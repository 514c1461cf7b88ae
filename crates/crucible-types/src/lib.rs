//! # crucible-types
//!
//! Core domain types shared across the Crucible pipeline coordinator:
//! - [`SemanticVersion`] / [`MetaKey`] — value types identifying components.
//! - [`Manifest`] — the environment snapshot a worker reports for a component.
//! - [`Workspace`] — a committed pipeline instance with its trained outputs.
//! - [`WorkerHandle`] — scheduler-owned worker bookkeeping.
//! - [`ComponentInvocation`] — the command dispatched to a worker.
//! - [`BlobHash`] — the content address used by the storage layer.
//!
//! None of these types talk to the filesystem, a process, or the network;
//! they are pure value types plus the parsing/hashing rules the rest of the
//! workspace builds on.

mod blob;
mod invocation;
mod manifest;
mod meta_key;
mod semver;
mod worker;
mod workspace;

pub use blob::BlobHash;
pub use invocation::ComponentInvocation;
pub use manifest::Manifest;
pub use meta_key::{ComponentType, MetaKey};
pub use semver::SemanticVersion;
pub use worker::{WorkerHandle, WorkerState};
pub use workspace::{DatasetRole, Workspace};

/// Errors raised while parsing or validating the value types in this crate.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid semantic version {0:?}: expected \"<branch>.<api>.<inc>\"")]
    SemanticVersion(String),
    #[error("invalid meta key {0:?}: expected \"type::name\" or \"type::name::branch.api.inc\"")]
    MetaKey(String),
    #[error("invalid component type {0:?}: expected one of dataset, library, workspace, solution")]
    ComponentType(String),
}
