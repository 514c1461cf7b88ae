//! The error-kind taxonomy shared by the scheduler, coordinator, and storage
//! crates (spec §7). Each variant documents its own recovery policy; see
//! [`CoreError::is_locally_recoverable`] for the two kinds ([`CoreError::NotFound`]
//! and [`CoreError::Incompatible`]) the core layer is allowed to swallow
//! itself rather than propagate to the caller.

use thiserror::Error;

/// The taxonomy of errors that can arise anywhere in the coordinator core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad `SemanticVersion`/`MetaKey` text. Fails the operation; surfaced
    /// to the caller.
    #[error("parse error: {0}")]
    Parse(String),

    /// A VCS key/branch/hash was absent. Returned as a null result; callers
    /// often treat this as "start a fresh branch".
    #[error("not found: {0}")]
    NotFound(String),

    /// All active worker slots are occupied. Surfaced to the coordinator,
    /// which aborts the current pipeline; retryable on a later submission.
    #[error("worker pool full (slot_count exhausted)")]
    PoolFull,

    /// The external worker launcher failed. Aborts the pipeline.
    #[error("worker launch failed: {0}")]
    WorkerLaunchError(String),

    /// L1/L2/L3 compatibility failed for a `(worker, component)` pair. Not
    /// an error in the exceptional sense — it only rejects one specific
    /// reuse attempt; the scheduler tries the next worker or launches.
    #[error("worker incompatible with component: {0}")]
    Incompatible(String),

    /// The framed message channel to a worker closed or produced a
    /// malformed frame. The worker is marked poisoned and removed from the
    /// pool.
    #[error("worker channel error: {0}")]
    ChannelError(String),

    /// The physical storage provider's I/O failed. Propagated; no silent
    /// retry happens at the core layer.
    #[error("storage backend error: {0}")]
    StorageBackendError(String),

    /// A structural invariant was violated (pipeline length mismatch,
    /// malformed workspace meta, ...). Aborts the current operation and
    /// should be logged loudly — it indicates a bug, not bad input.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl CoreError {
    /// `true` for the two kinds the core layer may recover from locally
    /// without surfacing a failure to its own caller: [`CoreError::NotFound`]
    /// (treat as "first commit") and [`CoreError::Incompatible`] (skip this
    /// candidate and try the next one).
    pub fn is_locally_recoverable(&self) -> bool {
        matches!(self, CoreError::NotFound(_) | CoreError::Incompatible(_))
    }

    /// Whether this error should abort the pipeline currently in flight
    /// (as opposed to being recoverable, or merely rejecting one candidate).
    pub fn aborts_pipeline(&self) -> bool {
        matches!(
            self,
            CoreError::PoolFull
                | CoreError::WorkerLaunchError(_)
                | CoreError::InvariantViolation(_)
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_and_incompatible_are_locally_recoverable() {
        assert!(CoreError::NotFound("k".into()).is_locally_recoverable());
        assert!(CoreError::Incompatible("v".into()).is_locally_recoverable());
        assert!(!CoreError::PoolFull.is_locally_recoverable());
    }

    #[test]
    fn pool_full_and_launch_errors_abort_the_pipeline() {
        assert!(CoreError::PoolFull.aborts_pipeline());
        assert!(CoreError::WorkerLaunchError("boom".into()).aborts_pipeline());
        assert!(!CoreError::Incompatible("v".into()).aborts_pipeline());
    }
}
