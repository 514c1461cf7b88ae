use std::time::Instant;

use crate::manifest::Manifest;

/// Lifecycle state of one worker process, as tracked by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Launched, awaiting a `response_manifest`/ready announcement.
    Launching,
    /// Idle, warm, eligible for reuse.
    Cached,
    /// Dispatched a component and awaiting `done`.
    Active,
    /// Sent `exit`, awaiting process termination.
    Exiting,
}

/// Scheduler-owned bookkeeping for one live worker process.
///
/// A `WorkerHandle` is created at launch, mutated only by scheduler state
/// transitions ([`crate::WorkerState`] changes and `last_manifest` updates),
/// and destroyed at worker exit. It never outlives the process it describes.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub id: String,
    pub last_manifest: Option<Manifest>,
    pub state: WorkerState,
    pub last_used: Instant,
}

impl WorkerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            last_manifest: None,
            state: WorkerState::Launching,
            last_used: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub fn stamp_manifest(&mut self, manifest: Manifest) {
        self.last_manifest = Some(manifest);
        self.touch();
    }
}
