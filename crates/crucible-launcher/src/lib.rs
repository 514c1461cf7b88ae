//! The opaque worker-launcher contract the scheduler calls when it needs a
//! fresh worker process (spec §4.G step 4), plus a `tokio::process`-based
//! reference implementation (ambient; the core design treats "launch a new
//! worker" as an external call without specifying its mechanics).
//!
//! Grounded on the synchronous `std::process::Command` runner in this
//! codebase family's process-execution crate, translated to
//! `tokio::process` because the coordinator this launcher serves runs a
//! single-threaded cooperative event loop rather than blocking threads.

use std::future::Future;
use std::time::Duration;

use crucible_errors::{CoreError, CoreResult};

/// What a launch attempt actually did. The caller decides what to log and
/// whether/how to wait for the worker's `ready` announcement — this crate
/// only gets the process started (or, in dry-run mode, not).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The worker process was spawned.
    Spawned,
    /// `scheduler.__debug_worker_creation_dry_run` is set: the command that
    /// would have been run, for the caller to log.
    DryRun(String),
}

/// The contract the scheduler calls to start a new worker process for a
/// `worker_id` it has already decided on. Launching is fire-and-forget: the
/// worker announces itself later over the framed wire channel, re-entering
/// the scheduler through `on_worker_ready`.
pub trait WorkerLauncher {
    fn launch(&self, worker_id: &str) -> impl Future<Output = CoreResult<LaunchOutcome>> + Send;
}

/// `worker.launch_timeout` and the base command used to start a worker
/// process. The timeout itself is enforced by the caller racing the
/// worker's `ready` signal against a timer — this crate has no visibility
/// into the wire protocol, only into spawning the process.
#[derive(Debug, Clone)]
pub struct ProcessLauncherConfig {
    /// `argv[0]` and any fixed leading arguments; `worker_id` is appended.
    pub command: Vec<String>,
    pub launch_timeout: Duration,
    pub dry_run: bool,
}

impl Default for ProcessLauncherConfig {
    fn default() -> Self {
        Self {
            command: vec!["crucible-worker".to_string()],
            launch_timeout: Duration::from_secs(30),
            dry_run: false,
        }
    }
}

/// Launches a worker as a plain OS process via `tokio::process::Command`.
///
/// The spawned child is intentionally not awaited or reaped here: the
/// worker is a long-lived process that reports its own lifecycle over the
/// wire, and `tokio::process::Child` does not kill its child on drop unless
/// `kill_on_drop` is set (it isn't), so dropping the handle is safe.
pub struct ProcessLauncher {
    config: ProcessLauncherConfig,
}

impl ProcessLauncher {
    pub fn new(config: ProcessLauncherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProcessLauncherConfig {
        &self.config
    }
}

impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, worker_id: &str) -> CoreResult<LaunchOutcome> {
        let (program, leading_args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| CoreError::WorkerLaunchError("launcher command is empty".to_string()))?;

        if self.config.dry_run {
            let full = format!("{} {}", self.config.command.join(" "), worker_id);
            return Ok(LaunchOutcome::DryRun(full));
        }

        if which::which(program).is_err() {
            return Err(CoreError::WorkerLaunchError(format!("worker program {program:?} not found on PATH")));
        }

        let mut command = tokio::process::Command::new(program);
        command.args(leading_args).arg(worker_id);
        command
            .spawn()
            .map_err(|e| CoreError::WorkerLaunchError(format!("failed to spawn worker {worker_id}: {e}")))?;
        Ok(LaunchOutcome::Spawned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_reports_the_command_without_spawning() {
        let launcher = ProcessLauncher::new(ProcessLauncherConfig {
            command: vec!["crucible-worker".to_string(), "--fast".to_string()],
            dry_run: true,
            ..ProcessLauncherConfig::default()
        });
        let outcome = launcher.launch("worker-7").await.unwrap();
        assert_eq!(outcome, LaunchOutcome::DryRun("crucible-worker --fast worker-7".to_string()));
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let launcher = ProcessLauncher::new(ProcessLauncherConfig {
            command: vec!["this-binary-does-not-exist-xyz123".to_string()],
            ..ProcessLauncherConfig::default()
        });
        let err = launcher.launch("worker-1").await.unwrap_err();
        assert!(matches!(err, CoreError::WorkerLaunchError(_)));
    }

    #[tokio::test]
    async fn empty_command_is_a_launch_error() {
        let launcher = ProcessLauncher::new(ProcessLauncherConfig { command: vec![], ..ProcessLauncherConfig::default() });
        let err = launcher.launch("worker-1").await.unwrap_err();
        assert!(matches!(err, CoreError::WorkerLaunchError(_)));
    }

    #[tokio::test]
    async fn spawns_a_real_process_when_not_a_dry_run() {
        let launcher = ProcessLauncher::new(ProcessLauncherConfig {
            command: vec!["true".to_string()],
            ..ProcessLauncherConfig::default()
        });
        let outcome = launcher.launch("worker-1").await.unwrap();
        assert_eq!(outcome, LaunchOutcome::Spawned);
    }
}
