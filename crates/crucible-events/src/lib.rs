//! Append-only JSONL event logging for the coordinator.
//!
//! Grounded on this codebase family's publish-event log: an in-memory
//! `Vec` of typed events, appended to a JSONL file in `OpenOptions::new()
//! .create(true).append(true)` mode so a log surviving across process
//! restarts never loses earlier entries. The event type here is
//! `CoordinatorEvent` rather than a crates.io publish timeline, but the
//! read/write/record shape is otherwise unchanged.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default events file name, joined onto a coordinator's state directory.
pub const EVENTS_FILE: &str = "events.jsonl";

pub fn events_path(state_dir: &Path) -> PathBuf {
    state_dir.join(EVENTS_FILE)
}

/// One pipeline stage as announced at submission time: its stringified
/// `MetaKey` and the fresh `component_id` assigned to it for this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAnnouncement {
    pub key: String,
    pub component_id: Uuid,
}

/// Every scheduler/coordinator transition worth auditing after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CoordinatorEvent {
    /// The pipeline shape for a newly submitted workspace, stringified keys
    /// plus their per-run component ids.
    PipelineAnnounced { timestamp: DateTime<Utc>, workspace: String, stages: Vec<StageAnnouncement> },
    WorkerLaunched { timestamp: DateTime<Utc>, worker_id: String },
    WorkerCacheEvicted { timestamp: DateTime<Utc>, worker_id: String },
    ComponentDispatched { timestamp: DateTime<Utc>, component_id: Uuid, key: String, worker_id: String },
    ComponentDone { timestamp: DateTime<Utc>, component_id: Uuid, execution_time_ms: u64, io_time_ms: u64 },
    ComponentSkipped { timestamp: DateTime<Utc>, key: String },
    PipelineCommitted { timestamp: DateTime<Utc>, workspace: String, version: String },
    PipelineAborted { timestamp: DateTime<Utc>, workspace: String, reason: String },
    MergeStarted { timestamp: DateTime<Utc>, merge_key: String, base_key: String },
    MergeCommitted { timestamp: DateTime<Utc>, merge_key: String, version: String },
}

impl CoordinatorEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CoordinatorEvent::PipelineAnnounced { timestamp, .. }
            | CoordinatorEvent::WorkerLaunched { timestamp, .. }
            | CoordinatorEvent::WorkerCacheEvicted { timestamp, .. }
            | CoordinatorEvent::ComponentDispatched { timestamp, .. }
            | CoordinatorEvent::ComponentDone { timestamp, .. }
            | CoordinatorEvent::ComponentSkipped { timestamp, .. }
            | CoordinatorEvent::PipelineCommitted { timestamp, .. }
            | CoordinatorEvent::PipelineAborted { timestamp, .. }
            | CoordinatorEvent::MergeStarted { timestamp, .. }
            | CoordinatorEvent::MergeCommitted { timestamp, .. } => *timestamp,
        }
    }
}

/// An in-memory, append-only log of [`CoordinatorEvent`]s, flushable to a
/// JSONL file one line per event.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<CoordinatorEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, event: CoordinatorEvent) {
        self.events.push(event);
    }

    /// Appends every recorded event to `path`, one JSON object per line.
    /// Creates the file (and its parent directory) if absent; never
    /// truncates an existing log.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating events dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening events file {}", path.display()))?;
        let mut writer = std::io::BufWriter::new(file);
        for event in &self.events {
            let line = serde_json::to_string(event).context("serializing coordinator event")?;
            writeln!(writer, "{line}").context("writing event line")?;
        }
        writer.flush().context("flushing events file")?;
        Ok(())
    }

    /// Reads every event previously written to `path`. A missing file reads
    /// as an empty log rather than an error — a coordinator's first run has
    /// no events file yet.
    pub fn read_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let file = File::open(path).with_context(|| format!("opening events file {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line.with_context(|| format!("reading line from events file {}", path.display()))?;
            if line.is_empty() {
                continue;
            }
            let event: CoordinatorEvent =
                serde_json::from_str(&line).with_context(|| format!("parsing event JSON from line: {line}"))?;
            events.push(event);
        }
        Ok(Self { events })
    }

    pub fn all_events(&self) -> &[CoordinatorEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drops every recorded event without writing them. Used after a
    /// successful [`EventLog::write_to_file`] so the next flush only appends
    /// events recorded since the last one.
    pub fn clear(&mut self) {
        self.events.clear();
    }
}
