use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blob::BlobHash;
use crate::meta_key::{ComponentType, MetaKey};
use crate::ParseError;

/// The role a dataset plays within a workspace's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetRole {
    Train,
    Validation,
    Inference,
}

/// A committed pipeline instance.
///
/// `outputs`/`params` being empty means the workspace has not been trained
/// yet; once non-empty the workspace is immutable — a retrain produces a new
/// [`MetaKey`] version, never a mutation of this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub key: MetaKey,
    pub pipeline: Vec<MetaKey>,
    pub datasets: BTreeMap<DatasetRole, MetaKey>,
    pub outputs: BTreeMap<String, BlobHash>,
    pub params: BTreeMap<String, BlobHash>,
    pub paths: BTreeMap<String, PathBuf>,
    pub created_timestamp: DateTime<Utc>,
}

/// Violations of the invariants a [`Workspace`] must uphold.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceInvariantError {
    #[error("workspace key {0} must have type=workspace")]
    KeyNotWorkspace(MetaKey),
    #[error("pipeline is empty; position 0 must be a dataset")]
    EmptyPipeline,
    #[error("pipeline[0] must be a dataset, got {0}")]
    FirstStageNotDataset(MetaKey),
    #[error("pipeline[{index}] must be a library, got {key}")]
    LaterStageNotLibrary { index: usize, key: MetaKey },
    #[error("outputs key {0:?} does not correspond to a stringified pipeline entry")]
    OutputsNotSubsetOfPipeline(String),
    #[error("params key {0:?} does not correspond to a stringified pipeline entry")]
    ParamsNotSubsetOfPipeline(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl Workspace {
    pub fn new(key: MetaKey, pipeline: Vec<MetaKey>) -> Self {
        Self {
            key,
            pipeline,
            datasets: BTreeMap::new(),
            outputs: BTreeMap::new(),
            params: BTreeMap::new(),
            paths: BTreeMap::new(),
            created_timestamp: Utc::now(),
        }
    }

    /// Checks §3's invariants: `pipeline[0].type == dataset`,
    /// `pipeline[i>=1].type == library`, and `outputs`/`params` keys are a
    /// subset of the pipeline's stringified entries.
    pub fn validate(&self) -> Result<(), WorkspaceInvariantError> {
        if self.key.kind != ComponentType::Workspace {
            return Err(WorkspaceInvariantError::KeyNotWorkspace(self.key.clone()));
        }
        let Some(first) = self.pipeline.first() else {
            return Err(WorkspaceInvariantError::EmptyPipeline);
        };
        if first.kind != ComponentType::Dataset {
            return Err(WorkspaceInvariantError::FirstStageNotDataset(first.clone()));
        }
        for (index, stage) in self.pipeline.iter().enumerate().skip(1) {
            if stage.kind != ComponentType::Library {
                return Err(WorkspaceInvariantError::LaterStageNotLibrary {
                    index,
                    key: stage.clone(),
                });
            }
        }
        let pipeline_strings: std::collections::HashSet<String> =
            self.pipeline.iter().map(|k| k.to_string()).collect();
        for key in self.outputs.keys() {
            if !pipeline_strings.contains(key) {
                return Err(WorkspaceInvariantError::OutputsNotSubsetOfPipeline(key.clone()));
            }
        }
        for key in self.params.keys() {
            if !pipeline_strings.contains(key) {
                return Err(WorkspaceInvariantError::ParamsNotSubsetOfPipeline(key.clone()));
            }
        }
        Ok(())
    }

    /// A workspace with no trained outputs at all.
    pub fn is_untrained(&self) -> bool {
        self.outputs.is_empty() && self.params.is_empty()
    }
}
