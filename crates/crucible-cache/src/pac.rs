use std::collections::{HashSet, VecDeque};

use crucible_errors::{CoreError, CoreResult};

use crate::config::PacConfig;
use crate::matrix::{all_tracked_versions, Version, VersionScoreMatrix};

/// Sentinel score for a pipeline position with no cached worker at all,
/// matching the upstream implementation's literal value.
pub const NO_CANDIDATE_SCORE: f64 = 9999.0;

/// One cached worker, as seen by [`Pac::least_possible_worker`]. The cache
/// front-end ([`crucible_pool`](../crucible_pool/index.html), not a
/// dependency of this crate) owns the worker identity; this crate only
/// needs enough to locate and break ties among candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub worker_id: String,
    pub position: usize,
    pub version: Version,
}

/// The pipeline-aware cache model: one [`VersionScoreMatrix`] per pipeline
/// position plus a bounded history of previously submitted pipelines (spec
/// §4.F).
#[derive(Debug, Clone)]
pub struct Pac {
    config: PacConfig,
    vsm: Vec<VersionScoreMatrix>,
    history: VecDeque<Vec<Version>>,
}

impl Pac {
    pub fn new(config: PacConfig) -> Self {
        let vsm = (0..config.pipeline_length).map(|_| VersionScoreMatrix::uniform()).collect();
        let history = VecDeque::with_capacity(config.history_capacity.max(1));
        Self { config, vsm, history }
    }

    pub fn config(&self) -> &PacConfig {
        &self.config
    }

    pub fn pipeline_length(&self) -> usize {
        self.config.pipeline_length
    }

    pub fn vsm(&self, position: usize) -> &VersionScoreMatrix {
        &self.vsm[position]
    }

    /// Folds one newly submitted pipeline into the model: applies SL then UL
    /// (if enabled) against the history accumulated so far, then records the
    /// pipeline as the new most-recent history entry.
    pub fn submit_pipeline(&mut self, pipeline: &[Version]) -> CoreResult<()> {
        if pipeline.len() != self.config.pipeline_length {
            return Err(CoreError::InvariantViolation(format!(
                "pipeline has {} positions, PAC model tracks {}",
                pipeline.len(),
                self.config.pipeline_length
            )));
        }
        if self.config.enable_sl {
            self.apply_sl(pipeline);
        }
        if self.config.enable_ul {
            if let Some(previous) = self.history.back().cloned() {
                self.apply_ul(pipeline, &previous);
            }
        }
        self.push_history(pipeline.to_vec());
        Ok(())
    }

    /// "Stable-version learning": versions that never changed between
    /// `pipeline[k]` and any earlier pipeline at position `k` gain
    /// probability mass.
    fn apply_sl(&mut self, pipeline: &[Version]) {
        let all = all_tracked_versions();
        for (k, &current) in pipeline.iter().enumerate() {
            let mut differed: HashSet<Version> = HashSet::new();
            for past in &self.history {
                let historical = past[k];
                if historical != current {
                    differed.insert(historical);
                }
            }
            let stable: Vec<Version> = all.iter().copied().filter(|v| !differed.contains(v)).collect();
            self.vsm[k].scale_batch(self.config.alpha, &stable);
        }
    }

    /// "Update-direction learning": rewards positions that stayed put and
    /// extrapolates the next step along whichever single axis moved.
    fn apply_ul(&mut self, current: &[Version], previous: &[Version]) {
        let all = all_tracked_versions();
        for k in 0..current.len() {
            let (m1, n1) = current[k];
            let (m2, n2) = previous[k];
            let major_changed = m1 != m2;
            let minor_changed = n1 != n2;
            if major_changed == minor_changed {
                // Neither changed, or both did — UL has no opinion on this step.
                continue;
            }
            if k >= 1 {
                for i in 0..(k - 1) {
                    let stay_put = current[i];
                    let others: Vec<Version> = all.iter().copied().filter(|&v| v != stay_put).collect();
                    self.vsm[i].scale_batch(self.config.alpha, &others);
                }
            }
            if minor_changed {
                let extrapolated = 2 * n2 as i64 - n1 as i64;
                if (0..=crate::matrix::MAX_MINOR_VERSION as i64).contains(&extrapolated) {
                    self.vsm[k].scale_entry(self.config.alpha, (m1, extrapolated as u32));
                }
            } else {
                let extrapolated = 2 * m2 as i64 - m1 as i64;
                if (0..=crate::matrix::MAX_MAJOR_VERSION as i64).contains(&extrapolated) {
                    self.vsm[k].scale_entry(self.config.alpha, (extrapolated as u32, n1));
                }
            }
        }
    }

    fn push_history(&mut self, pipeline: Vec<Version>) {
        if self.history.len() == self.config.history_capacity.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(pipeline);
    }

    /// Picks the cached worker that minimizes expected future use (spec
    /// §4.F). Returns `None` only when `cached` is empty.
    ///
    /// For each position, walks that position's versions in ascending score
    /// order with its own pointer; at each step the position with the
    /// overall lowest current-pointer score (first index wins ties, empty
    /// positions score the [`NO_CANDIDATE_SCORE`] sentinel) is the
    /// candidate. If some cached worker matches that candidate's
    /// `(position, version)`, it is evicted; otherwise that position's
    /// pointer advances and the sweep continues.
    pub fn least_possible_worker(&self, cached: &[CachedEntry]) -> Option<String> {
        if cached.is_empty() {
            return None;
        }
        if cached.len() == 1 {
            return Some(cached[0].worker_id.clone());
        }
        let orders: Vec<Vec<Version>> = (0..self.pipeline_length()).map(|f| self.vsm[f].ascending_order()).collect();
        let mut pointers = vec![0usize; self.pipeline_length()];
        loop {
            let mut best_position = None;
            let mut best_score = f64::INFINITY;
            for f in 0..self.pipeline_length() {
                let num_workers = cached.iter().filter(|e| e.position == f).count();
                let score = if num_workers == 0 || pointers[f] >= orders[f].len() {
                    NO_CANDIDATE_SCORE
                } else {
                    self.vsm[f].get(orders[f][pointers[f]])
                };
                if score < best_score {
                    best_score = score;
                    best_position = Some(f);
                }
            }
            let f_star = best_position?;
            if pointers[f_star] >= orders[f_star].len() {
                return None;
            }
            let candidate_version = orders[f_star][pointers[f_star]];
            if let Some(entry) = cached.iter().find(|e| e.position == f_star && e.version == candidate_version) {
                return Some(entry.worker_id.clone());
            }
            pointers[f_star] += 1;
        }
    }
}
