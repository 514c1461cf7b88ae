//! The **trial tree** (spec §4.D): a prefix-sharing tree over candidate
//! pipelines, pruned by API-level compatibility between consecutive stages,
//! with "already trained" nodes marked from prior workspace lineage so a
//! repeated pipeline can skip prefixes it has already executed.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crucible_errors::{CoreError, CoreResult};
use crucible_types::{BlobHash, MetaKey, Workspace};

/// An index into [`TrialTree::nodes`]. Only ever compared against nodes of
/// the tree that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub struct TrialNode {
    pub key: MetaKey,
    pub trained: bool,
    pub output: Option<BlobHash>,
    pub params: Option<BlobHash>,
    pub execution_time: Option<Duration>,
    pub io_time: Option<Duration>,
    pub storage_time: Option<Duration>,
    pub perf: Option<f64>,
    children: Vec<NodeId>,
}

/// What a training callback reports for one newly-executed node.
#[derive(Debug, Clone)]
pub struct TrainResult {
    pub output: BlobHash,
    pub params: BlobHash,
    pub execution_time: Duration,
    pub io_time: Duration,
    pub storage_time: Duration,
    pub perf: f64,
}

/// The tree itself: a synthetic root (not materialized as a node) fanning
/// out to the dataset candidates at position 0, through to library
/// candidates at the final position.
pub struct TrialTree {
    nodes: Vec<TrialNode>,
    roots: Vec<NodeId>,
    length: usize,
}

impl TrialTree {
    /// Builds a trial tree over `workspaces`, all of which must share one
    /// pipeline length. Empty input produces an empty tree (no candidate
    /// pipelines).
    pub fn build(workspaces: &[Workspace]) -> CoreResult<Self> {
        if workspaces.is_empty() {
            return Ok(Self { nodes: Vec::new(), roots: Vec::new(), length: 0 });
        }
        let length = workspaces[0].pipeline.len();
        for ws in workspaces {
            if ws.pipeline.len() != length {
                return Err(CoreError::InvariantViolation(format!(
                    "workspace {} has pipeline length {} but trial tree expects {length}",
                    ws.key,
                    ws.pipeline.len(),
                )));
            }
        }

        let stages = stage_dictionary(workspaces, length);
        let compat = compatibility_set(workspaces, length);

        let mut tree = Self { nodes: Vec::new(), roots: Vec::new(), length };
        for key in &stages[0] {
            let id = tree.push_node(key.clone(), true);
            tree.roots.push(id);
        }

        let mut frontier = tree.roots.clone();
        for stage in stages.iter().enumerate().skip(1) {
            let (i, candidates) = stage;
            let mut next_frontier = Vec::new();
            for parent_id in &frontier {
                let parent_key = tree.nodes[parent_id.0].key.clone();
                for candidate in candidates {
                    if compat.contains(&(parent_key.clone(), candidate.clone())) {
                        let child_id = tree.push_node(candidate.clone(), false);
                        tree.nodes[parent_id.0].children.push(child_id);
                        next_frontier.push(child_id);
                    }
                }
            }
            frontier = next_frontier;
            let _ = i;
        }

        tree.mark_trained(workspaces);
        Ok(tree)
    }

    fn push_node(&mut self, key: MetaKey, trained: bool) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(TrialNode {
            key,
            trained,
            output: None,
            params: None,
            execution_time: None,
            io_time: None,
            storage_time: None,
            perf: None,
            children: Vec::new(),
        });
        id
    }

    /// Walks every workspace with a non-empty `outputs`/`params` along its
    /// exact pipeline; every matched node becomes `trained = true` and
    /// records its artifact/params hash.
    fn mark_trained(&mut self, workspaces: &[Workspace]) {
        for ws in workspaces {
            if ws.is_untrained() {
                continue;
            }
            let Some(path) = self.find_exact_path(&ws.pipeline) else { continue };
            for (i, node_id) in path.iter().enumerate() {
                let stringified = ws.pipeline[i].to_string();
                let node = &mut self.nodes[node_id.0];
                node.trained = true;
                if let Some(h) = ws.outputs.get(&stringified) {
                    node.output = Some(*h);
                }
                if let Some(h) = ws.params.get(&stringified) {
                    node.params = Some(*h);
                }
            }
        }
    }

    /// Finds the single un-pruned path matching `pipeline` exactly, if one
    /// survived pruning.
    pub fn find_exact_path(&self, pipeline: &[MetaKey]) -> Option<Vec<NodeId>> {
        if pipeline.len() != self.length {
            return None;
        }
        let mut candidates = self.roots.clone();
        let mut path = Vec::with_capacity(self.length);
        for target in pipeline {
            let found = candidates.iter().find(|id| &self.nodes[id.0].key == target).copied()?;
            path.push(found);
            candidates = self.nodes[found.0].children.clone();
        }
        Some(path)
    }

    /// Every un-pruned root-to-leaf path, as a sequence of keys — the set
    /// of candidate pipelines the tree currently admits.
    pub fn paths(&self) -> Vec<Vec<MetaKey>> {
        let mut out = Vec::new();
        for &root in &self.roots {
            let mut current = vec![self.nodes[root.0].key.clone()];
            self.collect_paths(root, &mut current, &mut out);
        }
        out
    }

    fn collect_paths(&self, node_id: NodeId, current: &mut Vec<MetaKey>, out: &mut Vec<Vec<MetaKey>>) {
        let node = &self.nodes[node_id.0];
        if node.children.is_empty() {
            if current.len() == self.length {
                out.push(current.clone());
            }
            return;
        }
        for &child in &node.children {
            current.push(self.nodes[child.0].key.clone());
            self.collect_paths(child, current, out);
            current.pop();
        }
    }

    pub fn node(&self, id: NodeId) -> &TrialNode {
        &self.nodes[id.0]
    }

    /// Records `result` on `id` and marks it trained. For callers whose
    /// actual dispatch is async and so cannot be expressed as the plain
    /// synchronous callback [`TrialTree::train`] takes — they walk
    /// `find_exact_path` themselves, skip nodes already `trained`, and call
    /// this once their own dispatch/await-done round trip completes.
    pub fn mark_trained_with(&mut self, id: NodeId, result: TrainResult) {
        let node = &mut self.nodes[id.0];
        node.trained = true;
        node.output = Some(result.output);
        node.params = Some(result.params);
        node.execution_time = Some(result.execution_time);
        node.io_time = Some(result.io_time);
        node.storage_time = Some(result.storage_time);
        node.perf = Some(result.perf);
    }

    /// Runs `callback` for every node along every un-pruned path that has
    /// not already been marked trained, recording its reported metrics.
    /// Nodes already trained (including every dataset node, and any library
    /// node a prior workspace's lineage already covered) are skipped — this
    /// is what lets a repeated pipeline dispatch zero `execute` messages.
    pub fn train<F>(&mut self, mut callback: F) -> CoreResult<()>
    where
        F: FnMut(&[MetaKey]) -> CoreResult<TrainResult>,
    {
        let path_ids = self.collect_path_ids();
        for path in path_ids {
            let mut prefix = Vec::with_capacity(path.len());
            for node_id in path {
                prefix.push(self.nodes[node_id.0].key.clone());
                if self.nodes[node_id.0].trained {
                    continue;
                }
                let result = callback(&prefix)?;
                let node = &mut self.nodes[node_id.0];
                node.trained = true;
                node.output = Some(result.output);
                node.params = Some(result.params);
                node.execution_time = Some(result.execution_time);
                node.io_time = Some(result.io_time);
                node.storage_time = Some(result.storage_time);
                node.perf = Some(result.perf);
            }
        }
        Ok(())
    }

    fn collect_path_ids(&self) -> Vec<Vec<NodeId>> {
        let mut out = Vec::new();
        for &root in &self.roots {
            let mut current = vec![root];
            self.collect_path_ids_rec(root, &mut current, &mut out);
        }
        out
    }

    fn collect_path_ids_rec(&self, node_id: NodeId, current: &mut Vec<NodeId>, out: &mut Vec<Vec<NodeId>>) {
        let node = &self.nodes[node_id.0];
        if node.children.is_empty() {
            if current.len() == self.length {
                out.push(current.clone());
            }
            return;
        }
        for &child in &node.children {
            current.push(child);
            self.collect_path_ids_rec(child, current, out);
            current.pop();
        }
    }
}

fn stage_dictionary(workspaces: &[Workspace], length: usize) -> Vec<Vec<MetaKey>> {
    (0..length)
        .map(|i| {
            let mut seen = Vec::new();
            for ws in workspaces {
                let key = &ws.pipeline[i];
                if !seen.contains(key) {
                    seen.push(key.clone());
                }
            }
            seen
        })
        .collect()
}

/// Builds `C`: for each boundary `i`, group workspaces by `api(pipeline[i])`
/// and add the Cartesian product of that group's `S[i]` and `S[i+1]` keys.
/// This permits cross-mixing `inc` versions sharing an `api`, while blocking
/// any mix that crosses an `api` break.
fn compatibility_set(workspaces: &[Workspace], length: usize) -> HashSet<(MetaKey, MetaKey)> {
    let mut compat = HashSet::new();
    if length < 2 {
        return compat;
    }
    for i in 0..length - 1 {
        let mut groups: HashMap<u32, Vec<&Workspace>> = HashMap::new();
        for ws in workspaces {
            groups.entry(ws.pipeline[i].version.api).or_default().push(ws);
        }
        for group in groups.values() {
            let mut left = Vec::new();
            let mut right = Vec::new();
            for ws in group {
                let lk = &ws.pipeline[i];
                if !left.contains(lk) {
                    left.push(lk.clone());
                }
                let rk = &ws.pipeline[i + 1];
                if !right.contains(rk) {
                    right.push(rk.clone());
                }
            }
            for l in &left {
                for r in &right {
                    compat.insert((l.clone(), r.clone()));
                }
            }
        }
    }
    compat
}
