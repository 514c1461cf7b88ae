//! The policy-agnostic worker pool cache (spec §4.E): two ordered
//! collections of worker handles, `active` and `cached`, plus whichever
//! eviction policy the coordinator configured for `cached`.
//!
//! Inheritance chains like the source's `BaseCache`/`LRUCache`/`PACache`
//! collapse here into one [`Policy`] sum type behind a single
//! [`WorkerPoolCache`] surface (design notes §9), rather than a trait object
//! per policy.

use std::collections::HashMap;

use crucible_cache::{CachedEntry, Pac, Version};
use crucible_errors::{CoreError, CoreResult};
use crucible_types::{Manifest, WorkerHandle, WorkerState};

/// Which eviction strategy governs `remove_end` on a [`WorkerPoolCache`].
pub enum Policy {
    /// Pop the least-recently-used cached entry.
    Lru,
    /// Pop the oldest insertion; hits never reorder it.
    Fifo,
    /// Pop the entry with minimum `frequency / age`.
    Lfu,
    /// Delegate to the pipeline-aware cache model; falls back to LRU for
    /// any cached worker the caller never tagged with a pipeline position.
    Pac(Pac),
}

#[derive(Debug, Clone, Copy)]
struct LfuEntry {
    frequency: u64,
    inserted_at_age: u64,
}

/// Two ordered worker-handle collections (`active`, `cached`) with an
/// admission invariant `|active| + |cached| ≤ slot_count` and a pluggable
/// eviction [`Policy`] for `cached`.
pub struct WorkerPoolCache {
    slot_count: usize,
    active: Vec<WorkerHandle>,
    cached: Vec<WorkerHandle>,
    policy: Policy,
    fifo_sequence: HashMap<String, u64>,
    fifo_counter: u64,
    lfu_state: HashMap<String, LfuEntry>,
    lfu_age_counter: u64,
    pac_tags: HashMap<String, (usize, Version)>,
}

impl WorkerPoolCache {
    pub fn new(slot_count: usize, policy: Policy) -> Self {
        Self {
            slot_count,
            active: Vec::new(),
            cached: Vec::new(),
            policy,
            fifo_sequence: HashMap::new(),
            fifo_counter: 0,
            lfu_state: HashMap::new(),
            lfu_age_counter: 0,
            pac_tags: HashMap::new(),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn cached_len(&self) -> usize {
        self.cached.len()
    }

    /// `|active| + |cached| < slot_count` — whether one more worker can be
    /// admitted without an eviction first (spec invariant 1).
    pub fn has_room(&self) -> bool {
        self.active.len() + self.cached.len() < self.slot_count
    }

    /// Registers the `(pipeline_position, version)` a cached worker serves.
    /// Only the PAC policy consults this; the scheduler calls it whenever a
    /// worker enters `cached` while PAC is active. A worker never tagged is
    /// invisible to PAC's model and only reachable through its LRU fallback.
    pub fn set_pac_tag(&mut self, id: &str, position: usize, version: Version) {
        self.pac_tags.insert(id.to_string(), (position, version));
    }

    /// Adds a freshly launched (or just-cached) worker into `cached`.
    pub fn add(&mut self, mut handle: WorkerHandle) {
        handle.state = WorkerState::Cached;
        handle.touch();
        self.fifo_counter += 1;
        self.fifo_sequence.insert(handle.id.clone(), self.fifo_counter);
        self.lfu_state
            .insert(handle.id.clone(), LfuEntry { frequency: 0, inserted_at_age: self.lfu_age_counter });
        self.cached.push(handle);
    }

    /// Looks up a worker by id in either set.
    pub fn get(&self, id: &str) -> Option<&WorkerHandle> {
        self.active.iter().chain(self.cached.iter()).find(|w| w.id == id)
    }

    /// Records a hit against `id`. LRU touches `last_used`; LFU increments
    /// both the entry's own frequency and the global age counter, which
    /// advances on every call here regardless of which entry was hit.
    pub fn record_hit(&mut self, id: &str) {
        self.lfu_age_counter += 1;
        if let Some(entry) = self.lfu_state.get_mut(id) {
            entry.frequency += 1;
        }
        if let Some(w) = self.active.iter_mut().chain(self.cached.iter_mut()).find(|w| w.id == id) {
            w.touch();
        }
    }

    /// Overwrites a worker's `last_manifest`, wherever it currently lives.
    pub fn stamp_manifest(&mut self, id: &str, manifest: Manifest) -> CoreResult<()> {
        let handle = self
            .active
            .iter_mut()
            .chain(self.cached.iter_mut())
            .find(|w| w.id == id)
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        handle.stamp_manifest(manifest);
        Ok(())
    }

    /// Moves a worker from `cached` to `active`.
    pub fn activate(&mut self, id: &str) -> CoreResult<WorkerHandle> {
        let index = self.cached.iter().position(|w| w.id == id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        let mut handle = self.cached.remove(index);
        handle.state = WorkerState::Active;
        handle.touch();
        let result = handle.clone();
        self.active.push(handle);
        Ok(result)
    }

    /// Moves a worker from `active` back to `cached`.
    pub fn cache(&mut self, id: &str) -> CoreResult<()> {
        let index = self.active.iter().position(|w| w.id == id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        let mut handle = self.active.remove(index);
        handle.state = WorkerState::Cached;
        handle.touch();
        self.cached.push(handle);
        Ok(())
    }

    /// Iterates `cached` in LRU order, least-recently-used first.
    pub fn iter_cached_lru_order(&self) -> impl Iterator<Item = &WorkerHandle> {
        let mut ordered: Vec<&WorkerHandle> = self.cached.iter().collect();
        ordered.sort_by_key(|w| w.last_used);
        ordered.into_iter()
    }

    /// Evicts and returns one worker from `cached`, chosen by the active
    /// [`Policy`]. With `worker_set_size = 0` `cached` is always empty, so
    /// this always returns `NotFound` — the degenerate boundary case the
    /// test suite exercises.
    pub fn remove_end(&mut self) -> CoreResult<WorkerHandle> {
        if self.cached.is_empty() {
            return Err(CoreError::NotFound("no cached worker to evict".to_string()));
        }
        let victim_id = match &self.policy {
            Policy::Lru => self.iter_cached_lru_order().next().map(|w| w.id.clone()),
            Policy::Fifo => self
                .cached
                .iter()
                .min_by_key(|w| self.fifo_sequence.get(&w.id).copied().unwrap_or(u64::MAX))
                .map(|w| w.id.clone()),
            Policy::Lfu => self.lfu_victim(),
            Policy::Pac(pac) => {
                self.pac_victim(pac).or_else(|| self.iter_cached_lru_order().next().map(|w| w.id.clone()))
            }
        };
        let victim_id = victim_id.ok_or_else(|| CoreError::NotFound("no cached worker to evict".to_string()))?;
        let index = self.cached.iter().position(|w| w.id == victim_id).expect("victim id was just selected from cached");
        let handle = self.cached.remove(index);
        self.fifo_sequence.remove(&handle.id);
        self.lfu_state.remove(&handle.id);
        self.pac_tags.remove(&handle.id);
        Ok(handle)
    }

    /// Minimum `frequency / age`, scanning with `<=` so the *last* entry
    /// scanned wins a tie (spec §4.E).
    fn lfu_victim(&self) -> Option<String> {
        let mut best: Option<(String, f64)> = None;
        for w in &self.cached {
            let entry = self
                .lfu_state
                .get(&w.id)
                .copied()
                .unwrap_or(LfuEntry { frequency: 0, inserted_at_age: self.lfu_age_counter });
            let age = self.lfu_age_counter.saturating_sub(entry.inserted_at_age).max(1);
            let score = entry.frequency as f64 / age as f64;
            let replace = match &best {
                None => true,
                Some((_, best_score)) => score <= *best_score,
            };
            if replace {
                best = Some((w.id.clone(), score));
            }
        }
        best.map(|(id, _)| id)
    }

    fn pac_victim(&self, pac: &Pac) -> Option<String> {
        let entries: Vec<CachedEntry> = self
            .cached
            .iter()
            .filter_map(|w| {
                let (position, version) = *self.pac_tags.get(&w.id)?;
                Some(CachedEntry { worker_id: w.id.clone(), position, version })
            })
            .collect();
        pac.least_possible_worker(&entries)
    }
}

#[cfg(test)]
mod tests {
    use crucible_cache::PacConfig;

    use super::*;

    fn handle(id: &str) -> WorkerHandle {
        WorkerHandle::new(id)
    }

    #[test]
    fn admission_invariant_tracks_both_sets() {
        let mut pool = WorkerPoolCache::new(2, Policy::Lru);
        assert!(pool.has_room());
        pool.add(handle("w1"));
        pool.add(handle("w2"));
        assert!(!pool.has_room());
        assert_eq!(pool.cached_len(), 2);
        assert_eq!(pool.active_len(), 0);
    }

    #[test]
    fn worker_set_size_zero_is_always_a_miss() {
        let mut pool = WorkerPoolCache::new(0, Policy::Lru);
        assert!(!pool.has_room());
        assert!(pool.get("anything").is_none());
        assert!(matches!(pool.remove_end(), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn activate_and_cache_move_between_sets() {
        let mut pool = WorkerPoolCache::new(2, Policy::Lru);
        pool.add(handle("w1"));
        pool.activate("w1").unwrap();
        assert_eq!(pool.active_len(), 1);
        assert_eq!(pool.cached_len(), 0);
        pool.cache("w1").unwrap();
        assert_eq!(pool.active_len(), 0);
        assert_eq!(pool.cached_len(), 1);
    }

    #[test]
    fn lru_evicts_the_least_recently_hit_entry() {
        let mut pool = WorkerPoolCache::new(3, Policy::Lru);
        pool.add(handle("old"));
        std::thread::sleep(std::time::Duration::from_millis(2));
        pool.add(handle("newer"));
        pool.record_hit("newer");
        let victim = pool.remove_end().unwrap();
        assert_eq!(victim.id, "old");
    }

    #[test]
    fn fifo_ignores_hits_and_evicts_the_oldest_insertion() {
        let mut pool = WorkerPoolCache::new(3, Policy::Fifo);
        pool.add(handle("first"));
        pool.add(handle("second"));
        pool.record_hit("first");
        let victim = pool.remove_end().unwrap();
        assert_eq!(victim.id, "first", "a hit must not reorder FIFO eviction order");
    }

    #[test]
    fn lfu_evicts_the_lowest_frequency_over_age_ratio() {
        let mut pool = WorkerPoolCache::new(3, Policy::Lfu);
        pool.add(handle("popular"));
        pool.add(handle("rare"));
        pool.record_hit("popular");
        pool.record_hit("popular");
        pool.record_hit("popular");
        let victim = pool.remove_end().unwrap();
        assert_eq!(victim.id, "rare");
    }

    #[test]
    fn pac_falls_back_to_lru_for_untagged_workers() {
        let pac = Pac::new(PacConfig { pipeline_length: 2, ..PacConfig::default() });
        let mut pool = WorkerPoolCache::new(3, Policy::Pac(pac));
        pool.add(handle("old"));
        std::thread::sleep(std::time::Duration::from_millis(2));
        pool.add(handle("newer"));
        // Neither worker is PAC-tagged, so eviction falls back to LRU.
        let victim = pool.remove_end().unwrap();
        assert_eq!(victim.id, "old");
    }

    #[test]
    fn pac_defers_to_the_model_for_tagged_workers() {
        let mut pac = Pac::new(PacConfig { pipeline_length: 2, ..PacConfig::default() });
        // Drive position 1's model so (0, 1) is clearly less probable than (0, 0).
        for _ in 0..5 {
            pac.submit_pipeline(&[(0, 0), (0, 0)]).unwrap();
        }
        let mut pool = WorkerPoolCache::new(3, Policy::Pac(pac));
        pool.add(handle("likely"));
        pool.set_pac_tag("likely", 1, (0, 0));
        pool.add(handle("unlikely"));
        pool.set_pac_tag("unlikely", 1, (0, 1));
        let victim = pool.remove_end().unwrap();
        assert_eq!(victim.id, "unlikely");
    }
}
