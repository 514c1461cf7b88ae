//! The scheduler: admission control, the three-level worker/component
//! compatibility check, and the `waiting` queue that bridges a launched
//! worker's eventual `ready` announcement back to the component it was
//! launched for (spec §4.G).
//!
//! This crate owns one [`crucible_pool::WorkerPoolCache`] (the source's
//! separate `active_workers`/`cached_workers` collections collapse into the
//! pool's own admission-tracked `active`/`cached` sets) plus the bookkeeping
//! the pool doesn't know about: workers launched but not yet announced
//! (`new_workers`), and components queued pending a worker (`waiting`).
//!
//! The source's callback-passing style (`get_worker(component, callback)`)
//! becomes a plain return value here: `get_worker` either hands back a
//! worker immediately or reports that the component is now queued, and
//! `on_worker_ready` returns the one waiting component (if any) that the
//! newly-ready worker should now run. The caller — the coordinator's event
//! loop — drives both ends; nothing in this crate stores a closure.

use std::collections::{BTreeMap, VecDeque};

use crucible_cache::Version;
use crucible_errors::{CoreError, CoreResult};
use crucible_launcher::WorkerLauncher;
use crucible_pool::{Policy, WorkerPoolCache};
use crucible_types::{Manifest, SemanticVersion, WorkerHandle};
use uuid::Uuid;

/// The identifying half of a component request — what `get_worker` is
/// trying to find (or have launched) a worker for. Carries its own
/// `component_id` so the coordinator can match a later dispatch back to
/// this request once a worker is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub component_id: Uuid,
    pub name: String,
    pub version: SemanticVersion,
    pub packages_hash: String,
    pub packages: BTreeMap<String, String>,
}

impl Component {
    pub fn from_manifest(component_id: Uuid, manifest: &Manifest) -> Self {
        Self {
            component_id,
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            packages_hash: manifest.packages_hash.clone(),
            packages: manifest.packages.clone(),
        }
    }
}

/// The `scheduler.*` configuration knobs (spec §6).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub slot_count: usize,
    pub enable_compatibility_check_on_caching: bool,
    pub enable_compatibility_check_on_new_worker: bool,
    pub debug_disable_level3_check: bool,
    pub debug_worker_creation_dry_run: bool,
    pub debug_singleton_worker: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slot_count: 4,
            enable_compatibility_check_on_caching: true,
            enable_compatibility_check_on_new_worker: true,
            debug_disable_level3_check: false,
            debug_worker_creation_dry_run: false,
            debug_singleton_worker: false,
        }
    }
}

/// What `get_worker` did with a component request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetWorkerOutcome {
    /// A compatible (or, in singleton mode, any) cached worker was found
    /// and activated; the caller may dispatch the component now.
    Ready(String),
    /// No usable worker was cached. A new one was launched under
    /// `worker_id` and the component is queued in `waiting`; the caller
    /// learns the assignment later through [`Scheduler::on_worker_ready`].
    Launching(String),
}

/// The full result of a `get_worker` call, including any cached worker that
/// had to be evicted to make room for the launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetWorkerResult {
    pub outcome: GetWorkerOutcome,
    /// Set when admission required evicting a cached worker first. The
    /// caller (coordinator) uses this to release any external resources it
    /// keyed to the evicted worker's id — `on_cache_full` in the source.
    pub evicted: Option<String>,
}

/// Three-level compatibility check between a worker's last-known manifest
/// and a component request.
///
/// - **L1** (identity): same `name` and `version`.
/// - **L2** (bundle hash): same `packages_hash`.
/// - **L3** (superset, gated by `allow_level3`): every package the
///   component needs is present at the worker's exact version.
pub fn compatible(manifest: &Manifest, component: &Component, allow_level3: bool) -> bool {
    if manifest.name == component.name && manifest.version == component.version {
        return true;
    }
    if manifest.packages_hash == component.packages_hash {
        return true;
    }
    if !allow_level3 {
        return false;
    }
    component
        .packages
        .iter()
        .all(|(pkg, ver)| manifest.packages.get(pkg) == Some(ver))
}

/// Admission control, compatibility checks, and the waiting-component queue
/// atop one [`WorkerPoolCache`]. Not `Sync` by design: the coordinator's
/// single-threaded event loop is the only caller (spec §5).
pub struct Scheduler<L: WorkerLauncher> {
    config: SchedulerConfig,
    pool: WorkerPoolCache,
    launcher: L,
    new_workers: Vec<String>,
    waiting: VecDeque<Component>,
}

impl<L: WorkerLauncher> Scheduler<L> {
    pub fn new(config: SchedulerConfig, policy: Policy, launcher: L) -> Self {
        let pool = WorkerPoolCache::new(config.slot_count, policy);
        Self {
            config,
            pool,
            launcher,
            new_workers: Vec::new(),
            waiting: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn active_len(&self) -> usize {
        self.pool.active_len()
    }

    pub fn cached_len(&self) -> usize {
        self.pool.cached_len()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn new_worker_ids(&self) -> &[String] {
        &self.new_workers
    }

    /// Tags a cached worker with the `(pipeline_position, version)` the PAC
    /// policy scores it by. The scheduler has no notion of pipeline
    /// position itself — the coordinator calls this right after a
    /// component is dispatched to a freshly-activated or freshly-cached
    /// worker.
    pub fn tag_pac_position(&mut self, worker_id: &str, position: usize, version: Version) {
        self.pool.set_pac_tag(worker_id, position, version);
    }

    /// Moves a worker that just finished its component (`done`) from
    /// `active` back to `cached`, eligible for reuse.
    pub fn release(&mut self, worker_id: &str) -> CoreResult<()> {
        self.pool.cache(worker_id)
    }

    /// Finds (or launches) a worker for `component` (spec §4.G step 1-4).
    ///
    /// Singleton mode reuses the first cached worker unconditionally.
    /// Otherwise, a cached hit requires `enable_compatibility_check_on_caching`
    /// to be on *and* a compatible worker to exist; anything else falls
    /// through to admission and launch.
    pub async fn get_worker(&mut self, component: Component) -> CoreResult<GetWorkerResult> {
        if self.config.debug_singleton_worker {
            if let Some(id) = self.pool.iter_cached_lru_order().next().map(|w| w.id.clone()) {
                self.pool.record_hit(&id);
                self.pool.activate(&id)?;
                return Ok(GetWorkerResult { outcome: GetWorkerOutcome::Ready(id), evicted: None });
            }
        } else if self.config.enable_compatibility_check_on_caching {
            let allow_level3 = !self.config.debug_disable_level3_check;
            let hit = self
                .pool
                .iter_cached_lru_order()
                .find(|w| {
                    w.last_manifest
                        .as_ref()
                        .is_some_and(|m| compatible(m, &component, allow_level3))
                })
                .map(|w| w.id.clone());
            if let Some(id) = hit {
                self.pool.record_hit(&id);
                self.pool.activate(&id)?;
                return Ok(GetWorkerResult { outcome: GetWorkerOutcome::Ready(id), evicted: None });
            }
        }

        if self.pool.active_len() >= self.pool.slot_count() {
            return Err(CoreError::PoolFull);
        }

        let mut evicted = None;
        if !self.pool.has_room() {
            evicted = Some(self.pool.remove_end()?.id);
        }

        let worker_id = Uuid::new_v4().to_string();
        self.launcher.launch(&worker_id).await?;
        self.new_workers.push(worker_id.clone());
        self.waiting.push_back(component);

        Ok(GetWorkerResult { outcome: GetWorkerOutcome::Launching(worker_id), evicted })
    }

    /// Registers a launched worker's `ready` announcement (spec §4.G step
    /// 5): adds it to `cached`, then scans `waiting` in FIFO order for the
    /// first entry whose compatibility check passes (trivially true for
    /// all of them when `enable_compatibility_check_on_new_worker` is off).
    /// Returns the matched component, now removed from `waiting`, with the
    /// worker already moved to `active` and stamped with `manifest` — the
    /// caller dispatches it. Returns `None` when nothing currently waiting
    /// matches; the worker stays idle in `cached`.
    pub fn on_worker_ready(&mut self, worker_id: &str, manifest: Manifest) -> CoreResult<Option<Component>> {
        self.new_workers.retain(|id| id != worker_id);
        self.pool.add(WorkerHandle::new(worker_id));
        self.pool.stamp_manifest(worker_id, manifest.clone())?;

        let allow_level3 = !self.config.debug_disable_level3_check;
        let check_enabled = self.config.enable_compatibility_check_on_new_worker;
        let index = self
            .waiting
            .iter()
            .position(|c| !check_enabled || compatible(&manifest, c, allow_level3));

        let Some(index) = index else {
            return Ok(None);
        };
        let component = self.waiting.remove(index).expect("index just found by position");
        self.pool.activate(worker_id)?;
        Ok(Some(component))
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::sync::Mutex;

    use crucible_launcher::LaunchOutcome;

    use super::*;

    struct RecordingLauncher {
        launched: Mutex<Vec<String>>,
    }

    impl RecordingLauncher {
        fn new() -> Self {
            Self { launched: Mutex::new(Vec::new()) }
        }
    }

    impl WorkerLauncher for RecordingLauncher {
        fn launch(&self, worker_id: &str) -> impl Future<Output = CoreResult<LaunchOutcome>> + Send {
            self.launched.lock().unwrap().push(worker_id.to_string());
            std::future::ready(Ok(LaunchOutcome::Spawned))
        }
    }

    fn component(name: &str) -> Component {
        Component {
            component_id: Uuid::new_v4(),
            name: name.to_string(),
            version: SemanticVersion::zero(),
            packages_hash: "h1".to_string(),
            packages: BTreeMap::from([("numpy".to_string(), "1.0".to_string())]),
        }
    }

    fn manifest(name: &str) -> Manifest {
        Manifest::new(
            name,
            crucible_types::ComponentType::Library,
            SemanticVersion::zero(),
            BTreeMap::from([("numpy".to_string(), "1.0".to_string())]),
            true,
        )
    }

    #[tokio::test]
    async fn miss_launches_and_queues_the_component() {
        let mut sched = Scheduler::new(SchedulerConfig::default(), Policy::Lru, RecordingLauncher::new());
        let result = sched.get_worker(component("fit-model")).await.unwrap();
        assert!(matches!(result.outcome, GetWorkerOutcome::Launching(_)));
        assert_eq!(sched.waiting_len(), 1);
        assert_eq!(sched.new_worker_ids().len(), 1);
    }

    #[tokio::test]
    async fn ready_worker_is_matched_to_the_waiting_component() {
        let mut sched = Scheduler::new(SchedulerConfig::default(), Policy::Lru, RecordingLauncher::new());
        let result = sched.get_worker(component("fit-model")).await.unwrap();
        let GetWorkerOutcome::Launching(worker_id) = result.outcome else { panic!("expected a launch") };

        let matched = sched.on_worker_ready(&worker_id, manifest("fit-model")).unwrap();
        assert!(matched.is_some());
        assert_eq!(sched.waiting_len(), 0);
        assert_eq!(sched.active_len(), 1);
        assert_eq!(sched.cached_len(), 0);
    }

    #[tokio::test]
    async fn second_request_reuses_the_cached_compatible_worker() {
        let mut sched = Scheduler::new(SchedulerConfig::default(), Policy::Lru, RecordingLauncher::new());
        let first = sched.get_worker(component("fit-model")).await.unwrap();
        let GetWorkerOutcome::Launching(worker_id) = first.outcome else { panic!("expected a launch") };
        sched.on_worker_ready(&worker_id, manifest("fit-model")).unwrap();
        sched.release(&worker_id).unwrap();

        let second = sched.get_worker(component("fit-model")).await.unwrap();
        assert_eq!(second.outcome, GetWorkerOutcome::Ready(worker_id));
        assert_eq!(sched.new_worker_ids().len(), 1, "no second launch should have happened");
    }

    #[tokio::test]
    async fn pool_full_is_reported_once_active_reaches_slot_count() {
        let config = SchedulerConfig { slot_count: 1, ..SchedulerConfig::default() };
        let mut sched = Scheduler::new(config, Policy::Lru, RecordingLauncher::new());
        let first = sched.get_worker(component("a")).await.unwrap();
        let GetWorkerOutcome::Launching(worker_id) = first.outcome else { panic!("expected a launch") };
        sched.on_worker_ready(&worker_id, manifest("a")).unwrap();

        let err = sched.get_worker(component("b")).await.unwrap_err();
        assert!(matches!(err, CoreError::PoolFull));
    }

    #[tokio::test]
    async fn eviction_makes_room_and_is_reported_to_the_caller() {
        let config = SchedulerConfig { slot_count: 1, ..SchedulerConfig::default() };
        let mut sched = Scheduler::new(config, Policy::Lru, RecordingLauncher::new());
        let first = sched.get_worker(component("a")).await.unwrap();
        let GetWorkerOutcome::Launching(w1) = first.outcome else { panic!("expected a launch") };
        sched.on_worker_ready(&w1, manifest("a")).unwrap();
        sched.release(&w1).unwrap();

        let second = sched.get_worker(component("b")).await.unwrap();
        assert_eq!(second.evicted, Some(w1), "the lone cached worker had to be evicted to admit the new launch");
        assert!(matches!(second.outcome, GetWorkerOutcome::Launching(_)));
    }

    #[tokio::test]
    async fn singleton_mode_reuses_any_cached_worker_regardless_of_compatibility() {
        let config = SchedulerConfig { debug_singleton_worker: true, ..SchedulerConfig::default() };
        let mut sched = Scheduler::new(config, Policy::Lru, RecordingLauncher::new());
        let first = sched.get_worker(component("a")).await.unwrap();
        let GetWorkerOutcome::Launching(w1) = first.outcome else { panic!("expected a launch") };
        sched.on_worker_ready(&w1, manifest("a")).unwrap();
        sched.release(&w1).unwrap();

        let second = sched.get_worker(component("totally-unrelated")).await.unwrap();
        assert_eq!(second.outcome, GetWorkerOutcome::Ready(w1));
    }

    #[tokio::test]
    async fn disabling_the_caching_check_forces_every_request_to_launch() {
        let config = SchedulerConfig { enable_compatibility_check_on_caching: false, ..SchedulerConfig::default() };
        let mut sched = Scheduler::new(config, Policy::Lru, RecordingLauncher::new());
        let first = sched.get_worker(component("a")).await.unwrap();
        let GetWorkerOutcome::Launching(w1) = first.outcome else { panic!("expected a launch") };
        sched.on_worker_ready(&w1, manifest("a")).unwrap();
        sched.release(&w1).unwrap();

        let second = sched.get_worker(component("a")).await.unwrap();
        assert!(matches!(second.outcome, GetWorkerOutcome::Launching(_)), "caching check is disabled, so even an identical request must miss");
    }

    #[test]
    fn l3_superset_check_passes_when_requested_packages_are_a_subset() {
        let worker_manifest = Manifest::new(
            "fit-model",
            crucible_types::ComponentType::Library,
            SemanticVersion::new("master", 0, 1),
            BTreeMap::from([("numpy".to_string(), "1.0".to_string()), ("pandas".to_string(), "2.0".to_string())]),
            true,
        );
        let request = Component {
            component_id: Uuid::new_v4(),
            name: "fit-model".to_string(),
            version: SemanticVersion::new("master", 0, 2),
            packages_hash: "different-hash".to_string(),
            packages: BTreeMap::from([("numpy".to_string(), "1.0".to_string())]),
        };
        assert!(compatible(&worker_manifest, &request, true));
        assert!(!compatible(&worker_manifest, &request, false), "L3 must be skippable via the debug flag");
    }
}
