use std::{collections::HashSet, sync::Arc};

use comms::{Router, Run, SiteStatus, Status, StatusUpdate};
use log::{debug, info, warn};
use tokio::{
    sync::{Mutex, Semaphore},
    task::JoinSet,
};

use crate::{
    Result,
    cache::InstanceCache,
    machine::RunMachine,
    snapshot::SnapshotCache,
    store::ArtifactStore,
    task::Registry,
};

/// Turns router polls into state machine ticks.
///
/// Every dispatched tick runs as its own task, bounded by a semaphore. Ticks of
/// the same `(run, seq)` share one machine behind an async mutex, so they run
/// one after another.
pub struct Dispatcher {
    site_uid: String,
    router: Arc<dyn Router>,
    store: ArtifactStore,
    registry: Arc<Registry>,
    snapshots: SnapshotCache,
    instances: Arc<InstanceCache<Mutex<RunMachine>>>,
    permits: Arc<Semaphore>,
    jobs: JoinSet<()>,
}

impl Dispatcher {
    /// Creates a new `Dispatcher`.
    ///
    /// # Args
    /// * `site_uid` - The site this controller acts for.
    /// * `router` - The central router.
    /// * `store` - Local artifact storage.
    /// * `registry` - The task models the site can run.
    /// * `snapshots` - Last seen run states.
    /// * `max_jobs` - How many ticks may run at once.
    pub fn new(
        site_uid: impl Into<String>,
        router: Arc<dyn Router>,
        store: ArtifactStore,
        registry: Registry,
        snapshots: SnapshotCache,
        max_jobs: usize,
    ) -> Self {
        Self {
            site_uid: site_uid.into(),
            router,
            store,
            registry: Arc::new(registry),
            snapshots,
            instances: Arc::new(InstanceCache::default()),
            permits: Arc::new(Semaphore::new(max_jobs.max(1))),
            jobs: JoinSet::new(),
        }
    }

    pub fn site_uid(&self) -> &str {
        &self.site_uid
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Number of cached model instances.
    pub fn instances(&self) -> usize {
        self.instances.len()
    }

    /// Forgets every snapshot so each visible run is handled once more.
    pub fn reset(&self) -> usize {
        let cleared = self.snapshots.reset();
        info!("cleared {cleared} run snapshot(s)");
        cleared
    }

    /// Fetches the runs of this site that the router reports active.
    ///
    /// Runs of other sites and runs with an out of range task sequence are
    /// dropped.
    pub async fn poll_active(&self) -> Result<Vec<Run>> {
        let runs = self.router.active_runs().await?;

        Ok(runs
            .into_iter()
            .filter(|run| run.site_uid == self.site_uid)
            .filter(|run| match run.check() {
                Ok(()) => true,
                Err(e) => {
                    warn!(run_id = run.id; "ignoring run: {e}");
                    false
                }
            })
            .collect())
    }

    /// Selects the runs whose status differs from their snapshot, refreshing it.
    pub fn detect_changes(&self, runs: &[Run]) -> Vec<Run> {
        runs.iter()
            .filter(|run| {
                let changed = self.snapshots.has_changed(run);
                if changed {
                    self.snapshots.put(run);
                }
                changed
            })
            .cloned()
            .collect()
    }

    /// Selects coordinator runs parked at a barrier whose status has not moved.
    pub fn detect_stalled(&self, runs: &[Run]) -> Vec<Run> {
        runs.iter()
            .filter(|run| {
                run.is_coordinator()
                    && matches!(run.status, Status::Preparing | Status::PendingAggregating)
                    && !self.snapshots.has_changed(run)
            })
            .cloned()
            .collect()
    }

    /// Polls the router and dispatches every changed run.
    ///
    /// Cached instances of runs the router no longer reports active are
    /// retired, so in flight jobs of finished runs stop notifying.
    ///
    /// # Returns
    /// How many ticks were scheduled.
    pub async fn fetch_cycle(&mut self) -> Result<usize> {
        self.reap();
        let runs = self.poll_active().await?;

        let active: HashSet<u64> = runs.iter().map(|run| run.id).collect();
        let retired = self.instances.retire_inactive(|id| active.contains(&id));
        if retired > 0 {
            debug!("retired {retired} instance(s) of inactive runs");
        }

        let changed = self.detect_changes(&runs);
        debug!("{} of {} run(s) changed", changed.len(), runs.len());

        Ok(changed.into_iter().filter(|run| self.dispatch(run.clone())).count())
    }

    /// Polls the router and re-dispatches stalled coordinator runs.
    ///
    /// # Returns
    /// How many ticks were scheduled.
    pub async fn monitor_cycle(&mut self) -> Result<usize> {
        self.reap();
        let runs = self.poll_active().await?;
        let stalled = self.detect_stalled(&runs);
        if !stalled.is_empty() {
            debug!("retrying {} stalled run(s)", stalled.len());
        }

        Ok(stalled.into_iter().filter(|run| self.dispatch(run.clone())).count())
    }

    /// Schedules one tick of `run`'s state machine.
    ///
    /// Finished runs halt their cached machines instead. Runs with an invalid
    /// task list or an unknown model are dropped.
    ///
    /// # Returns
    /// Whether a tick was scheduled.
    pub fn dispatch(&mut self, run: Run) -> bool {
        if run.status.is_terminal() {
            let halted = self.instances.halt_run(run.id);
            debug!(run_id = run.id, halted = halted; "run is {}, not dispatching", run.status);
            return false;
        }

        if let Err(e) = self.registry.validate_tasks(&run.tasks) {
            warn!(run_id = run.id; "rejecting run: {e}");
            return false;
        }

        let Some(task) = run.current_task() else {
            warn!(run_id = run.id; "run has no current task");
            return false;
        };
        let Some(factory) = self.registry.resolve(&task.model) else {
            warn!(run_id = run.id; "unknown task model {:?}, dropping event", task.model);
            return false;
        };

        let key = (run.id, run.cur_seq);
        let machine = self.instances.get_or_create(key, |halt| {
            Mutex::new(RunMachine::new(
                &run,
                factory(),
                Arc::clone(&self.router),
                self.store.clone(),
                halt,
            ))
        });

        let permits = Arc::clone(&self.permits);
        let instances = Arc::clone(&self.instances);
        self.jobs.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };

            let mut machine = machine.lock().await;
            debug!(run_id = run.id, seq = run.cur_seq; "handling {}", run.status);
            machine.tick(&run).await;
            instances.touch(key);
        });

        true
    }

    /// Waits until every scheduled tick has finished.
    pub async fn wait_idle(&mut self) {
        while let Some(joined) = self.jobs.join_next().await {
            if let Err(e) = joined {
                warn!("dispatch job failed: {e}");
            }
        }
    }

    fn reap(&mut self) {
        while let Some(joined) = self.jobs.try_join_next() {
            if let Err(e) = joined {
                warn!("dispatch job failed: {e}");
            }
        }
    }

    /// Reports site liveness. Failures are logged only.
    pub async fn heartbeat(&self, status: SiteStatus) {
        match self.router.heartbeat(&self.site_uid, status).await {
            Ok(()) => debug!(site_uid = self.site_uid.as_str(); "heartbeat {status:?}"),
            Err(e) => warn!(site_uid = self.site_uid.as_str(); "heartbeat failed: {e}"),
        }
    }

    /// Stores the dataset of `run` and moves the run to `Preparing`.
    ///
    /// # Errors
    /// `ControllerErr::Store` if the dataset cannot be written, `ControllerErr::Router`
    /// if the router rejects the status change.
    pub async fn submit_dataset(&self, run: u64, content: &[u8]) -> Result<()> {
        let path = self.store.save_dataset(run, content)?;
        info!(run_id = run; "dataset saved to {}", path.display());

        self.router
            .update_status(run, StatusUpdate::own(Status::Preparing))
            .await?;
        Ok(())
    }
}
