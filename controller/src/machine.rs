//! The per run lifecycle state machine.

use std::sync::Arc;

use comms::{Router, Run, Status, StatusUpdate};
use log::{debug, info, warn};

use crate::{
    Result,
    cache::HaltFlag,
    runlog::RunLog,
    store::{ArtifactStore, TransferScope, download_mid_artifacts, upload_round},
    task::{TaskContext, TaskModel},
};

/// Where the batch stands relative to a status the coordinator waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Barrier {
    /// Some run of the batch failed.
    Failed,
    /// Every run of the batch reports the awaited status.
    Ready,
    Waiting,
}

impl Barrier {
    /// Classifies the batch's statuses against `target`.
    pub fn evaluate(runs: &[Run], target: Status) -> Self {
        if runs.iter().any(|r| r.status.is_failure()) {
            Barrier::Failed
        } else if !runs.is_empty() && runs.iter().all(|r| r.status == target) {
            Barrier::Ready
        } else {
            Barrier::Waiting
        }
    }
}

/// Drives one `(run, seq)` through its statuses, one tick per observed change.
///
/// Handlers marked as guarded run once per entry into their status. The
/// coordinator's barrier handlers re-evaluate on every tick instead, since
/// participant changes only reach it through polling.
pub struct RunMachine {
    run_id: u64,
    seq: usize,
    model: Box<dyn TaskModel>,
    router: Arc<dyn Router>,
    store: ArtifactStore,
    log: RunLog,
    halt: HaltFlag,
    state: Option<Status>,
    aggregated: Option<(usize, u32)>,
}

impl RunMachine {
    /// Creates a new `RunMachine`.
    ///
    /// # Arguments
    /// * `run` - The run snapshot the machine is created for.
    /// * `model` - The task model of the run's current task.
    /// * `router` - Where notifications go.
    /// * `store` - The local artifact store.
    /// * `halt` - Once set, notifications are suppressed.
    pub fn new(
        run: &Run,
        model: Box<dyn TaskModel>,
        router: Arc<dyn Router>,
        store: ArtifactStore,
        halt: HaltFlag,
    ) -> Self {
        Self {
            run_id: run.id,
            seq: run.cur_seq,
            model,
            router,
            log: RunLog::new(run.id, store.clone()),
            store,
            halt,
            state: None,
            aggregated: None,
        }
    }

    /// The status last handled by a guarded handler.
    pub fn state(&self) -> Option<Status> {
        self.state
    }

    /// Handles the run's current status.
    ///
    /// Errors never escape: they are logged and turned into the status's
    /// fallback notification, or into a silent wait when a barrier handler hits
    /// a transient failure.
    ///
    /// # Returns
    /// The notification sent to the router, if any.
    pub async fn tick(&mut self, run: &Run) -> Option<StatusUpdate> {
        if run.status.is_terminal() {
            debug!(run_id = run.id; "run is {}, nothing to do", run.status);
            return None;
        }

        if let Some(round) = run.current_round() {
            self.log.attach(run.cur_seq, round);
        }

        let status = run.status;
        let coordinator = run.is_coordinator();
        let outcome = match status {
            Status::Standby => self.on_standby(run).await,
            Status::Preparing if coordinator => self.on_coordinator_preparing(run).await,
            Status::Preparing => self.on_preparing(run).await,
            Status::Running => self.on_running(run).await,
            Status::PendingSuccess => self.on_pending_success(run).await,
            Status::PendingAggregating if coordinator => {
                self.on_coordinator_pending_aggregating(run).await
            }
            Status::Aggregating if coordinator => self.on_coordinator_aggregating(run).await,
            Status::PendingAggregating | Status::Aggregating => {
                self.enter(status);
                Ok(None)
            }
            Status::PendingFailed => self.on_pending_failed(run).await,
            Status::Failed | Status::Success => Ok(None),
        };

        let update = match outcome {
            Ok(update) => update,
            Err(e) if e.is_transient() && is_barrier(status, coordinator) => {
                self.log
                    .warn(format!("waiting in {status} after a transient failure: {e}"));
                None
            }
            Err(e) => {
                self.log.error(format!("{status} handler failed: {e}"));
                fallback(status, coordinator)
            }
        };

        match update {
            Some(update) => self.notify(update).await,
            None => None,
        }
    }

    /// Marks `status` as handled, returning false if it already was.
    fn enter(&mut self, status: Status) -> bool {
        if self.state == Some(status) {
            return false;
        }

        self.state = Some(status);
        true
    }

    async fn notify(&self, update: StatusUpdate) -> Option<StatusUpdate> {
        if self.halt.is_halted() {
            self.log.info(format!(
                "run is finished, not notifying {}",
                update.status
            ));
            return None;
        }

        match self.router.update_status(self.run_id, update).await {
            Ok(()) => {
                info!(
                    run_id = self.run_id, seq = self.seq,
                    broadcast = update.is_broadcast(), next_round = update.increases_round();
                    "notified {}", update.status
                );
                self.log.info(format!("notified {}", update.status));
                Some(update)
            }
            Err(e) => {
                warn!(run_id = self.run_id; "failed to notify {}: {e}", update.status);
                None
            }
        }
    }

    async fn barrier(&self, run: &Run, target: Status) -> Result<Barrier> {
        let runs = self
            .router
            .batch_runs(run.batch, run.project, &run.site_uid)
            .await?;
        let barrier = Barrier::evaluate(&runs, target);
        debug!(run_id = run.id, sites = runs.len(); "barrier on {target}: {barrier:?}");
        Ok(barrier)
    }

    async fn on_standby(&mut self, run: &Run) -> Result<Option<StatusUpdate>> {
        if !self.enter(Status::Standby) {
            return Ok(None);
        }

        if run.is_first_round() {
            self.log.info("waiting for the dataset");
            return Ok(None);
        }

        let ctx = TaskContext {
            run,
            store: &self.store,
            router: self.router.as_ref(),
            log: &self.log,
        };
        self.model.validate(&ctx).await?;
        Ok(Some(StatusUpdate::own(Status::Preparing)))
    }

    async fn on_preparing(&mut self, run: &Run) -> Result<Option<StatusUpdate>> {
        let ctx = TaskContext {
            run,
            store: &self.store,
            router: self.router.as_ref(),
            log: &self.log,
        };
        self.model.prepare_data(&ctx).await?;
        self.enter(Status::Preparing);
        Ok(None)
    }

    async fn on_coordinator_preparing(&mut self, run: &Run) -> Result<Option<StatusUpdate>> {
        self.state = Some(Status::Preparing);

        let barrier = self.barrier(run, Status::Preparing).await?;
        if barrier == Barrier::Failed {
            return Ok(Some(StatusUpdate::broadcast(Status::Failed)));
        }

        let ctx = TaskContext {
            run,
            store: &self.store,
            router: self.router.as_ref(),
            log: &self.log,
        };
        self.model.prepare_data(&ctx).await?;

        Ok((barrier == Barrier::Ready).then(|| StatusUpdate::broadcast(Status::Running)))
    }

    async fn on_running(&mut self, run: &Run) -> Result<Option<StatusUpdate>> {
        if !self.enter(Status::Running) {
            return Ok(None);
        }

        let ctx = TaskContext {
            run,
            store: &self.store,
            router: self.router.as_ref(),
            log: &self.log,
        };
        self.model.training(&ctx).await?;
        Ok(Some(StatusUpdate::own(Status::PendingSuccess)))
    }

    async fn on_pending_success(&mut self, run: &Run) -> Result<Option<StatusUpdate>> {
        if self.state == Some(Status::PendingSuccess) {
            return Ok(None);
        }

        match upload_round(self.router.as_ref(), &self.store, run, TransferScope::Round).await {
            Ok(_) => {
                self.enter(Status::PendingSuccess);
                Ok(Some(StatusUpdate::own(Status::PendingAggregating)))
            }
            Err(e) => {
                self.log.warn(format!("failed to upload round results: {e}"));
                Ok(None)
            }
        }
    }

    async fn on_coordinator_pending_aggregating(
        &mut self,
        run: &Run,
    ) -> Result<Option<StatusUpdate>> {
        self.state = Some(Status::PendingAggregating);

        match self.barrier(run, Status::PendingAggregating).await? {
            Barrier::Failed => Ok(Some(StatusUpdate::broadcast(Status::Failed))),
            Barrier::Waiting => Ok(None),
            Barrier::Ready => {
                download_mid_artifacts(self.router.as_ref(), &self.store, run).await?;
                Ok(Some(StatusUpdate::broadcast(Status::Aggregating)))
            }
        }
    }

    async fn on_coordinator_aggregating(&mut self, run: &Run) -> Result<Option<StatusUpdate>> {
        self.state = Some(Status::Aggregating);

        let round = run.current_round().unwrap_or(1);
        if self.aggregated == Some((run.cur_seq, round)) {
            debug!(run_id = run.id, seq = run.cur_seq, round = round; "round already aggregated");
            return Ok(None);
        }

        if self.barrier(run, Status::Aggregating).await? == Barrier::Failed {
            return Ok(Some(StatusUpdate::broadcast(Status::Failed)));
        }

        let ctx = TaskContext {
            run,
            store: &self.store,
            router: self.router.as_ref(),
            log: &self.log,
        };
        self.model.do_aggregate(&ctx).await?;
        self.aggregated = Some((run.cur_seq, round));

        if run.is_last_round() {
            Ok(Some(StatusUpdate::broadcast(Status::Success)))
        } else {
            Ok(Some(StatusUpdate::broadcast(Status::Standby).next_round()))
        }
    }

    async fn on_pending_failed(&mut self, run: &Run) -> Result<Option<StatusUpdate>> {
        if self.state == Some(Status::PendingFailed) {
            return Ok(None);
        }

        match upload_round(self.router.as_ref(), &self.store, run, TransferScope::Round).await {
            Ok(_) => {
                self.enter(Status::PendingFailed);
                Ok(Some(StatusUpdate::own(Status::Failed)))
            }
            Err(e) => {
                // Left unmarked so the next event for the run retries the upload.
                self.log.error(format!("failed to upload round files: {e}"));
                Ok(None)
            }
        }
    }
}

/// Coordinator states the stalled-run sweep re-dispatches, where a transient
/// failure can simply wait for the next tick.
fn is_barrier(status: Status, coordinator: bool) -> bool {
    coordinator && matches!(status, Status::Preparing | Status::PendingAggregating)
}

/// The safe status a failed handler reports.
fn fallback(status: Status, coordinator: bool) -> Option<StatusUpdate> {
    match status {
        Status::Standby | Status::Running => Some(StatusUpdate::own(Status::PendingFailed)),
        Status::Preparing if coordinator => Some(StatusUpdate::broadcast(Status::PendingFailed)),
        Status::Preparing => Some(StatusUpdate::own(Status::PendingFailed)),
        Status::PendingAggregating | Status::Aggregating if coordinator => {
            Some(StatusUpdate::broadcast(Status::Failed))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use comms::{Role, Task, TaskConfig};

    use super::*;

    fn run(id: u64, status: Status) -> Run {
        Run {
            id,
            site_uid: format!("site-{id}"),
            role: Role::Participant,
            status,
            batch: 1,
            project: 1,
            cur_seq: 1,
            tasks: vec![Task {
                seq: Some(1),
                model: "LogisticRegression".into(),
                config: TaskConfig::default(),
            }],
        }
    }

    #[test]
    fn barrier_needs_every_run_in_the_target() {
        let ready = [run(1, Status::PendingAggregating), run(2, Status::PendingAggregating)];
        let waiting = [run(1, Status::PendingAggregating), run(2, Status::Running)];
        let failed = [run(1, Status::PendingAggregating), run(2, Status::PendingFailed)];

        assert_eq!(Barrier::evaluate(&ready, Status::PendingAggregating), Barrier::Ready);
        assert_eq!(Barrier::evaluate(&waiting, Status::PendingAggregating), Barrier::Waiting);
        assert_eq!(Barrier::evaluate(&failed, Status::PendingAggregating), Barrier::Failed);
        assert_eq!(Barrier::evaluate(&[], Status::Preparing), Barrier::Waiting);
    }

    #[test]
    fn fallbacks_by_role() {
        assert_eq!(
            fallback(Status::Running, false),
            Some(StatusUpdate::own(Status::PendingFailed))
        );
        assert_eq!(
            fallback(Status::Preparing, true),
            Some(StatusUpdate::broadcast(Status::PendingFailed))
        );
        assert_eq!(
            fallback(Status::Aggregating, true),
            Some(StatusUpdate::broadcast(Status::Failed))
        );
        assert_eq!(fallback(Status::Aggregating, false), None);
        assert_eq!(fallback(Status::PendingFailed, true), None);
        assert_eq!(fallback(Status::PendingSuccess, false), None);
        assert!(is_barrier(Status::PendingAggregating, true));
        assert!(!is_barrier(Status::PendingAggregating, false));
        assert!(!is_barrier(Status::Aggregating, true));
    }
}
