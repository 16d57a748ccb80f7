mod common;

use std::sync::{Arc, LazyLock, atomic::Ordering};

use comms::{Role, Router, Run, Status, StatusUpdate, Task, TaskConfig};
use controller::{
    ArtifactStore, Dispatcher, Registry, RunMachine, SnapshotCache, TaskModel, cache::HaltFlag,
    store::FileKind,
};

use common::{Calls, FakeRouter, Recorder, run, task};

fn machine(run: &Run, router: &Arc<FakeRouter>, calls: &Calls) -> (RunMachine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let router: Arc<dyn Router> = router.clone();
    let machine = RunMachine::new(
        run,
        Box::new(Recorder(calls.clone())),
        router,
        ArtifactStore::new(dir.path()),
        HaltFlag::default(),
    );
    (machine, dir)
}

fn at_round(mut run: Run, round: u32) -> Run {
    run.tasks[0].config.current_round = Some(round);
    run
}

#[tokio::test]
async fn guarded_handlers_transition_once() {
    let participant = run(2, "b", Role::Participant, Status::Running, vec![task("Recorder", 3)]);
    let router = FakeRouter::new(vec![participant.clone()]);
    let calls = Calls::default();
    let (mut machine, _dir) = machine(&participant, &router, &calls);

    let first = machine.tick(&participant).await;
    let replay = machine.tick(&participant).await;

    assert_eq!(first, Some(StatusUpdate::own(Status::PendingSuccess)));
    assert_eq!(replay, None);
    assert_eq!(Calls::get(&calls.training), 1);
    assert_eq!(router.history(2), vec![Status::Running, Status::PendingSuccess]);
}

#[tokio::test]
async fn first_round_standby_waits_for_the_dataset() {
    let standby = run(1, "a", Role::Coordinator, Status::Standby, vec![task("Recorder", 3)]);
    let router = FakeRouter::new(vec![standby.clone()]);
    let calls = Calls::default();
    let (mut machine, _dir) = machine(&standby, &router, &calls);

    assert_eq!(machine.tick(&standby).await, None);
    assert_eq!(Calls::get(&calls.validate), 0);
    assert_eq!(router.history(1), vec![Status::Standby]);
}

#[tokio::test]
async fn later_round_standby_validates_then_prepares() {
    let standby = at_round(
        run(2, "b", Role::Participant, Status::Standby, vec![task("Recorder", 3)]),
        2,
    );
    let router = FakeRouter::new(vec![standby.clone()]);
    let calls = Calls::default();
    let (mut machine, _dir) = machine(&standby, &router, &calls);

    assert_eq!(
        machine.tick(&standby).await,
        Some(StatusUpdate::own(Status::Preparing))
    );
    assert_eq!(machine.tick(&standby).await, None);
    assert_eq!(Calls::get(&calls.validate), 1);
}

#[tokio::test]
async fn coordinator_preparing_rechecks_the_barrier() {
    let coordinator = run(1, "a", Role::Coordinator, Status::Preparing, vec![task("Recorder", 2)]);
    let participant = run(2, "b", Role::Participant, Status::Standby, vec![task("Recorder", 2)]);
    let router = FakeRouter::new(vec![coordinator.clone(), participant]);
    let calls = Calls::default();
    let (mut machine, _dir) = machine(&coordinator, &router, &calls);

    assert_eq!(machine.tick(&coordinator).await, None);
    assert_eq!(machine.tick(&coordinator).await, None);

    router.set_status(2, Status::Preparing);
    assert_eq!(
        machine.tick(&coordinator).await,
        Some(StatusUpdate::broadcast(Status::Running))
    );
    assert_eq!(Calls::get(&calls.prepare), 3);
    assert_eq!(router.status(2), Status::Running);
}

#[tokio::test]
async fn coordinator_fails_the_batch_on_a_failed_participant() {
    let coordinator = run(
        1,
        "a",
        Role::Coordinator,
        Status::PendingAggregating,
        vec![task("Recorder", 2)],
    );
    let participant = run(2, "b", Role::Participant, Status::PendingFailed, vec![task("Recorder", 2)]);
    let router = FakeRouter::new(vec![coordinator.clone(), participant]);
    let calls = Calls::default();
    let (mut machine, _dir) = machine(&coordinator, &router, &calls);

    assert_eq!(
        machine.tick(&coordinator).await,
        Some(StatusUpdate::broadcast(Status::Failed))
    );
    assert_eq!(router.status(2), Status::Failed);
}

#[tokio::test]
async fn missing_mid_artifacts_keep_the_coordinator_waiting() {
    let coordinator = run(
        1,
        "a",
        Role::Coordinator,
        Status::PendingAggregating,
        vec![task("Recorder", 2)],
    );
    let router = FakeRouter::new(vec![coordinator.clone()]);
    let calls = Calls::default();
    let (mut machine, _dir) = machine(&coordinator, &router, &calls);

    assert_eq!(machine.tick(&coordinator).await, None);
    assert_eq!(router.status(1), Status::PendingAggregating);
}

#[tokio::test]
async fn replayed_aggregation_advances_the_round_once() {
    let coordinator = run(1, "a", Role::Coordinator, Status::Aggregating, vec![task("Recorder", 3)]);
    let router = FakeRouter::new(vec![coordinator.clone()]);
    let calls = Calls::default();
    let (mut machine, _dir) = machine(&coordinator, &router, &calls);

    assert_eq!(
        machine.tick(&coordinator).await,
        Some(StatusUpdate::broadcast(Status::Standby).next_round())
    );
    assert_eq!(machine.tick(&coordinator).await, None);

    assert_eq!(Calls::get(&calls.aggregate), 1);
    assert_eq!(router.rounds(1), vec![1, 2]);
}

#[tokio::test]
async fn last_round_aggregation_succeeds() {
    let coordinator = at_round(
        run(1, "a", Role::Coordinator, Status::Aggregating, vec![task("Recorder", 3)]),
        3,
    );
    let router = FakeRouter::new(vec![coordinator.clone()]);
    let calls = Calls::default();
    let (mut machine, _dir) = machine(&coordinator, &router, &calls);

    assert_eq!(
        machine.tick(&coordinator).await,
        Some(StatusUpdate::broadcast(Status::Success))
    );
}

#[tokio::test]
async fn failed_training_reports_pending_failed() {
    let participant = run(2, "b", Role::Participant, Status::Running, vec![task("Recorder", 1)]);
    let router = FakeRouter::new(vec![participant.clone()]);
    let calls = Calls::default();
    calls.fail_training.store(true, Ordering::SeqCst);
    let (mut machine, _dir) = machine(&participant, &router, &calls);

    assert_eq!(
        machine.tick(&participant).await,
        Some(StatusUpdate::own(Status::PendingFailed))
    );
}

#[tokio::test]
async fn halted_machines_stay_silent() {
    let participant = run(2, "b", Role::Participant, Status::Running, vec![task("Recorder", 1)]);
    let router = FakeRouter::new(vec![participant.clone()]);
    let calls = Calls::default();
    let dir = tempfile::tempdir().unwrap();
    let halt = HaltFlag::default();
    let shared: Arc<dyn Router> = router.clone();
    let mut machine = RunMachine::new(
        &participant,
        Box::new(Recorder(calls.clone())),
        shared,
        ArtifactStore::new(dir.path()),
        halt.clone(),
    );

    halt.halt();

    assert_eq!(machine.tick(&participant).await, None);
    assert_eq!(Calls::get(&calls.training), 1);
    assert_eq!(router.history(2), vec![Status::Running]);
}

fn dispatcher(router: &Arc<FakeRouter>, dir: &tempfile::TempDir) -> Dispatcher {
    let router: Arc<dyn Router> = router.clone();
    Dispatcher::new(
        "a",
        router,
        ArtifactStore::new(dir.path()),
        Registry::standard(),
        SnapshotCache::in_memory(),
        4,
    )
}

#[tokio::test]
async fn unknown_models_and_finished_runs_are_not_dispatched() {
    let router = FakeRouter::new(Vec::new());
    let dir = tempfile::tempdir().unwrap();
    let mut dispatcher = dispatcher(&router, &dir);

    assert!(!dispatcher.dispatch(run(1, "a", Role::Participant, Status::Running, vec![task("Svm", 1)])));
    assert!(!dispatcher.dispatch(run(
        2,
        "a",
        Role::Participant,
        Status::Success,
        vec![task("LogisticRegression", 1)]
    )));

    let mut unconfigured = task("LogisticRegression", 1);
    unconfigured.config = TaskConfig::default();
    assert!(!dispatcher.dispatch(run(3, "a", Role::Participant, Status::Running, vec![unconfigured])));
    assert_eq!(dispatcher.instances(), 0);
}

#[tokio::test]
async fn changes_are_detected_once_and_stalls_only_for_coordinators() {
    let router = FakeRouter::new(vec![
        run(1, "a", Role::Coordinator, Status::PendingAggregating, vec![task("Recorder", 1)]),
        run(2, "a", Role::Participant, Status::PendingAggregating, vec![task("Recorder", 1)]),
        run(3, "other", Role::Participant, Status::Running, vec![task("Recorder", 1)]),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(&router, &dir);

    let runs = dispatcher.poll_active().await.unwrap();
    assert_eq!(runs.len(), 2);

    assert!(dispatcher.detect_stalled(&runs).is_empty());
    assert_eq!(dispatcher.detect_changes(&runs).len(), 2);
    assert!(dispatcher.detect_changes(&runs).is_empty());

    let stalled = dispatcher.detect_stalled(&runs);
    assert_eq!(stalled.len(), 1);
    assert_eq!(stalled[0].id, 1);

    assert_eq!(dispatcher.reset(), 2);
    assert_eq!(dispatcher.detect_changes(&runs).len(), 2);
}

#[tokio::test]
async fn runs_with_a_bad_sequence_are_ignored() {
    let mut broken = run(1, "a", Role::Participant, Status::Running, vec![task("Recorder", 1)]);
    broken.cur_seq = 2;
    let router = FakeRouter::new(vec![broken]);
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(&router, &dir);

    assert!(dispatcher.poll_active().await.unwrap().is_empty());
}

#[tokio::test]
async fn submitted_datasets_move_the_run_to_preparing() {
    let router = FakeRouter::new(vec![run(
        4,
        "a",
        Role::Participant,
        Status::Standby,
        vec![Task {
            seq: Some(1),
            model: "LinearRegression".into(),
            config: TaskConfig::default(),
        }],
    )]);
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(&router, &dir);

    dispatcher.submit_dataset(4, b"1,2,3\n").await.unwrap();

    assert_eq!(router.status(4), Status::Preparing);
    assert_eq!(
        dispatcher.store().read_dataset(4).unwrap(),
        "1,2,3\n"
    );
}

#[tokio::test]
async fn transient_aggregation_failure_fails_the_batch() {
    let coordinator = run(1, "a", Role::Coordinator, Status::Aggregating, vec![task("Recorder", 3)]);
    let participant = run(2, "b", Role::Participant, Status::Aggregating, vec![task("Recorder", 3)]);
    let router = FakeRouter::new(vec![coordinator.clone(), participant]);
    let calls = Calls::default();
    calls.fail_aggregate.store(true, Ordering::SeqCst);
    let (mut machine, _dir) = machine(&coordinator, &router, &calls);

    assert_eq!(
        machine.tick(&coordinator).await,
        Some(StatusUpdate::broadcast(Status::Failed))
    );
    assert_eq!(router.status(1), Status::Failed);
    assert_eq!(router.status(2), Status::Failed);
}

#[tokio::test]
async fn failed_round_upload_is_retried_instead_of_failing() {
    let participant = run(2, "b", Role::Participant, Status::PendingSuccess, vec![task("Recorder", 2)]);
    let router = FakeRouter::new(vec![participant.clone()]);
    let calls = Calls::default();
    let (mut machine, dir) = machine(&participant, &router, &calls);
    ArtifactStore::new(dir.path())
        .write(2, 1, 1, FileKind::MidArtifacts, b"{}\n")
        .unwrap();

    router.fail_uploads.store(true, Ordering::SeqCst);
    assert_eq!(machine.tick(&participant).await, None);
    assert_eq!(router.history(2), vec![Status::PendingSuccess]);
    assert!(router.uploads().is_empty());

    router.fail_uploads.store(false, Ordering::SeqCst);
    assert_eq!(
        machine.tick(&participant).await,
        Some(StatusUpdate::own(Status::PendingAggregating))
    );
    assert_eq!(router.uploads().len(), 1);
    assert_eq!(
        router.history(2),
        vec![Status::PendingSuccess, Status::PendingAggregating]
    );
}

static DUPLICATE_CALLS: LazyLock<Calls> = LazyLock::new(Calls::default);

fn duplicate_recorder() -> Box<dyn TaskModel> {
    Box::new(Recorder(DUPLICATE_CALLS.clone()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_dispatches_train_once() {
    let participant = run(2, "a", Role::Participant, Status::Running, vec![task("Duplicated", 1)]);
    let router = FakeRouter::new(vec![participant.clone()]);
    let dir = tempfile::tempdir().unwrap();
    let shared: Arc<dyn Router> = router.clone();
    let mut registry = Registry::standard();
    registry.register("Duplicated", duplicate_recorder);
    let mut dispatcher = Dispatcher::new(
        "a",
        shared,
        ArtifactStore::new(dir.path()),
        registry,
        SnapshotCache::in_memory(),
        4,
    );

    for _ in 0..5 {
        assert!(dispatcher.dispatch(participant.clone()));
    }
    dispatcher.wait_idle().await;

    assert_eq!(Calls::get(&DUPLICATE_CALLS.training), 1);
    assert_eq!(router.history(2), vec![Status::Running, Status::PendingSuccess]);
    assert_eq!(dispatcher.instances(), 1);
}
