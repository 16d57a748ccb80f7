#![allow(dead_code)]

use std::{
    collections::HashMap,
    io::{Cursor, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use comms::{
    BundleKind, DownloadRequest, Role, Router, RouterErr, Run, SiteStatus, Status, StatusUpdate,
    Task, TaskConfig, UploadField, UploadRequest,
};
use controller::{ControllerErr, TaskContext, TaskModel};
use parking_lot::Mutex;
use tokio::sync::Notify;
use zip::{ZipWriter, write::SimpleFileOptions};

type BundleKey = (u64, usize, u32, BundleKind);

#[derive(Default)]
struct State {
    runs: Vec<Run>,
    history: HashMap<u64, Vec<Status>>,
    rounds: HashMap<u64, Vec<u32>>,
    bundles: HashMap<BundleKey, Vec<(String, Vec<u8>)>>,
    uploads: Vec<UploadRequest>,
    heartbeats: Vec<(String, SiteStatus)>,
}

/// In memory router shared by every simulated site.
#[derive(Default)]
pub struct FakeRouter {
    state: Mutex<State>,
    pub fail_heartbeats: AtomicBool,
    pub fail_uploads: AtomicBool,
}

impl FakeRouter {
    pub fn new(runs: Vec<Run>) -> Arc<Self> {
        let router = Self::default();
        {
            let mut state = router.state.lock();
            for run in &runs {
                state.history.insert(run.id, vec![run.status]);
                state
                    .rounds
                    .insert(run.id, vec![run.current_round().unwrap_or(1)]);
            }
            state.runs = runs;
        }
        Arc::new(router)
    }

    pub fn run(&self, id: u64) -> Run {
        self.state
            .lock()
            .runs
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .expect("unknown run")
    }

    pub fn status(&self, id: u64) -> Status {
        self.run(id).status
    }

    pub fn set_status(&self, id: u64, status: Status) {
        let mut state = self.state.lock();
        if let Some(run) = state.runs.iter_mut().find(|r| r.id == id) {
            run.status = status;
        }
        state.history.entry(id).or_default().push(status);
    }

    pub fn history(&self, id: u64) -> Vec<Status> {
        self.state.lock().history.get(&id).cloned().unwrap_or_default()
    }

    pub fn rounds(&self, id: u64) -> Vec<u32> {
        self.state.lock().rounds.get(&id).cloned().unwrap_or_default()
    }

    pub fn uploads(&self) -> Vec<UploadRequest> {
        self.state.lock().uploads.clone()
    }

    pub fn heartbeats(&self) -> Vec<(String, SiteStatus)> {
        self.state.lock().heartbeats.clone()
    }
}

fn advance_round(run: &mut Run) {
    let Some(index) = run.cur_seq.checked_sub(1) else {
        return;
    };
    let tasks = run.tasks.len();
    let Some(task) = run.tasks.get_mut(index) else {
        return;
    };

    let current = task.config.current_round.unwrap_or(1);
    let total = task.config.total_round.unwrap_or(1);
    if current >= total && run.cur_seq < tasks {
        run.cur_seq += 1;
        if let Some(next) = run.tasks.get_mut(run.cur_seq - 1) {
            next.config.current_round = Some(1);
        }
    } else {
        task.config.current_round = Some(current + 1);
    }
}

fn zip_files(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in files {
        writer
            .start_file(name.as_str(), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[async_trait]
impl Router for FakeRouter {
    async fn active_runs(&self) -> comms::Result<Vec<Run>> {
        Ok(self
            .state
            .lock()
            .runs
            .iter()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn batch_runs(&self, batch: u64, project: u64, _site_uid: &str) -> comms::Result<Vec<Run>> {
        Ok(self
            .state
            .lock()
            .runs
            .iter()
            .filter(|r| r.batch == batch && r.project == project)
            .cloned()
            .collect())
    }

    async fn update_status(&self, id: u64, update: StatusUpdate) -> comms::Result<()> {
        let mut state = self.state.lock();
        let Some(origin) = state.runs.iter().find(|r| r.id == id).cloned() else {
            return Err(RouterErr::Http {
                status: 404,
                body: "no such run".into(),
            });
        };

        let targets: Vec<u64> = if update.is_broadcast() && origin.role == Role::Coordinator {
            state
                .runs
                .iter()
                .filter(|r| r.batch == origin.batch && r.project == origin.project)
                .map(|r| r.id)
                .collect()
        } else {
            vec![id]
        };

        for target in targets {
            let Some(run) = state.runs.iter_mut().find(|r| r.id == target) else {
                continue;
            };
            run.status = update.status;
            if update.increases_round() {
                advance_round(run);
            }
            let round = run.current_round().unwrap_or(1);

            state.history.entry(target).or_default().push(update.status);
            state.rounds.entry(target).or_default().push(round);
        }

        Ok(())
    }

    async fn download(&self, request: DownloadRequest) -> comms::Result<Option<Vec<u8>>> {
        let state = self.state.lock();
        let Some(run) = state.runs.iter().find(|r| r.id == request.run) else {
            return Ok(None);
        };

        let key = (run.batch, request.task_seq, request.round_seq, request.kind);
        let files: Vec<(String, Vec<u8>)> = match state.bundles.get(&key) {
            Some(files) if request.kind == BundleKind::Artifacts || request.all_runs => {
                files.clone()
            }
            Some(files) => files
                .iter()
                .filter(|(name, _)| name.starts_with(&format!("{}-", request.run)))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        Ok((!files.is_empty()).then(|| zip_files(&files)))
    }

    async fn upload(&self, request: UploadRequest) -> comms::Result<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(RouterErr::Http {
                status: 503,
                body: "unavailable".into(),
            });
        }

        let mut state = self.state.lock();
        let Some(batch) = state
            .runs
            .iter()
            .find(|r| r.id == request.run)
            .map(|r| r.batch)
        else {
            return Err(RouterErr::Http {
                status: 404,
                body: "no such run".into(),
            });
        };

        for file in &request.files {
            let kind = match file.field {
                UploadField::Artifacts => BundleKind::Artifacts,
                UploadField::MidArtifacts => BundleKind::MidArtifacts,
                UploadField::Logs => continue,
            };
            let files = state
                .bundles
                .entry((batch, request.task_seq, request.round_seq, kind))
                .or_default();
            files.retain(|(name, _)| *name != file.file_name);
            files.push((file.file_name.clone(), file.content.clone()));
        }

        state.uploads.push(request);
        Ok(())
    }

    async fn heartbeat(&self, site_uid: &str, status: SiteStatus) -> comms::Result<()> {
        if self.fail_heartbeats.load(Ordering::SeqCst) {
            return Err(RouterErr::Http {
                status: 503,
                body: "unavailable".into(),
            });
        }

        self.state
            .lock()
            .heartbeats
            .push((site_uid.to_string(), status));
        Ok(())
    }
}

pub fn task(model: &str, total_round: u32) -> Task {
    Task {
        seq: Some(1),
        model: model.into(),
        config: TaskConfig {
            total_round: Some(total_round),
            current_round: Some(1),
            extra: Default::default(),
        },
    }
}

pub fn run(id: u64, site: &str, role: Role, status: Status, tasks: Vec<Task>) -> Run {
    Run {
        id,
        site_uid: site.into(),
        role,
        status,
        batch: 1,
        project: 1,
        cur_seq: 1,
        tasks,
    }
}

/// Headerless binary classification table with two predictors and a label.
pub fn binary_dataset(n: usize, offset: usize) -> String {
    let mut text = String::new();
    for i in 0..n {
        let k = i + offset;
        let x1 = ((k * 37) % 101) as f64 / 50.0 - 1.0;
        let x2 = ((k * 53) % 97) as f64 / 48.0 - 1.0;
        let noise = 0.4 * (k as f64).sin();
        let y = u8::from(x1 + 0.5 * x2 + noise > 0.0);
        text.push_str(&format!("{x1:.4},{x2:.4},{y}\n"));
    }
    text
}

/// Two predictors with a noisy continuous response.
pub fn regression_dataset(n: usize, offset: usize) -> String {
    let mut text = String::new();
    for i in 0..n {
        let k = i + offset;
        let x1 = ((k * 37) % 101) as f64 / 50.0 - 1.0;
        let x2 = ((k * 53) % 97) as f64 / 48.0 - 1.0;
        let y = 1.5 + 2.0 * x1 - 0.5 * x2 + 0.1 * (k as f64).sin();
        text.push_str(&format!("{x1:.4},{x2:.4},{y:.4}\n"));
    }
    text
}

/// Same predictors with a label taking three values.
pub fn three_class_dataset(n: usize) -> String {
    let mut text = String::new();
    for i in 0..n {
        let x1 = ((i * 37) % 101) as f64 / 50.0 - 1.0;
        let x2 = ((i * 53) % 97) as f64 / 48.0 - 1.0;
        text.push_str(&format!("{x1:.4},{x2:.4},{}\n", i % 3));
    }
    text
}

/// Counts the calls a `Recorder` receives.
#[derive(Clone, Default)]
pub struct Calls {
    pub prepare: Arc<AtomicUsize>,
    pub validate: Arc<AtomicUsize>,
    pub training: Arc<AtomicUsize>,
    pub aggregate: Arc<AtomicUsize>,
    pub fail_training: Arc<AtomicBool>,
    /// Makes `do_aggregate` fail as if the router were unavailable.
    pub fail_aggregate: Arc<AtomicBool>,
    /// Holds `training` until `release` is notified, announcing it on `entered`.
    pub gated: Arc<AtomicBool>,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// A task model that only records how it is driven.
pub struct Recorder(pub Calls);

#[async_trait]
impl TaskModel for Recorder {
    async fn prepare_data(&mut self, _ctx: &TaskContext<'_>) -> controller::Result<()> {
        self.0.prepare.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn validate(&mut self, _ctx: &TaskContext<'_>) -> controller::Result<()> {
        self.0.validate.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn training(&mut self, _ctx: &TaskContext<'_>) -> controller::Result<()> {
        self.0.training.fetch_add(1, Ordering::SeqCst);
        if self.0.gated.load(Ordering::SeqCst) {
            self.0.entered.notify_one();
            self.0.release.notified().await;
        }
        if self.0.fail_training.load(Ordering::SeqCst) {
            return Err(ControllerErr::NoResults("recorded training"));
        }
        Ok(())
    }

    async fn do_aggregate(&mut self, _ctx: &TaskContext<'_>) -> controller::Result<()> {
        self.0.aggregate.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_aggregate.load(Ordering::SeqCst) {
            return Err(ControllerErr::Router(RouterErr::Http {
                status: 503,
                body: "unavailable".into(),
            }));
        }
        Ok(())
    }
}
