use async_trait::async_trait;
use serde::Serialize;

use crate::{Result, Run, Status};

/// Body of a status notification.
///
/// `update_all` applies the status to every run of the project batch and is only
/// honoured for coordinators. `increase_round` advances the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_all: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub increase_round: Option<bool>,
}

impl StatusUpdate {
    /// Updates only the notifying run.
    pub fn own(status: Status) -> Self {
        Self {
            status,
            update_all: None,
            increase_round: None,
        }
    }

    /// Updates every run of the batch.
    pub fn broadcast(status: Status) -> Self {
        Self {
            update_all: Some(true),
            ..Self::own(status)
        }
    }

    /// Marks the update as the start of the next round.
    pub fn next_round(mut self) -> Self {
        self.increase_round = Some(true);
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.update_all == Some(true)
    }

    pub fn increases_round(&self) -> bool {
        self.increase_round == Some(true)
    }
}

/// Which family of files a transfer bundle holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BundleKind {
    Artifacts,
    MidArtifacts,
}

impl BundleKind {
    /// The name the router uses for this kind, both as query value and multipart field.
    pub fn as_str(self) -> &'static str {
        match self {
            BundleKind::Artifacts => "artifacts",
            BundleKind::MidArtifacts => "mid_artifacts",
        }
    }
}

/// Query of `GET /runs-action/download/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadRequest {
    pub run: u64,
    pub task_seq: usize,
    pub round_seq: u32,
    /// Collect the files of every run in the batch rather than just `run`.
    pub all_runs: bool,
    pub kind: BundleKind,
}

/// A multipart field of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadField {
    Artifacts,
    MidArtifacts,
    Logs,
}

impl UploadField {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadField::Artifacts => BundleKind::Artifacts.as_str(),
            UploadField::MidArtifacts => BundleKind::MidArtifacts.as_str(),
            UploadField::Logs => "logs",
        }
    }
}

/// One file of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub field: UploadField,
    pub file_name: String,
    pub content: Vec<u8>,
}

/// Body of `POST /runs-action/upload/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub run: u64,
    pub task_seq: usize,
    pub round_seq: u32,
    pub files: Vec<UploadFile>,
}

/// Liveness value reported through the heartbeat endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SiteStatus {
    Exited = 0,
    Alive = 1,
}

/// Everything a site controller needs from the central router.
///
/// All calls are blocking from the caller's point of view; implementations are
/// expected to bound them in time.
#[async_trait]
pub trait Router: Send + Sync {
    /// Runs visible to this site that are still active.
    async fn active_runs(&self) -> Result<Vec<Run>>;

    /// Every run of a project batch, as seen by `site_uid`.
    async fn batch_runs(&self, batch: u64, project: u64, site_uid: &str) -> Result<Vec<Run>>;

    /// Moves `run` (or the whole batch, see `StatusUpdate`) to a new status.
    async fn update_status(&self, run: u64, update: StatusUpdate) -> Result<()>;

    /// Fetches a zip bundle, `None` when the router has nothing for the request.
    async fn download(&self, request: DownloadRequest) -> Result<Option<Vec<u8>>>;

    /// Pushes local round files to the router.
    async fn upload(&self, request: UploadRequest) -> Result<()>;

    /// Reports site liveness.
    async fn heartbeat(&self, site_uid: &str, status: SiteStatus) -> Result<()>;
}
