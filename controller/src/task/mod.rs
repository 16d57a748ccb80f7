//! The task-model contract every federated model implements, and its registry.

mod linear;
mod logistic;
mod logistic_stats;
mod ordinal;
mod registry;

use std::path::PathBuf;

use async_trait::async_trait;
use comms::{Router, Run};
use machine_learning::dataset::Dataset;
use serde::{Serialize, de::DeserializeOwned};

pub use linear::{LinearArtifact, LinearTask};
pub use logistic::{LogisticArtifact, LogisticTask};
pub use logistic_stats::{LogisticStatsAggregate, LogisticStatsArtifact, LogisticStatsTask};
pub use ordinal::{OrdinalAggregate, OrdinalArtifact, OrdinalTask};
pub use registry::{Factory, Registry};

use crate::{
    Result,
    error::ControllerErr,
    runlog::RunLog,
    store::{
        ArtifactStore, FileKind, TransferScope, download_previous_artifact, find_suffixed,
        read_json_lines, transfer_suffix, upload_round,
    },
};

/// Below this many rows the statistical families warn about disclosure risk.
pub const MIN_SAMPLE_SIZE: usize = 30;

/// Everything a task model may touch while handling one tick of a run.
pub struct TaskContext<'a> {
    pub run: &'a Run,
    pub store: &'a ArtifactStore,
    pub router: &'a dyn Router,
    pub log: &'a RunLog,
}

impl TaskContext<'_> {
    /// The current round of the run.
    ///
    /// # Errors
    /// `ControllerErr::NoRound` if the task carries no round bookkeeping.
    pub fn round(&self) -> Result<u32> {
        self.run
            .current_round()
            .ok_or(ControllerErr::NoRound { run: self.run.id })
    }

    /// Reads and parses the run's dataset.
    pub fn load_dataset(&self) -> Result<Dataset> {
        let text = self.store.read_dataset(self.run.id)?;
        let (dataset, dropped) = Dataset::parse(&text)?;

        if !dropped.is_empty() {
            self.log
                .warn(format!("dropped non numeric feature columns {dropped:?}"));
        }
        self.log.debug(format!(
            "loaded {} rows with {} features",
            dataset.len(),
            dataset.n_features()
        ));

        Ok(dataset)
    }

    /// Persists this site's result for the current round.
    pub fn save_mid_artifact<T: Serialize>(&self, value: &T) -> Result<PathBuf> {
        self.save(FileKind::MidArtifacts, value)
    }

    /// Persists the combined result for the current round.
    pub fn save_artifact<T: Serialize>(&self, value: &T) -> Result<PathBuf> {
        self.save(FileKind::Artifacts, value)
    }

    fn save<T: Serialize>(&self, kind: FileKind, value: &T) -> Result<PathBuf> {
        let round = self.round()?;
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');

        let path = self
            .store
            .write(self.run.id, self.run.cur_seq, round, kind, &line)?;
        self.log.info(format!("saved {}", path.display()));
        Ok(path)
    }

    /// Reads every site's mid-artifact of the current round from the batch staging area.
    ///
    /// # Errors
    /// `ControllerErr::NoResults` if none is staged.
    pub fn read_mid_artifacts<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let round = self.round()?;
        let dir = self
            .store
            .all_mid_artifacts_dir(self.run.project, self.run.batch);
        let suffix = transfer_suffix(self.run.cur_seq, round, FileKind::MidArtifacts);

        let mut results = Vec::new();
        for path in find_suffixed(&dir, &suffix)? {
            results.extend(read_json_lines::<T>(&path)?);
        }

        if results.is_empty() {
            return Err(ControllerErr::NoResults("mid-artifacts"));
        }

        self.log.debug(format!("read {} mid-artifact(s)", results.len()));
        Ok(results)
    }

    /// Reads the finalized artifact of the previous round, `None` on the first
    /// round or when it was never downloaded.
    pub fn read_previous_artifact<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let Some((seq, round)) = self.run.previous_seq_and_round() else {
            return Ok(None);
        };

        let dir = self.store.downloaded_artifacts_dir(self.run.id, seq, round);
        let suffix = transfer_suffix(seq, round, FileKind::Artifacts);

        let mut latest = None;
        for path in find_suffixed(&dir, &suffix)? {
            if let Some(value) = read_json_lines::<T>(&path)?.pop() {
                latest = Some(value);
            }
        }

        if latest.is_none() {
            self.log
                .warn(format!("no artifact of seq {seq} round {round} found locally"));
        }
        Ok(latest)
    }

    /// Pushes the combined artifact of the current round to the router.
    pub async fn upload_artifact(&self) -> Result<()> {
        upload_round(self.router, self.store, self.run, TransferScope::Aggregate).await?;
        Ok(())
    }

    pub(crate) fn warn_small_sample(&self, n: usize) {
        if n < MIN_SAMPLE_SIZE {
            self.log.warn(format!(
                "sample size {n} is below the minimum of {MIN_SAMPLE_SIZE}, results may disclose individual records"
            ));
        }
    }
}

/// A federated model bound to one `(run, seq)`.
///
/// Each step reports failure through its `Err`; the run state machine routes
/// failures to the matching status.
#[async_trait]
pub trait TaskModel: Send + Sync {
    /// Loads and splits the dataset and warm starts from the previous round.
    async fn prepare_data(&mut self, ctx: &TaskContext<'_>) -> Result<()>;

    /// Fetches the previous round's finalized artifact.
    async fn validate(&mut self, ctx: &TaskContext<'_>) -> Result<()> {
        let round = ctx.round()?;
        ctx.log.debug(format!(
            "run {} task {} round {round} begins",
            ctx.run.id, ctx.run.cur_seq
        ));

        if let Some(dir) = download_previous_artifact(ctx.router, ctx.store, ctx.run).await? {
            ctx.log.debug(format!("previous artifact in {}", dir.display()));
        }
        Ok(())
    }

    /// Fits the local model and saves this site's mid-artifact.
    async fn training(&mut self, ctx: &TaskContext<'_>) -> Result<()>;

    /// Combines every site's mid-artifact, saves and uploads the artifact.
    async fn do_aggregate(&mut self, ctx: &TaskContext<'_>) -> Result<()>;
}
