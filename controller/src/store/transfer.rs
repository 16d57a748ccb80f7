use std::path::PathBuf;

use comms::{BundleKind, DownloadRequest, Router, Run, UploadField, UploadFile, UploadRequest};
use log::debug;

use super::{ArtifactStore, FileKind, unpack};
use crate::{Result, error::ControllerErr};

/// What a round upload carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferScope {
    /// The site's own mid-artifact and round log.
    Round,
    /// The coordinator's finalized artifact.
    Aggregate,
}

/// Name under which a round file travels, e.g. `12-1-3-mid-artifacts`.
///
/// Bundles handed out by the router keep these names, which is what the
/// `-{seq}-{round}-{kind}` suffix lookups rely on.
pub fn transfer_name(run: u64, seq: usize, round: u32, kind: FileKind) -> String {
    format!("{run}{}", transfer_suffix(seq, round, kind))
}

/// Suffix matching the transfer name of any run's file for `(seq, round)`.
pub fn transfer_suffix(seq: usize, round: u32, kind: FileKind) -> String {
    let kind = match kind {
        FileKind::Logs => "logs",
        other => other.file_name(),
    };
    format!("-{seq}-{round}-{kind}")
}

/// Pushes the current round's local files to the router.
///
/// Having nothing to upload is a success; an upload the router rejects is not.
///
/// # Arguments
/// * `router` - The router to push to.
/// * `store` - The local store holding the round files.
/// * `run` - The run whose current round is uploaded.
/// * `scope` - Which files to send.
///
/// # Returns
/// Whether any file was sent.
pub async fn upload_round(
    router: &dyn Router,
    store: &ArtifactStore,
    run: &Run,
    scope: TransferScope,
) -> Result<bool> {
    let round = run
        .current_round()
        .ok_or(ControllerErr::NoRound { run: run.id })?;
    let seq = run.cur_seq;

    let kinds: &[(FileKind, UploadField)] = match scope {
        TransferScope::Round => &[
            (FileKind::MidArtifacts, UploadField::MidArtifacts),
            (FileKind::Logs, UploadField::Logs),
        ],
        TransferScope::Aggregate => &[(FileKind::Artifacts, UploadField::Artifacts)],
    };

    let mut files = Vec::with_capacity(kinds.len());
    for &(kind, field) in kinds {
        if let Some(content) = store.read_optional(run.id, seq, round, kind)? {
            files.push(UploadFile {
                field,
                file_name: transfer_name(run.id, seq, round, kind),
                content,
            });
        }
    }

    if files.is_empty() {
        debug!(run_id = run.id, seq = seq, round = round; "nothing to upload");
        return Ok(false);
    }

    router
        .upload(UploadRequest {
            run: run.id,
            task_seq: seq,
            round_seq: round,
            files,
        })
        .await?;

    debug!(run_id = run.id, seq = seq, round = round; "uploaded round files");
    Ok(true)
}

/// Fetches every site's mid-artifacts of the current round into the batch staging area.
///
/// # Errors
/// `ControllerErr::Missing` while the router has no bundle for the round.
pub async fn download_mid_artifacts(
    router: &dyn Router,
    store: &ArtifactStore,
    run: &Run,
) -> Result<PathBuf> {
    let round = run
        .current_round()
        .ok_or(ControllerErr::NoRound { run: run.id })?;

    let bundle = router
        .download(DownloadRequest {
            run: run.id,
            task_seq: run.cur_seq,
            round_seq: round,
            all_runs: true,
            kind: BundleKind::MidArtifacts,
        })
        .await?
        .ok_or(ControllerErr::Missing("mid-artifacts"))?;

    let dir = store.all_mid_artifacts_dir(run.project, run.batch);
    let files = unpack(&bundle, &dir)?;
    debug!(
        run_id = run.id, project = run.project, batch = run.batch;
        "staged {files} mid-artifact file(s) in {}", dir.display()
    );

    Ok(dir)
}

/// Fetches the finalized artifact of the round preceding the current one.
///
/// # Returns
/// The directory the artifact was unpacked into, `None` on the very first round.
///
/// # Errors
/// `ControllerErr::Missing` if the router has no artifact for that round.
pub async fn download_previous_artifact(
    router: &dyn Router,
    store: &ArtifactStore,
    run: &Run,
) -> Result<Option<PathBuf>> {
    let Some((seq, round)) = run.previous_seq_and_round() else {
        return Ok(None);
    };

    let bundle = router
        .download(DownloadRequest {
            run: run.id,
            task_seq: seq,
            round_seq: round,
            all_runs: false,
            kind: BundleKind::Artifacts,
        })
        .await?
        .ok_or(ControllerErr::Missing("artifacts"))?;

    let dir = store.downloaded_artifacts_dir(run.id, seq, round);
    unpack(&bundle, &dir)?;
    debug!(run_id = run.id, seq = seq, round = round; "downloaded previous artifact");

    Ok(Some(dir))
}
