//! Round addressed local storage of datasets, logs and artifacts.

mod bundle;
mod transfer;

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::de::DeserializeOwned;

pub use bundle::unpack;
pub use transfer::{
    TransferScope, download_mid_artifacts, download_previous_artifact, transfer_name,
    transfer_suffix, upload_round,
};

use crate::{
    Result,
    error::{ControllerErr, StoreErr},
};

/// The files a run produces in every round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Logs,
    MidArtifacts,
    Artifacts,
}

impl FileKind {
    pub fn file_name(self) -> &'static str {
        match self {
            FileKind::Logs => "logs.txt",
            FileKind::MidArtifacts => "mid-artifacts",
            FileKind::Artifacts => "artifacts",
        }
    }
}

/// Filesystem layout rooted at the controller's data directory.
///
/// * `{root}/{run}/dataset`
/// * `{root}/{run}/{seq}/{round}/{logs.txt | mid-artifacts | artifacts}`
/// * `{root}/artifacts/{run}/{seq}/{round}/` for downloaded finalized artifacts
/// * `{root}/all-mid-artifacts/{project}/{batch}/` for the coordinator's staging area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, run: u64, seq: usize, round: u32, kind: FileKind) -> PathBuf {
        self.round_dir(run, seq, round).join(kind.file_name())
    }

    pub fn round_dir(&self, run: u64, seq: usize, round: u32) -> PathBuf {
        self.root
            .join(run.to_string())
            .join(seq.to_string())
            .join(round.to_string())
    }

    pub fn dataset_path(&self, run: u64) -> PathBuf {
        self.root.join(run.to_string()).join("dataset")
    }

    pub fn downloaded_artifacts_dir(&self, run: u64, seq: usize, round: u32) -> PathBuf {
        self.root
            .join("artifacts")
            .join(run.to_string())
            .join(seq.to_string())
            .join(round.to_string())
    }

    pub fn all_mid_artifacts_dir(&self, project: u64, batch: u64) -> PathBuf {
        self.root
            .join("all-mid-artifacts")
            .join(project.to_string())
            .join(batch.to_string())
    }

    /// Stores a run's dataset, replacing any previous one.
    pub fn save_dataset(&self, run: u64, content: &[u8]) -> Result<PathBuf> {
        let path = self.dataset_path(run);
        write_file(&path, content)?;
        Ok(path)
    }

    /// Reads a run's dataset as text.
    ///
    /// # Errors
    /// `StoreErr::NotFound` until the dataset has been submitted.
    pub fn read_dataset(&self, run: u64) -> Result<String> {
        let path = self.dataset_path(run);
        fs::read_to_string(&path).map_err(|e| StoreErr::io(path, e).into())
    }

    /// Writes a round file, creating its directories.
    pub fn write(
        &self,
        run: u64,
        seq: usize,
        round: u32,
        kind: FileKind,
        content: &[u8],
    ) -> Result<PathBuf> {
        let path = self.path(run, seq, round, kind);
        write_file(&path, content)?;
        Ok(path)
    }

    /// Reads a round file, `None` if it was never written.
    pub fn read_optional(
        &self,
        run: u64,
        seq: usize,
        round: u32,
        kind: FileKind,
    ) -> Result<Option<Vec<u8>>> {
        let path = self.path(run, seq, round, kind);
        match fs::read(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreErr::io(path, e).into()),
        }
    }

    /// Returns the lines of a round log starting at `from_line` (0 based).
    ///
    /// # Errors
    /// `StoreErr::NotFound` if the round has no log.
    pub fn tail_logs(&self, run: u64, seq: usize, round: u32, from_line: usize) -> Result<Vec<String>> {
        let path = self.path(run, seq, round, FileKind::Logs);
        let text = fs::read_to_string(&path).map_err(|e| StoreErr::io(path, e))?;

        Ok(text.lines().skip(from_line).map(str::to_string).collect())
    }
}

/// Creates `path`'s parent directories, then writes `content` to it.
pub(crate) fn write_file(path: &Path, content: &[u8]) -> std::result::Result<(), StoreErr> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreErr::io(parent, e))?;
    }

    fs::write(path, content).map_err(|e| StoreErr::io(path, e))
}

/// Recursively collects the files below `dir` whose name ends with `suffix`, sorted.
///
/// A missing directory yields no files.
pub fn find_suffixed(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(StoreErr::io(current, e).into()),
        };

        for entry in entries {
            let entry = entry.map_err(|e| StoreErr::io(&current, e))?;
            let path = entry.path();

            if path.is_dir() {
                pending.push(path);
            } else if path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(suffix))
            {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Decodes a file holding one JSON object per line.
pub fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let text = fs::read_to_string(path).map_err(|e| StoreErr::io(path, e))?;

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(ControllerErr::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lays_out_round_paths() {
        let store = ArtifactStore::new("/data");

        assert_eq!(
            store.path(4, 1, 2, FileKind::MidArtifacts),
            PathBuf::from("/data/4/1/2/mid-artifacts")
        );
        assert_eq!(store.path(4, 1, 2, FileKind::Logs), PathBuf::from("/data/4/1/2/logs.txt"));
        assert_eq!(store.dataset_path(4), PathBuf::from("/data/4/dataset"));
        assert_eq!(
            store.downloaded_artifacts_dir(4, 1, 2),
            PathBuf::from("/data/artifacts/4/1/2")
        );
        assert_eq!(
            store.all_mid_artifacts_dir(9, 3),
            PathBuf::from("/data/all-mid-artifacts/9/3")
        );
    }

    #[test]
    fn writes_and_reads_round_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        assert_eq!(store.read_optional(1, 1, 1, FileKind::Artifacts).unwrap(), None);
        store.write(1, 1, 1, FileKind::Artifacts, b"{}").unwrap();
        assert_eq!(
            store.read_optional(1, 1, 1, FileKind::Artifacts).unwrap(),
            Some(b"{}".to_vec())
        );

        assert!(matches!(
            store.read_dataset(1),
            Err(ControllerErr::Store(StoreErr::NotFound(_)))
        ));
        store.save_dataset(1, b"1,2,0\n").unwrap();
        assert_eq!(store.read_dataset(1).unwrap(), "1,2,0\n");
    }

    #[test]
    fn tails_logs_from_a_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        assert!(matches!(
            store.tail_logs(1, 1, 1, 0),
            Err(ControllerErr::Store(StoreErr::NotFound(_)))
        ));

        store.write(1, 1, 1, FileKind::Logs, b"a\nb\nc\n").unwrap();
        assert_eq!(store.tail_logs(1, 1, 1, 1).unwrap(), vec!["b", "c"]);
        assert!(store.tail_logs(1, 1, 1, 9).unwrap().is_empty());
    }

    #[test]
    fn finds_suffixed_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("x").join("y");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("7-1-2-mid-artifacts"), "{}").unwrap();
        fs::write(dir.path().join("8-1-2-mid-artifacts"), "{}").unwrap();
        fs::write(dir.path().join("8-1-1-mid-artifacts"), "{}").unwrap();

        let found = find_suffixed(dir.path(), "-1-2-mid-artifacts").unwrap();

        assert_eq!(found.len(), 2);
        assert!(find_suffixed(&dir.path().join("missing"), "x").unwrap().is_empty());
    }

    #[test]
    fn reads_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines");
        fs::write(&path, "{\"a\": 1}\n\n{\"a\": 2}\n").unwrap();

        let values: Vec<serde_json::Value> = read_json_lines(&path).unwrap();

        assert_eq!(values.len(), 2);
        assert_eq!(values[1]["a"], 2);
    }
}
