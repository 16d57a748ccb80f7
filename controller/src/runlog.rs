use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::Write,
};

use chrono::{SecondsFormat, Utc};
use log::{Level, log};
use parking_lot::Mutex;

use crate::store::{ArtifactStore, FileKind};

struct Sink {
    seq: usize,
    round: u32,
    file: Option<File>,
}

/// Per run logger that mirrors every message into the round's `logs.txt`.
///
/// Messages always reach the process logger; the round file is best-effort.
/// The file is swapped whenever the run moves to another `(seq, round)`.
pub struct RunLog {
    run_id: u64,
    store: ArtifactStore,
    sink: Mutex<Option<Sink>>,
}

impl RunLog {
    pub fn new(run_id: u64, store: ArtifactStore) -> Self {
        Self {
            run_id,
            store,
            sink: Mutex::new(None),
        }
    }

    /// Points the log at the given round, opening its file in append mode.
    pub fn attach(&self, seq: usize, round: u32) {
        let mut sink = self.sink.lock();
        if sink.as_ref().is_some_and(|s| s.seq == seq && s.round == round) {
            return;
        }

        let path = self.store.path(self.run_id, seq, round, FileKind::Logs);
        let file = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&path));

        let file = match file {
            Ok(file) => Some(file),
            Err(e) => {
                log::warn!(run_id = self.run_id; "cannot open {}: {e}", path.display());
                None
            }
        };

        *sink = Some(Sink { seq, round, file });
    }

    pub fn write(&self, level: Level, args: fmt::Arguments<'_>) {
        let mut sink = self.sink.lock();

        match sink.as_mut() {
            Some(Sink { seq, round, file }) => {
                log!(level, run_id = self.run_id, seq = *seq, round = *round; "{args}");

                if let Some(file) = file {
                    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
                    if let Err(e) = writeln!(file, "{stamp} [{level}] {args}") {
                        log::warn!(run_id = self.run_id; "cannot append to round log: {e}");
                    }
                }
            }
            None => log!(level, run_id = self.run_id; "{args}"),
        }
    }

    pub fn debug(&self, msg: impl fmt::Display) {
        self.write(Level::Debug, format_args!("{msg}"));
    }

    pub fn info(&self, msg: impl fmt::Display) {
        self.write(Level::Info, format_args!("{msg}"));
    }

    pub fn warn(&self, msg: impl fmt::Display) {
        self.write(Level::Warn, format_args!("{msg}"));
    }

    pub fn error(&self, msg: impl fmt::Display) {
        self.write(Level::Error, format_args!("{msg}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_to_the_attached_round() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let log = RunLog::new(5, store.clone());

        log.info("before any round");
        log.attach(1, 1);
        log.info("first");
        log.warn(format!("second {}", 2));
        log.attach(1, 2);
        log.error("third");

        let first = store.tail_logs(5, 1, 1, 0).unwrap();
        assert_eq!(first.len(), 2);
        assert!(first[0].ends_with("[INFO] first"));
        assert!(first[1].ends_with("[WARN] second 2"));
        assert_eq!(store.tail_logs(5, 1, 2, 0).unwrap().len(), 1);
    }
}
