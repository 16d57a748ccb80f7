use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use comms::{Run, Status};
use log::warn;
use parking_lot::RwLock;
use serde::Deserialize;

/// Prefix of every snapshot key.
pub const SNAPSHOT_PREFIX: &str = "starfish:controller:run:list:";
pub const SNAPSHOT_TTL: Duration = Duration::from_secs(86_400);

/// Key/value store with per entry expiry holding the last seen run snapshots.
pub trait SnapshotStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: String, ttl: Duration);

    /// Removes every key starting with `prefix`, returning how many were removed.
    fn delete_prefix(&self, prefix: &str) -> usize;
}

/// Process local `SnapshotStore`.
#[derive(Default)]
pub struct MemorySnapshotStore {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl SnapshotStore for MemorySnapshotStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read();
        let (value, expires) = entries.get(key)?;
        (Instant::now() < *expires).then(|| value.clone())
    }

    fn set(&self, key: &str, value: String, ttl: Duration) {
        self.entries
            .write()
            .insert(key.to_string(), (value, Instant::now() + ttl));
    }

    fn delete_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }
}

/// The part of a stored snapshot change detection looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RunSnapshot {
    pub status: Status,
}

/// Last seen state of every run, used to turn polls into change events.
#[derive(Clone)]
pub struct SnapshotCache {
    store: Arc<dyn SnapshotStore>,
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySnapshotStore::default()))
    }

    pub fn key(run: u64) -> String {
        format!("{SNAPSHOT_PREFIX}{run}")
    }

    /// The last snapshot of `run`. Unreadable entries count as absent.
    pub fn get(&self, run: u64) -> Option<RunSnapshot> {
        let raw = self.store.get(&Self::key(run))?;

        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(run_id = run; "discarding unreadable snapshot: {e}");
                None
            }
        }
    }

    /// Records `run` as last seen.
    pub fn put(&self, run: &Run) {
        match serde_json::to_string(run) {
            Ok(raw) => self.store.set(&Self::key(run.id), raw, SNAPSHOT_TTL),
            Err(e) => warn!(run_id = run.id; "cannot snapshot run: {e}"),
        }
    }

    /// Whether `run` differs from its snapshot. A missing snapshot is a change.
    pub fn has_changed(&self, run: &Run) -> bool {
        self.get(run.id).is_none_or(|snapshot| snapshot.status != run.status)
    }

    /// Forgets every snapshot.
    pub fn reset(&self) -> usize {
        self.store.delete_prefix(SNAPSHOT_PREFIX)
    }
}
