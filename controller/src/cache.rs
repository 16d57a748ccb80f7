use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use log::debug;
use parking_lot::Mutex;

/// Idle time after which a cached instance is dropped.
pub const INSTANCE_TTL: Duration = Duration::from_secs(86_400);

/// `(run id, task seq)`.
pub type InstanceKey = (u64, usize);

/// Set once the run is known to be finished; the owner stops notifying the router.
#[derive(Debug, Clone, Default)]
pub struct HaltFlag(Arc<AtomicBool>);

impl HaltFlag {
    pub fn halt(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_halted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct Entry<V> {
    value: Arc<V>,
    last_active: Instant,
    halt: HaltFlag,
}

/// Keeps one instance per `(run, seq)` alive between ticks.
///
/// Expired entries are swept on every lookup, there is no background task.
pub struct InstanceCache<V> {
    entries: Mutex<HashMap<InstanceKey, Entry<V>>>,
    ttl: Duration,
}

impl<V> Default for InstanceCache<V> {
    fn default() -> Self {
        Self::new(INSTANCE_TTL)
    }
}

impl<V> InstanceCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the instance of `key`, building it with `make` if absent.
    pub fn get_or_create<F>(&self, key: InstanceKey, make: F) -> Arc<V>
    where
        F: FnOnce(HaltFlag) -> V,
    {
        self.get_or_create_at(key, Instant::now(), make)
    }

    /// Same as `get_or_create` with an explicit clock.
    ///
    /// # Arguments
    /// * `key` - The `(run, seq)` pair.
    /// * `now` - The time the entry is marked active at.
    /// * `make` - Builds the instance, receiving the flag that halts it.
    ///
    /// # Returns
    /// A shared handle on the cached instance.
    pub fn get_or_create_at<F>(&self, key: InstanceKey, now: Instant, make: F) -> Arc<V>
    where
        F: FnOnce(HaltFlag) -> V,
    {
        let mut entries = self.entries.lock();

        let entry = entries.entry(key).or_insert_with(|| {
            let halt = HaltFlag::default();
            Entry {
                value: Arc::new(make(halt.clone())),
                last_active: now,
                halt,
            }
        });
        entry.last_active = now;
        let value = Arc::clone(&entry.value);

        let ttl = self.ttl;
        let before = entries.len();
        entries.retain(|_, e| now.saturating_duration_since(e.last_active) <= ttl);
        if entries.len() < before {
            debug!("evicted {} idle instance(s)", before - entries.len());
        }

        value
    }

    /// Marks `key` as active.
    pub fn touch(&self, key: InstanceKey) {
        self.touch_at(key, Instant::now());
    }

    pub fn touch_at(&self, key: InstanceKey, now: Instant) {
        if let Some(entry) = self.entries.lock().get_mut(&key) {
            entry.last_active = now;
        }
    }

    /// Halts every cached instance of `run`.
    ///
    /// # Returns
    /// How many instances were halted.
    pub fn halt_run(&self, run: u64) -> usize {
        let entries = self.entries.lock();
        let mut halted = 0;

        for ((id, _), entry) in entries.iter() {
            if *id == run && !entry.halt.is_halted() {
                entry.halt.halt();
                halted += 1;
            }
        }

        halted
    }

    /// Halts and drops the instances of every run `is_active` rejects.
    ///
    /// Jobs still holding a dropped instance finish their step without
    /// notifying. A run that shows up again gets a fresh instance.
    ///
    /// # Returns
    /// How many instances were retired.
    pub fn retire_inactive<F>(&self, is_active: F) -> usize
    where
        F: Fn(u64) -> bool,
    {
        let mut entries = self.entries.lock();
        let before = entries.len();

        entries.retain(|&(run, _), entry| {
            let active = is_active(run);
            if !active {
                entry.halt.halt();
            }
            active
        });

        before - entries.len()
    }

    pub fn contains(&self, key: InstanceKey) -> bool {
        self.entries.lock().contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn builds_once_per_key() {
        let cache = InstanceCache::<usize>::default();
        let built = AtomicUsize::new(0);
        let make = |_| built.fetch_add(1, Ordering::SeqCst);

        let a = cache.get_or_create((1, 1), make);
        let b = cache.get_or_create((1, 1), make);
        let c = cache.get_or_create((1, 2), make);

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*c, 1);
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn sweeps_idle_entries_on_lookup() {
        let cache = InstanceCache::<u8>::new(Duration::from_secs(10));
        let start = Instant::now();

        cache.get_or_create_at((1, 1), start, |_| 0);
        cache.get_or_create_at((2, 1), start + Duration::from_secs(5), |_| 0);
        cache.get_or_create_at((3, 1), start + Duration::from_secs(11), |_| 0);

        assert!(!cache.contains((1, 1)));
        assert!(cache.contains((2, 1)));
        assert!(cache.contains((3, 1)));

        cache.touch_at((2, 1), start + Duration::from_secs(20));
        cache.get_or_create_at((4, 1), start + Duration::from_secs(25), |_| 0);
        assert!(cache.contains((2, 1)));
        assert!(!cache.contains((3, 1)));
    }

    #[test]
    fn halting_a_run_flags_each_of_its_instances() {
        let cache = InstanceCache::<HaltFlag>::default();

        let first = cache.get_or_create((7, 1), |halt| halt);
        let second = cache.get_or_create((7, 2), |halt| halt);
        let other = cache.get_or_create((8, 1), |halt| halt);

        assert_eq!(cache.halt_run(7), 2);
        assert!(first.is_halted() && second.is_halted());
        assert!(!other.is_halted());
        assert_eq!(cache.halt_run(7), 0);
    }

    #[test]
    fn retiring_inactive_runs_halts_and_drops_them() {
        let cache = InstanceCache::<HaltFlag>::default();

        let gone = cache.get_or_create((7, 1), |halt| halt);
        let kept = cache.get_or_create((8, 1), |halt| halt);

        assert_eq!(cache.retire_inactive(|run| run == 8), 1);
        assert!(gone.is_halted());
        assert!(!kept.is_halted());
        assert!(!cache.contains((7, 1)));

        let fresh = cache.get_or_create((7, 1), |halt| halt);
        assert!(!fresh.is_halted());
    }
}
