//! Per-key scheduled-task table with cancel-and-reschedule semantics.
//!
//! The table only tracks deadlines. Whoever drains it reads the current
//! state of the keyed object, so the value seen is the latest one at the
//! time the deadline fires.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct Debouncer<K> {
    window: Duration,
    pending: HashMap<K, (Instant, u64)>,
    sequence: u64,
}

impl<K: Eq + Hash + Clone> Debouncer<K> {
    /// An empty table with deadlines `window` after scheduling.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            sequence: 0,
        }
    }

    /// Coalescing window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of scheduled keys.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether `key` is scheduled.
    pub fn contains(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    /// Schedule `key` one window from now, pushing back an earlier schedule.
    pub fn schedule(&mut self, key: K) {
        self.schedule_at(key, Instant::now());
    }

    /// Schedule `key` one window after `now`.
    pub fn schedule_at(&mut self, key: K, now: Instant) {
        self.sequence += 1;
        self.pending.insert(key, (now + self.window, self.sequence));
    }

    /// Drop `key`. Returns whether it was scheduled.
    pub fn cancel(&mut self, key: &K) -> bool {
        self.pending.remove(key).is_some()
    }

    /// Drop every key matching `f`.
    pub fn cancel_where(&mut self, mut f: impl FnMut(&K) -> bool) -> usize {
        let before = self.pending.len();
        self.pending.retain(|k, _| !f(k));
        before - self.pending.len()
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|(deadline, _)| *deadline).min()
    }

    /// Remove and return the keys whose deadline has passed, in the order
    /// they were last scheduled.
    pub fn take_due(&mut self, now: Instant) -> Vec<K> {
        let mut due: Vec<(K, u64)> = self
            .pending
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(k, (_, seq))| (k.clone(), *seq))
            .collect();
        due.sort_by_key(|(_, seq)| *seq);
        for (key, _) in &due {
            self.pending.remove(key);
        }
        due.into_iter().map(|(k, _)| k).collect()
    }

    /// Remove and return every pending key regardless of deadline.
    pub fn drain_all(&mut self) -> Vec<K> {
        let mut all: Vec<(K, u64)> = self.pending.drain().map(|(k, (_, seq))| (k, seq)).collect();
        all.sort_by_key(|(_, seq)| *seq);
        all.into_iter().map(|(k, _)| k).collect()
    }

    /// Drop every key.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
