//! In-flight work accounting.
//!
//! Counters are written only by the dispatch/complete pair and by an explicit
//! reset. Everyone else reads snapshots.

use relay_common::InterceptionId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Read-only copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    /// Items that finished with a reply.
    pub replays: u64,
    /// Items that finished with a reject.
    pub errors: u64,
    /// Items dispatched but not yet completed.
    pub queue_current: u64,
    /// High-water mark of `queue_current`.
    pub queue_max: u64,
}

impl CountersSnapshot {
    /// Items that reached a terminal outcome.
    pub fn total(&self) -> u64 {
        self.replays + self.errors
    }
}

#[derive(Debug, Default)]
struct Counters {
    snapshot: CountersSnapshot,
    started_at: HashMap<InterceptionId, Instant>,
}

#[derive(Debug, Default)]
pub struct WorkAccounting {
    inner: Mutex<Counters>,
}

impl WorkAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        // A panic while holding the lock cannot leave the counters torn.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a newly dispatched item.
    pub fn dispatch(&self, id: &InterceptionId) {
        let mut counters = self.lock();
        counters.snapshot.queue_current += 1;
        counters.snapshot.queue_max = counters
            .snapshot
            .queue_max
            .max(counters.snapshot.queue_current);
        counters.started_at.insert(id.clone(), Instant::now());
    }

    /// Record a terminal outcome; returns how long the item was in flight.
    ///
    /// The start time is absent when a reset happened while the item was
    /// in flight. Such an item no longer counts toward `queue_current`, so
    /// only its outcome is recorded.
    pub fn complete(&self, id: &InterceptionId, success: bool) -> Option<Duration> {
        let mut counters = self.lock();
        let started = counters.started_at.remove(id);
        if started.is_some() {
            counters.snapshot.queue_current = counters.snapshot.queue_current.saturating_sub(1);
        }
        if success {
            counters.snapshot.replays += 1;
        } else {
            counters.snapshot.errors += 1;
        }
        started.map(|started| started.elapsed())
    }

    /// Zero every counter.
    pub fn reset(&self) {
        let mut counters = self.lock();
        counters.snapshot = CountersSnapshot::default();
        counters.started_at.clear();
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        self.lock().snapshot
    }

    /// Ids currently in flight, oldest first.
    pub fn in_flight(&self) -> Vec<(InterceptionId, Duration)> {
        let counters = self.lock();
        let mut items: Vec<_> = counters
            .started_at
            .iter()
            .map(|(id, started)| (id.clone(), started.elapsed()))
            .collect();
        items.sort_by(|a, b| b.1.cmp(&a.1));
        items
    }
}
