//! Registry counters.
//!
//! All counters are monotonically increasing [`AtomicU64`]s updated with
//! `Ordering::Relaxed`. Each counter is independent, so a [`snapshot`]
//! taken while operations are in flight may show counters that are slightly
//! out of step with one another. That is acceptable for telemetry.
//!
//! [`snapshot`]: RegistryMetrics::snapshot

use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters for one registry instance.
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    tickets_added: AtomicU64,
    tickets_read: AtomicU64,
    tickets_consumed: AtomicU64,
    consumption_races_lost: AtomicU64,
    expired_on_read: AtomicU64,
    cascade_deletes: AtomicU64,
    tickets_deleted: AtomicU64,
    cleaner_runs: AtomicU64,
    cleaner_failures: AtomicU64,
}

/// Point-in-time copy of [`RegistryMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryMetricsSnapshot {
    /// Tickets stored by `add_ticket`.
    pub tickets_added: u64,
    /// Successful reads, including the read half of every touch.
    pub tickets_read: u64,
    /// Tickets removed because their use quota ran out.
    pub tickets_consumed: u64,
    /// Consumptions that lost the compare-and-delete race.
    pub consumption_races_lost: u64,
    /// Reads that found an expired ticket and reported it as missing.
    pub expired_on_read: u64,
    /// Calls to `delete_ticket` that removed at least one record.
    pub cascade_deletes: u64,
    /// Records removed by cascades, counted individually.
    pub tickets_deleted: u64,
    /// Completed cleaner passes.
    pub cleaner_runs: u64,
    /// Per-ticket failures seen by the cleaner.
    pub cleaner_failures: u64,
}

impl RegistryMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_added(&self) {
        self.tickets_added.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self) {
        self.tickets_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_consumed(&self) {
        self.tickets_consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_race_lost(&self) {
        self.consumption_races_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expired_on_read(&self) {
        self.expired_on_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cascade(&self, removed: usize) {
        if removed == 0 {
            return;
        }
        self.cascade_deletes.fetch_add(1, Ordering::Relaxed);
        self.tickets_deleted.fetch_add(removed as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_cleaner_run(&self, failures: usize) {
        self.cleaner_runs.fetch_add(1, Ordering::Relaxed);
        self.cleaner_failures.fetch_add(failures as u64, Ordering::Relaxed);
    }

    /// Reads every counter.
    #[must_use]
    pub fn snapshot(&self) -> RegistryMetricsSnapshot {
        RegistryMetricsSnapshot {
            tickets_added: self.tickets_added.load(Ordering::Relaxed),
            tickets_read: self.tickets_read.load(Ordering::Relaxed),
            tickets_consumed: self.tickets_consumed.load(Ordering::Relaxed),
            consumption_races_lost: self.consumption_races_lost.load(Ordering::Relaxed),
            expired_on_read: self.expired_on_read.load(Ordering::Relaxed),
            cascade_deletes: self.cascade_deletes.load(Ordering::Relaxed),
            tickets_deleted: self.tickets_deleted.load(Ordering::Relaxed),
            cleaner_runs: self.cleaner_runs.load(Ordering::Relaxed),
            cleaner_failures: self.cleaner_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn empty_cascades_are_not_counted() {
        let metrics = RegistryMetrics::new();
        metrics.record_cascade(0);
        metrics.record_cascade(3);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cascade_deletes, 1);
        assert_eq!(snapshot.tickets_deleted, 3);
    }

    #[test]
    fn cleaner_runs_accumulate_failures() {
        let metrics = RegistryMetrics::new();
        metrics.record_cleaner_run(0);
        metrics.record_cleaner_run(2);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cleaner_runs, 2);
        assert_eq!(snapshot.cleaner_failures, 2);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let metrics = Arc::new(RegistryMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.record_read();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.snapshot().tickets_read, 8000);
    }
}
