//! Dispatch counters.
//!
//! Thread-safe tallies of what the dispatcher has seen and done. Counters are
//! relaxed atomics: they are read for reporting, never for synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Aggregated counters for one dispatcher.
#[derive(Debug, Default)]
pub struct DispatchStats {
    presses: AtomicU64,
    releases: AtomicU64,
    suppressed: AtomicU64,
    actions_fired: AtomicU64,
    action_failures: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub presses: u64,
    pub releases: u64,
    pub suppressed: u64,
    pub actions_fired: u64,
    pub action_failures: u64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_press(&self) {
        self.presses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an invoked action and whether it completed.
    pub fn record_action(&self, completed: bool) {
        self.actions_fired.fetch_add(1, Ordering::Relaxed);
        if !completed {
            self.action_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            presses: self.presses.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            actions_fired: self.actions_fired.load(Ordering::Relaxed),
            action_failures: self.action_failures.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Share of invoked actions that failed, 0.0 when nothing ran.
    pub fn failure_rate(&self) -> f32 {
        if self.actions_fired == 0 {
            return 0.0;
        }
        self.action_failures as f32 / self.actions_fired as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn records_actions_and_failures() {
        let stats = DispatchStats::new();
        stats.record_action(true);
        stats.record_action(false);
        stats.record_action(true);
        stats.record_action(false);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.actions_fired, 4);
        assert_eq!(snapshot.action_failures, 2);
        assert_eq!(snapshot.failure_rate(), 0.5);
    }

    #[test]
    fn empty_snapshot_has_zero_failure_rate() {
        assert_eq!(DispatchStats::new().snapshot().failure_rate(), 0.0);
    }

    #[test]
    fn counts_across_threads() {
        let stats = Arc::new(DispatchStats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = stats.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        stats.record_press();
                        stats.record_release();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.presses, 400);
        assert_eq!(snapshot.releases, 400);
        assert_eq!(snapshot.suppressed, 0);
    }
}
