use std::fmt;
use std::ops::AddAssign;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counts of a single pass (or batch) of the state machine loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub fetched: u64,
    pub advanced: u64,
    pub retried: u64,
    pub delayed: u64,
    pub failed: u64,
    pub conflicts: u64,
    pub errors: u64,
    pub released: u64,
}

impl PassStats {
    pub fn is_idle(&self) -> bool {
        self.fetched == 0
    }
}

impl AddAssign for PassStats {
    fn add_assign(&mut self, rhs: Self) {
        self.fetched += rhs.fetched;
        self.advanced += rhs.advanced;
        self.retried += rhs.retried;
        self.delayed += rhs.delayed;
        self.failed += rhs.failed;
        self.conflicts += rhs.conflicts;
        self.errors += rhs.errors;
        self.released += rhs.released;
    }
}

impl fmt::Display for PassStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched={}, advanced={}, retried={}, delayed={}, failed={}, conflicts={}, errors={}, released={}",
            self.fetched,
            self.advanced,
            self.retried,
            self.delayed,
            self.failed,
            self.conflicts,
            self.errors,
            self.released
        )
    }
}

/// Cumulative counters of a running state machine, shared with its handle.
#[derive(Debug, Default)]
pub struct ManagerStats {
    passes: AtomicU64,
    fetched: AtomicU64,
    advanced: AtomicU64,
    retried: AtomicU64,
    delayed: AtomicU64,
    failed: AtomicU64,
    conflicts: AtomicU64,
    errors: AtomicU64,
    released: AtomicU64,
}

impl ManagerStats {
    pub fn incr_passes(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record(&self, stats: &PassStats) {
        self.fetched.fetch_add(stats.fetched, Ordering::Relaxed);
        self.advanced.fetch_add(stats.advanced, Ordering::Relaxed);
        self.retried.fetch_add(stats.retried, Ordering::Relaxed);
        self.delayed.fetch_add(stats.delayed, Ordering::Relaxed);
        self.failed.fetch_add(stats.failed, Ordering::Relaxed);
        self.conflicts.fetch_add(stats.conflicts, Ordering::Relaxed);
        self.errors.fetch_add(stats.errors, Ordering::Relaxed);
        self.released.fetch_add(stats.released, Ordering::Relaxed);
    }

    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Entities that left the loop with a persisted outcome. Delays do not count.
    pub fn progress(&self) -> u64 {
        self.advanced.load(Ordering::Relaxed)
            + self.retried.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
    }

    /// Get snapshot of the totals
    pub fn snapshot(&self) -> PassStats {
        PassStats {
            fetched: self.fetched.load(Ordering::Relaxed),
            advanced: self.advanced.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            delayed: self.delayed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates() {
        let stats = ManagerStats::default();
        let pass = PassStats {
            fetched: 3,
            advanced: 2,
            retried: 1,
            ..Default::default()
        };
        stats.record(&pass);
        stats.record(&pass);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.fetched, 6);
        assert_eq!(snapshot.advanced, 4);
        assert_eq!(snapshot.retried, 2);
        assert_eq!(snapshot.failed, 0);
    }

    #[test]
    fn test_add_assign_and_idle() {
        let mut total = PassStats::default();
        assert!(total.is_idle());
        total += PassStats {
            fetched: 1,
            delayed: 1,
            ..Default::default()
        };
        assert!(!total.is_idle());
        assert_eq!(total.to_string(), "fetched=1, advanced=0, retried=0, delayed=1, failed=0, conflicts=0, errors=0, released=0");
    }
}
