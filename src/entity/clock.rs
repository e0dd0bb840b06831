//! Time source for state transitions, leases and backoff math.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::core_types::Millis;

/// Source of epoch milliseconds.
pub trait Clock: Send + Sync {
    fn millis(&self) -> Millis;
}

/// Wall clock backed by `chrono::Utc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn millis(&self) -> Millis {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven clock.
///
/// Lets tests and simulations step through lease expiry and backoff windows
/// without sleeping.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, millis: Millis) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: Millis) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn millis(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}
