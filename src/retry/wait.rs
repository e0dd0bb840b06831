//! Backoff wait strategies.

use serde::{Deserialize, Serialize};

/// Computes how long to wait before the next attempt, given the number of
/// failures recorded so far.
pub trait WaitStrategy: Send + Sync {
    fn retry_in_millis(&self, failures: u32) -> u64;
}

/// `base_ms * multiplier^failures`, capped at `max_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExponentialWaitStrategy {
    pub base_ms: u64,
    pub multiplier: u32,
    pub max_ms: u64,
}

impl ExponentialWaitStrategy {
    pub fn new(base_ms: u64, multiplier: u32, max_ms: u64) -> Self {
        Self {
            base_ms,
            multiplier,
            max_ms,
        }
    }
}

impl WaitStrategy for ExponentialWaitStrategy {
    fn retry_in_millis(&self, failures: u32) -> u64 {
        let factor = (self.multiplier as u64).saturating_pow(failures);
        self.base_ms.saturating_mul(factor).min(self.max_ms)
    }
}

/// `step_ms * (failures + 1)`, capped at `max_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearWaitStrategy {
    pub step_ms: u64,
    pub max_ms: u64,
}

impl WaitStrategy for LinearWaitStrategy {
    fn retry_in_millis(&self, failures: u32) -> u64 {
        self.step_ms
            .saturating_mul(failures as u64 + 1)
            .min(self.max_ms)
    }
}

/// Same wait after every failure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedWaitStrategy(pub u64);

impl WaitStrategy for FixedWaitStrategy {
    fn retry_in_millis(&self, _failures: u32) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_doubles_until_cap() {
        let wait = ExponentialWaitStrategy::new(1_000, 2, 60_000);

        assert_eq!(wait.retry_in_millis(0), 1_000);
        assert_eq!(wait.retry_in_millis(1), 2_000);
        assert_eq!(wait.retry_in_millis(2), 4_000);
        assert_eq!(wait.retry_in_millis(5), 32_000);
        assert_eq!(wait.retry_in_millis(6), 60_000);
        assert_eq!(wait.retry_in_millis(u32::MAX), 60_000);
    }

    #[test]
    fn test_linear_and_fixed() {
        let linear = LinearWaitStrategy {
            step_ms: 500,
            max_ms: 1_200,
        };
        assert_eq!(linear.retry_in_millis(0), 500);
        assert_eq!(linear.retry_in_millis(1), 1_000);
        assert_eq!(linear.retry_in_millis(2), 1_200);

        assert_eq!(FixedWaitStrategy(250).retry_in_millis(9), 250);
    }
}
