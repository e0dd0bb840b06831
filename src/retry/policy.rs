//! Entity retry policy
//!
//! Decides, from an entity's attempt counter and last transition timestamp,
//! whether it may be processed now, must wait out its backoff window, or has
//! used up its attempts.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::wait::{ExponentialWaitStrategy, FixedWaitStrategy, LinearWaitStrategy, WaitStrategy};
use crate::core_types::Millis;
use crate::entity::{Clock, StatefulEntity};

/// Outcome of a retry policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Proceed,
    Delay { until: Millis },
    Abandon,
}

/// Attempt counters of an entity, the only inputs a retry policy looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub state_count: u32,
    pub state_timestamp: Millis,
}

impl Attempt {
    pub fn of<P>(entity: &StatefulEntity<P>) -> Self {
        Self {
            state_count: entity.state_count(),
            state_timestamp: entity.state_timestamp(),
        }
    }
}

pub trait RetryPolicy: Send + Sync {
    /// End of the backoff window, `None` when no backoff applies.
    fn delay_until(&self, attempt: Attempt) -> Option<Millis>;

    /// True while the backoff window for the current attempt has not elapsed.
    fn should_delay(&self, attempt: Attempt) -> bool;

    /// True once the attempt counter reached the configured maximum.
    fn retries_exhausted(&self, attempt: Attempt) -> bool;

    /// Exhaustion first (terminal), then delay (defer), otherwise proceed.
    fn decide(&self, attempt: Attempt) -> RetryDecision {
        if self.retries_exhausted(attempt) {
            RetryDecision::Abandon
        } else if self.should_delay(attempt) {
            RetryDecision::Delay {
                until: self
                    .delay_until(attempt)
                    .unwrap_or(attempt.state_timestamp),
            }
        } else {
            RetryDecision::Proceed
        }
    }
}

/// Backoff keyed on `state_count`: the n-th failure waits
/// `wait.retry_in_millis(n - 1)` past the last transition.
pub struct EntityRetryPolicy {
    wait: Arc<dyn WaitStrategy>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl EntityRetryPolicy {
    pub fn new(wait: Arc<dyn WaitStrategy>, clock: Arc<dyn Clock>, max_attempts: u32) -> Self {
        Self {
            wait,
            clock,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl RetryPolicy for EntityRetryPolicy {
    fn delay_until(&self, attempt: Attempt) -> Option<Millis> {
        if attempt.state_count == 0 {
            return None;
        }
        let delay = self.wait.retry_in_millis(attempt.state_count - 1);
        let delay = Millis::try_from(delay).unwrap_or(Millis::MAX);
        Some(attempt.state_timestamp.saturating_add(delay))
    }

    fn should_delay(&self, attempt: Attempt) -> bool {
        let Some(until) = self.delay_until(attempt) else {
            return false;
        };
        let delay = until > self.clock.millis();
        if delay {
            debug!(
                state_count = attempt.state_count,
                until = until,
                "Attempt is in backoff"
            );
        }
        delay
    }

    fn retries_exhausted(&self, attempt: Attempt) -> bool {
        attempt.state_count >= self.max_attempts
    }
}

/// Shape of the backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Exponential,
    Linear,
    Fixed,
}

/// Retry configuration, loaded from the `retry` section of the app config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub strategy: BackoffKind,
    pub base_delay_ms: u64,
    pub multiplier: u32,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffKind::Exponential,
            base_delay_ms: 1_000,
            multiplier: 2,
            max_delay_ms: 60_000,
            max_attempts: 7,
        }
    }
}

impl RetryConfig {
    pub fn wait_strategy(&self) -> Arc<dyn WaitStrategy> {
        match self.strategy {
            BackoffKind::Exponential => Arc::new(ExponentialWaitStrategy::new(
                self.base_delay_ms,
                self.multiplier,
                self.max_delay_ms,
            )),
            BackoffKind::Linear => Arc::new(LinearWaitStrategy {
                step_ms: self.base_delay_ms,
                max_ms: self.max_delay_ms,
            }),
            BackoffKind::Fixed => Arc::new(FixedWaitStrategy(self.base_delay_ms)),
        }
    }

    pub fn build(&self, clock: Arc<dyn Clock>) -> EntityRetryPolicy {
        EntityRetryPolicy::new(self.wait_strategy(), clock, self.max_attempts)
    }
}
