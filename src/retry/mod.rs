//! Retry policy and backoff strategies for the state machine loop.

pub mod policy;
pub mod wait;

pub use policy::{Attempt, BackoffKind, EntityRetryPolicy, RetryConfig, RetryDecision, RetryPolicy};
pub use wait::{ExponentialWaitStrategy, FixedWaitStrategy, LinearWaitStrategy, WaitStrategy};
