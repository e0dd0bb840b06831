//! Per-state business actions

use async_trait::async_trait;

use crate::entity::StatefulEntity;
use crate::flow::{ResponseStatus, StatusResult};

/// What a processor reports back to the driver for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    /// Advance to the given state.
    Success(i32),
    /// Transient failure; stay in the current state and retry with backoff.
    Retry(String),
    /// Unrecoverable; move to the terminal failure state.
    Fatal(String),
}

impl ProcessResult {
    pub fn retry(reason: impl Into<String>) -> Self {
        ProcessResult::Retry(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        ProcessResult::Fatal(reason.into())
    }

    /// Map a flow status onto a driver result, advancing to `next_state` on success.
    pub fn from_status(result: StatusResult, next_state: i32) -> Self {
        match result {
            Ok(()) => ProcessResult::Success(next_state),
            Err(failure) => {
                let reason = failure.messages.join(", ");
                match failure.status {
                    ResponseStatus::ErrorRetry => ProcessResult::Retry(reason),
                    ResponseStatus::FatalError => ProcessResult::Fatal(reason),
                }
            }
        }
    }
}

/// Business action bound to one watched state.
///
/// Implementations may change the payload and trace context of the entity but
/// must leave the state fields alone: the driver applies the transition from
/// the returned [`ProcessResult`].
#[async_trait]
pub trait EntityProcessor<P>: Send + Sync
where
    P: Send + Sync,
{
    async fn process(&self, entity: &mut StatefulEntity<P>) -> ProcessResult;
}

/// Adapts a synchronous closure into an [`EntityProcessor`].
pub struct FnProcessor<F> {
    f: F,
}

impl<F> FnProcessor<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<P, F> EntityProcessor<P> for FnProcessor<F>
where
    P: Send + Sync,
    F: Fn(&mut StatefulEntity<P>) -> ProcessResult + Send + Sync,
{
    async fn process(&self, entity: &mut StatefulEntity<P>) -> ProcessResult {
        (self.f)(entity)
    }
}
