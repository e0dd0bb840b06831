//! State Machine Manager
//!
//! Polls the store for entities in each watched state, leases a batch, runs the
//! processor registered for that state and persists the resulting transition.
//!
//! # Per-entity flow
//!
//! ```text
//! leased entity
//!   ├─ retries exhausted ──────────────► failure state, save
//!   ├─ in backoff ─────────────────────► release lease, untouched
//!   └─ process
//!        ├─ Success(next) ─────────────► transition_to(next), save
//!        ├─ Retry(reason) ─► record_retry
//!        │                     ├─ exhausted ► failure state, save
//!        │                     └─ else ─────► save (same state)
//!        └─ Fatal(reason) ─────────────► failure state, save
//! ```
//!
//! Workers sharing a store are kept apart by leases only. A save that loses the
//! optimistic version check, or finds its expired lease taken over, is logged
//! and skipped; the next poll picks the entity up again.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::processor::{EntityProcessor, ProcessResult};
use super::stats::{ManagerStats, PassStats};
use crate::entity::{Clock, StatefulEntity, SystemClock};
use crate::error::{EngineError, panic_message};
use crate::retry::{Attempt, RetryConfig, RetryDecision, RetryPolicy};
use crate::store::{StateEntityStore, StoreError};

/// Reason recorded on entities that ran out of attempts.
pub const RETRIES_EXHAUSTED: &str = "retries exhausted";

/// Configuration of one state machine loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMachineConfig {
    /// Name used in logs
    pub name: String,
    /// Maximum entities leased per state and pass
    pub batch_size: usize,
    /// Wait between passes that found work but made no progress
    pub poll_interval_ms: u64,
    /// Upper bound of the idle backoff
    pub idle_backoff_max_ms: u64,
    /// Bound on every store call
    pub store_timeout_ms: u64,
    /// Batches processed concurrently
    pub max_inflight_batches: usize,
    /// Domain code of the terminal failure state
    pub failure_state: i32,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            name: "state-machine".to_string(),
            batch_size: 5,
            poll_interval_ms: 1_000,
            idle_backoff_max_ms: 10_000,
            store_timeout_ms: 5_000,
            max_inflight_batches: 4,
            failure_state: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Advanced,
    Retried,
    Delayed,
    Failed,
    Conflict,
    Error,
}

impl Outcome {
    fn count(self, stats: &mut PassStats) {
        match self {
            Outcome::Advanced => stats.advanced += 1,
            Outcome::Retried => stats.retried += 1,
            Outcome::Delayed => stats.delayed += 1,
            Outcome::Failed => stats.failed += 1,
            Outcome::Conflict => stats.conflicts += 1,
            Outcome::Error => stats.errors += 1,
        }
    }
}

struct Inner<P> {
    config: StateMachineConfig,
    store: Arc<dyn StateEntityStore<P>>,
    retry: Arc<dyn RetryPolicy>,
    clock: Arc<dyn Clock>,
    processors: Vec<(i32, Arc<dyn EntityProcessor<P>>)>,
    stats: Arc<ManagerStats>,
}

/// Drives entities of the watched states through their processors.
pub struct StateMachineManager<P> {
    inner: Arc<Inner<P>>,
}

impl<P> StateMachineManager<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub fn builder(store: Arc<dyn StateEntityStore<P>>) -> StateMachineBuilder<P> {
        StateMachineBuilder::new(store)
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &StateMachineConfig {
        &self.inner.config
    }

    /// Watched states in registration order.
    pub fn watched_states(&self) -> Vec<i32> {
        self.inner.watched_states()
    }

    /// Totals since the manager was built.
    pub fn stats(&self) -> PassStats {
        self.inner.stats.snapshot()
    }

    /// One synchronous pass over every watched state.
    ///
    /// A failing fetch aborts the pass; failures of single entities never do.
    pub async fn run_once(&self) -> Result<PassStats, EngineError> {
        let mut total = PassStats::default();
        for (state, processor) in &self.inner.processors {
            let batch = self.inner.fetch(*state).await?;
            let stats = self
                .inner
                .process_batch(processor.as_ref(), batch, None)
                .await;
            self.inner.stats.record(&stats);
            total += stats;
        }
        self.inner.stats.incr_passes();
        Ok(total)
    }

    /// Spawn the polling loop on the current tokio runtime.
    pub fn start(&self) -> StateMachineHandle {
        let token = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(inner.run_loop(token.clone()));
        StateMachineHandle {
            name: self.inner.config.name.clone(),
            token,
            task,
            stats: Arc::clone(&self.inner.stats),
        }
    }
}

impl<P> Inner<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn watched_states(&self) -> Vec<i32> {
        self.processors.iter().map(|(state, _)| *state).collect()
    }

    async fn call_store<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let limit_ms = self.config.store_timeout_ms;
        tokio::time::timeout(Duration::from_millis(limit_ms), call)
            .await
            .unwrap_or_else(|_| Err(StoreError::Timeout(limit_ms)))
    }

    async fn fetch(&self, state: i32) -> Result<Vec<StatefulEntity<P>>, StoreError> {
        self.call_store(self.store.next_for_state(state, self.config.batch_size))
            .await
    }

    async fn process_batch(
        &self,
        processor: &dyn EntityProcessor<P>,
        batch: Vec<StatefulEntity<P>>,
        cancel: Option<&CancellationToken>,
    ) -> PassStats {
        let mut stats = PassStats {
            fetched: batch.len() as u64,
            ..Default::default()
        };

        let mut pending = batch.into_iter();
        while let Some(entity) = pending.next() {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                let remaining: Vec<_> = std::iter::once(entity).chain(pending.by_ref()).collect();
                stats.released += self.release_all(remaining).await;
                break;
            }
            self.process_entity(processor, entity)
                .await
                .count(&mut stats);
        }
        stats
    }

    async fn release_all(&self, entities: Vec<StatefulEntity<P>>) -> u64 {
        let mut released = 0;
        for entity in entities {
            match self.call_store(self.store.release(entity.id())).await {
                Ok(()) => released += 1,
                Err(e) => warn!(
                    machine = %self.config.name,
                    entity_id = %entity.id(),
                    error = %e,
                    "Failed to release lease"
                ),
            }
        }
        if released > 0 {
            info!(
                machine = %self.config.name,
                released = released,
                "Released leases of unprocessed entities"
            );
        }
        released
    }

    async fn process_entity(
        &self,
        processor: &dyn EntityProcessor<P>,
        mut entity: StatefulEntity<P>,
    ) -> Outcome {
        let clock = self.clock.as_ref();
        let failure_state = self.config.failure_state;

        match self.retry.decide(Attempt::of(&entity)) {
            RetryDecision::Abandon => {
                warn!(
                    machine = %self.config.name,
                    entity_id = %entity.id(),
                    state = entity.state(),
                    state_count = entity.state_count(),
                    "Retries exhausted, moving to failure state"
                );
                entity.transition_to_failure(failure_state, RETRIES_EXHAUSTED, clock);
                return self.persist(&entity, Outcome::Failed).await;
            }
            RetryDecision::Delay { until } => {
                debug!(
                    machine = %self.config.name,
                    entity_id = %entity.id(),
                    until = until,
                    "Entity in backoff, skipping"
                );
                if let Err(e) = self.call_store(self.store.release(entity.id())).await {
                    warn!(entity_id = %entity.id(), error = %e, "Failed to release lease");
                }
                return Outcome::Delayed;
            }
            RetryDecision::Proceed => {}
        }

        let from_state = entity.state();
        let result = match AssertUnwindSafe(processor.process(&mut entity))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => ProcessResult::Fatal(format!(
                "Processor panicked: {}",
                panic_message(payload.as_ref())
            )),
        };

        match result {
            ProcessResult::Success(next) => {
                debug!(
                    machine = %self.config.name,
                    entity_id = %entity.id(),
                    from = from_state,
                    to = next,
                    "Transition"
                );
                entity.transition_to(next, clock);
                self.persist(&entity, Outcome::Advanced).await
            }
            ProcessResult::Retry(reason) => {
                entity.record_retry(clock);
                if self.retry.retries_exhausted(Attempt::of(&entity)) {
                    warn!(
                        machine = %self.config.name,
                        entity_id = %entity.id(),
                        state = from_state,
                        state_count = entity.state_count(),
                        reason = %reason,
                        "Retries exhausted, moving to failure state"
                    );
                    entity.transition_to_failure(
                        failure_state,
                        format!("{RETRIES_EXHAUSTED}: {reason}"),
                        clock,
                    );
                    self.persist(&entity, Outcome::Failed).await
                } else {
                    info!(
                        machine = %self.config.name,
                        entity_id = %entity.id(),
                        state = from_state,
                        state_count = entity.state_count(),
                        reason = %reason,
                        "Processing failed, will retry"
                    );
                    self.persist(&entity, Outcome::Retried).await
                }
            }
            ProcessResult::Fatal(reason) => {
                error!(
                    machine = %self.config.name,
                    entity_id = %entity.id(),
                    state = from_state,
                    reason = %reason,
                    "Fatal processing error, moving to failure state"
                );
                entity.transition_to_failure(failure_state, reason, clock);
                self.persist(&entity, Outcome::Failed).await
            }
        }
    }

    async fn persist(&self, entity: &StatefulEntity<P>, outcome: Outcome) -> Outcome {
        match self.call_store(self.store.save(entity)).await {
            Ok(_) => outcome,
            // lost the entity to another worker: version bumped, or lease expired and retaken
            Err(
                e @ (StoreError::ConcurrentModification { .. }
                | StoreError::LeasedByOther { .. }),
            ) => {
                warn!(
                    machine = %self.config.name,
                    entity_id = %entity.id(),
                    error = %e,
                    "Entity changed concurrently, skipping"
                );
                Outcome::Conflict
            }
            Err(e) => {
                error!(
                    machine = %self.config.name,
                    entity_id = %entity.id(),
                    code = e.code(),
                    error = %e,
                    "Failed to save entity"
                );
                Outcome::Error
            }
        }
    }

    fn on_batch_joined(&self, joined: Result<(), JoinError>) {
        if let Err(e) = joined {
            error!(machine = %self.config.name, error = %e, "Batch task failed");
        }
    }

    async fn run_loop(self: Arc<Self>, token: CancellationToken) {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let idle_max = Duration::from_millis(self.config.idle_backoff_max_ms).max(poll_interval);
        let semaphore = Arc::new(Semaphore::new(self.config.max_inflight_batches.max(1)));
        let mut batches: JoinSet<()> = JoinSet::new();
        let mut idle_wait = poll_interval;
        let mut last_progress = self.stats.progress();

        info!(
            machine = %self.config.name,
            states = ?self.watched_states(),
            batch_size = self.config.batch_size,
            max_inflight_batches = self.config.max_inflight_batches,
            "Starting state machine"
        );

        'poll: while !token.is_cancelled() {
            while let Some(joined) = batches.try_join_next() {
                self.on_batch_joined(joined);
            }

            let mut fetched = 0;
            for (state, processor) in &self.processors {
                let permit = tokio::select! {
                    _ = token.cancelled() => break 'poll,
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break 'poll,
                    },
                };

                let batch = match self.fetch(*state).await {
                    Ok(batch) => batch,
                    Err(e) => {
                        error!(
                            machine = %self.config.name,
                            state = *state,
                            error = %e,
                            "Failed to fetch batch"
                        );
                        continue;
                    }
                };
                if batch.is_empty() {
                    continue;
                }
                fetched += batch.len();

                let inner = Arc::clone(&self);
                let processor = Arc::clone(processor);
                let token = token.clone();
                batches.spawn(async move {
                    let _permit = permit;
                    let stats = inner
                        .process_batch(processor.as_ref(), batch, Some(&token))
                        .await;
                    inner.stats.record(&stats);
                });
            }
            self.stats.incr_passes();

            let progress = self.stats.progress();
            let wait = if progress != last_progress {
                idle_wait = poll_interval;
                None
            } else if fetched > 0 {
                idle_wait = poll_interval;
                Some(poll_interval)
            } else {
                let wait = idle_wait;
                idle_wait = (idle_wait * 2).min(idle_max);
                Some(wait)
            };
            last_progress = progress;

            match wait {
                Some(wait) => tokio::select! {
                    _ = token.cancelled() => break 'poll,
                    _ = tokio::time::sleep(wait) => {}
                },
                None => tokio::task::yield_now().await,
            }
        }

        info!(
            machine = %self.config.name,
            inflight = batches.len(),
            "Stopping state machine"
        );
        while let Some(joined) = batches.join_next().await {
            self.on_batch_joined(joined);
        }
        info!(machine = %self.config.name, "State machine stopped");
    }
}

/// Handle on a running state machine loop.
pub struct StateMachineHandle {
    name: String,
    token: CancellationToken,
    task: JoinHandle<()>,
    stats: Arc<ManagerStats>,
}

impl StateMachineHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> PassStats {
        self.stats.snapshot()
    }

    pub fn passes(&self) -> u64 {
        self.stats.passes()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop polling, wait for in-flight batches and release the leases of
    /// entities they had not reached yet.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            error!(machine = %self.name, error = %e, "State machine task failed");
        }
    }
}

/// Explicit wiring of a [`StateMachineManager`].
pub struct StateMachineBuilder<P> {
    config: StateMachineConfig,
    store: Arc<dyn StateEntityStore<P>>,
    retry: Option<Arc<dyn RetryPolicy>>,
    clock: Arc<dyn Clock>,
    processors: Vec<(i32, Arc<dyn EntityProcessor<P>>)>,
}

impl<P> StateMachineBuilder<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn new(store: Arc<dyn StateEntityStore<P>>) -> Self {
        Self {
            config: StateMachineConfig::default(),
            store,
            retry: None,
            clock: Arc::new(SystemClock),
            processors: Vec::new(),
        }
    }

    pub fn config(mut self, config: StateMachineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn failure_state(mut self, state: i32) -> Self {
        self.config.failure_state = state;
        self
    }

    pub fn retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Watch `state` and run `processor` on its entities. States are polled in
    /// registration order.
    pub fn processor(mut self, state: i32, processor: Arc<dyn EntityProcessor<P>>) -> Self {
        self.processors.push((state, processor));
        self
    }

    pub fn build(self) -> Result<StateMachineManager<P>, EngineError> {
        if self.config.batch_size == 0 {
            return Err(EngineError::Config(format!(
                "state machine {}: batch_size must be positive",
                self.config.name
            )));
        }
        if self.processors.is_empty() {
            return Err(EngineError::Config(format!(
                "state machine {}: no processor registered",
                self.config.name
            )));
        }
        for (i, (state, _)) in self.processors.iter().enumerate() {
            if self.processors[..i].iter().any(|(s, _)| s == state) {
                return Err(EngineError::Config(format!(
                    "state machine {}: duplicate processor for state {state}",
                    self.config.name
                )));
            }
        }

        let retry = match self.retry {
            Some(retry) => retry,
            None => Arc::new(RetryConfig::default().build(Arc::clone(&self.clock))),
        };

        Ok(StateMachineManager {
            inner: Arc::new(Inner {
                config: self.config,
                store: self.store,
                retry,
                clock: self.clock,
                processors: self.processors,
                stats: Arc::new(ManagerStats::default()),
            }),
        })
    }
}
