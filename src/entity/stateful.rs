//! Stateful entity and lease records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::clock::Clock;
use crate::core_types::{EntityId, Millis};

/// Trace context key under which a terminal failure reason is recorded.
pub const ERROR_DETAIL_KEY: &str = "error_detail";

/// Long-lived record driven through a domain state machine.
///
/// `state` is a domain state code; the engine never validates transitions.
/// `state_count`, `state` and `state_timestamp` are written only through the
/// transition methods below, which the state machine manager calls while it
/// holds the entity's lease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatefulEntity<P> {
    id: EntityId,
    state: i32,
    state_count: u32,
    state_timestamp: Millis,
    created_at: Millis,
    #[serde(default)]
    trace_context: HashMap<String, String>,
    /// Optimistic concurrency epoch, bumped by the store on every save
    version: u64,
    #[serde(default)]
    error_detail: Option<String>,
    payload: P,
}

impl<P> StatefulEntity<P> {
    /// Create an entity in its initial state.
    pub fn new(id: impl Into<EntityId>, state: i32, payload: P, clock: &dyn Clock) -> Self {
        let now = clock.millis();
        Self {
            id: id.into(),
            state,
            state_count: 0,
            state_timestamp: now,
            created_at: now,
            trace_context: HashMap::new(),
            version: 0,
            error_detail: None,
            payload,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> i32 {
        self.state
    }

    pub fn state_count(&self) -> u32 {
        self.state_count
    }

    pub fn state_timestamp(&self) -> Millis {
        self.state_timestamp
    }

    pub fn created_at(&self) -> Millis {
        self.created_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    pub fn trace_context(&self) -> &HashMap<String, String> {
        &self.trace_context
    }

    pub fn trace_context_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.trace_context
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut P {
        &mut self.payload
    }

    /// Forward transition: resets the attempt counter.
    pub fn transition_to(&mut self, state: i32, clock: &dyn Clock) {
        self.state = state;
        self.state_count = 0;
        self.state_timestamp = clock.millis();
    }

    /// Another attempt in the same state.
    pub fn record_retry(&mut self, clock: &dyn Clock) {
        self.state_count = self.state_count.saturating_add(1);
        self.state_timestamp = clock.millis();
    }

    /// Terminal failure. The attempt counter is kept so the number of attempts
    /// that led here stays observable.
    pub fn transition_to_failure(&mut self, state: i32, reason: impl Into<String>, clock: &dyn Clock) {
        let reason = reason.into();
        self.state = state;
        self.state_timestamp = clock.millis();
        self.trace_context
            .insert(ERROR_DETAIL_KEY.to_string(), reason.clone());
        self.error_detail = Some(reason);
    }

    /// Stamp the version assigned by a store. Store implementations call this
    /// after a successful write.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}

/// Time-boxed exclusive claim on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: String,
    pub acquired_at: Millis,
    pub duration_ms: Millis,
}

impl Lease {
    pub fn new(holder: impl Into<String>, acquired_at: Millis, duration_ms: Millis) -> Self {
        Self {
            holder: holder.into(),
            acquired_at,
            duration_ms,
        }
    }

    #[inline]
    pub fn expires_at(&self) -> Millis {
        self.acquired_at.saturating_add(self.duration_ms)
    }

    /// A lease is void once its expiry has passed.
    #[inline]
    pub fn is_expired(&self, now: Millis) -> bool {
        now >= self.expires_at()
    }

    #[inline]
    pub fn is_held_by(&self, holder: &str) -> bool {
        self.holder == holder
    }
}
