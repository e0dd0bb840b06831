//! Execution records of data flows

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::state::TransferState;
use crate::core_types::{Millis, ProcessId};
use crate::entity::{Clock, SystemClock};

pub const DEFAULT_STORE_CAPACITY: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferExecutionRecord {
    pub process_id: ProcessId,
    pub state: TransferState,
    pub updated_at: Millis,
    pub error_detail: Option<String>,
}

/// Tracks where each process stands inside the data plane.
pub trait DataPlaneStore: Send + Sync {
    fn received(&self, process_id: &str);

    fn completed(&self, process_id: &str);

    fn failed(&self, process_id: &str, reason: &str);

    fn notified(&self, process_id: &str);

    /// Drop the record, e.g. when the request never made it onto the queue.
    fn remove(&self, process_id: &str);

    /// `NotStarted` for unknown processes.
    fn state(&self, process_id: &str) -> TransferState;

    fn record(&self, process_id: &str) -> Option<TransferExecutionRecord>;
}

/// Bounded in-memory store; the oldest finished record is evicted once `capacity`
/// is reached. `Received` records are kept even past capacity.
pub struct InMemoryDataPlaneStore {
    records: DashMap<ProcessId, TransferExecutionRecord>,
    order: Mutex<VecDeque<ProcessId>>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryDataPlaneStore {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_CAPACITY)
    }
}

impl InMemoryDataPlaneStore {
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn upsert(&self, process_id: &str, state: TransferState, error_detail: Option<String>) {
        let now = self.clock.millis();
        if let Some(mut record) = self.records.get_mut(process_id) {
            record.state = state;
            record.updated_at = now;
            if error_detail.is_some() {
                record.error_detail = error_detail;
            }
            return;
        }

        let Ok(mut order) = self.order.lock() else {
            return;
        };
        // a concurrent insert may have won while the order lock was contended
        if let Some(mut record) = self.records.get_mut(process_id) {
            record.state = state;
            record.updated_at = now;
            return;
        }
        while order.len() >= self.capacity {
            // records of transfers still queued or running are never evicted
            let finished = order.iter().position(|id| {
                self.records
                    .get(id)
                    .is_none_or(|r| r.state.is_finished())
            });
            let Some(oldest) = finished.and_then(|pos| order.remove(pos)) else {
                warn!(
                    capacity = self.capacity,
                    records = order.len(),
                    "Transfer record store over capacity, all records in flight"
                );
                break;
            };
            self.records.remove(&oldest);
            debug!(process_id = %oldest, "Evicted oldest finished transfer record");
        }
        order.push_back(process_id.to_string());
        self.records.insert(
            process_id.to_string(),
            TransferExecutionRecord {
                process_id: process_id.to_string(),
                state,
                updated_at: now,
                error_detail,
            },
        );
    }
}

impl DataPlaneStore for InMemoryDataPlaneStore {
    fn received(&self, process_id: &str) {
        self.upsert(process_id, TransferState::Received, None);
    }

    fn completed(&self, process_id: &str) {
        self.upsert(process_id, TransferState::Completed, None);
    }

    fn failed(&self, process_id: &str, reason: &str) {
        self.upsert(process_id, TransferState::Failed, Some(reason.to_string()));
    }

    fn notified(&self, process_id: &str) {
        self.upsert(process_id, TransferState::Notified, None);
    }

    fn remove(&self, process_id: &str) {
        if let Ok(mut order) = self.order.lock()
            && self.records.remove(process_id).is_some()
        {
            order.retain(|id| id != process_id);
        }
    }

    fn state(&self, process_id: &str) -> TransferState {
        self.records
            .get(process_id)
            .map(|r| r.state)
            .unwrap_or(TransferState::NotStarted)
    }

    fn record(&self, process_id: &str) -> Option<TransferExecutionRecord> {
        self.records.get(process_id).map(|r| r.clone())
    }
}
