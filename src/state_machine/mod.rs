//! Entity state machine driver
//!
//! A [`StateMachineManager`] watches a set of states. Each pass leases a batch of
//! entities per state, hands every entity to the processor registered for its
//! state and persists the transition the processor asked for, applying the
//! retry policy on failures.

pub mod manager;
pub mod processor;
pub mod stats;

pub use manager::{
    RETRIES_EXHAUSTED, StateMachineBuilder, StateMachineConfig, StateMachineHandle,
    StateMachineManager,
};
pub use processor::{EntityProcessor, FnProcessor, ProcessResult};
pub use stats::{ManagerStats, PassStats};
