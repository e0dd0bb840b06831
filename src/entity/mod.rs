//! Stateful entity model
//!
//! The generic record processed by the state machine engine, its lease, and the
//! clock used for every timestamp the engine writes.

pub mod clock;
pub mod stateful;

pub use clock::{Clock, ManualClock, SystemClock};
pub use stateful::{ERROR_DETAIL_KEY, Lease, StatefulEntity};
