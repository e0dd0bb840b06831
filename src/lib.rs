//! Connector Engine - lease-driven state machines and data flows
//!
//! The execution backbone of a data-exchange connector control plane: long-lived
//! business processes are persisted as stateful entities and advanced by polling
//! loops, while the data they negotiate is moved by a pluggable, asynchronous
//! data plane.
//!
//! # Modules
//!
//! - [`core_types`] - Shared aliases, data addresses and policies
//! - [`entity`] - Stateful entity, lease and clock
//! - [`store`] - Leased entity persistence contract and in-memory store
//! - [`retry`] - Retry policy and backoff strategies
//! - [`state_machine`] - Polling driver applying per-state processors
//! - [`flow`] - Routing of data requests to flow controllers
//! - [`dataplane`] - Queued transfers over source/sink pipelines
//! - [`runtime`] - Explicit context wiring everything from [`config::AppConfig`]
//! - [`config`] / [`logging`] - YAML configuration and tracing setup

// Core types - must be first!
pub mod core_types;

pub mod entity;
pub mod error;
pub mod retry;
pub mod store;

pub mod dataplane;
pub mod flow;
pub mod state_machine;

pub mod config;
pub mod logging;
pub mod runtime;

// Convenient re-exports at crate root
pub use core_types::{DataAddress, EntityId, Millis, Policy, ProcessId};
pub use entity::{Clock, Lease, ManualClock, StatefulEntity, SystemClock};
pub use error::EngineError;
pub use retry::{RetryConfig, RetryDecision, RetryPolicy};
pub use store::{InMemoryEntityStore, StateEntityStore, StoreError};

pub use state_machine::{
    EntityProcessor, FnProcessor, PassStats, ProcessResult, StateMachineConfig,
    StateMachineHandle, StateMachineManager,
};

pub use flow::{
    DataFlowController, DataFlowManager, DataRequest, ResponseStatus, StatusFailure, StatusResult,
};

pub use dataplane::{
    DataFlowRequest, DataPlaneManager, DataPlaneSelector, PipelineService, TransferState,
};

pub use config::AppConfig;
pub use runtime::{ConnectorRuntime, RuntimeBuilder};
