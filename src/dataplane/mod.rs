//! Data plane
//!
//! Executes data flow requests asynchronously: a bounded queue feeds worker
//! tasks that resolve a transfer service, run the source/sink pipeline and
//! report the outcome back to the transfer process.

pub mod client;
pub mod controller;
pub mod error;
pub mod manager;
pub mod memory;
pub mod parallel_sink;
pub mod pipeline;
pub mod request;
pub mod selection;
pub mod state;
pub mod store;
pub mod transfer_service;

pub use client::{
    DataPlaneClient, EmbeddedDataPlaneClient, NoopTransferProcessClient, TransferProcessClient,
};
pub use controller::DataPlaneFlowController;
pub use error::{DataPlaneError, ValidationError};
pub use manager::{DataPlaneConfig, DataPlaneManager, DataPlaneManagerBuilder};
pub use memory::{MEMORY_TYPE, MemorySink, MemorySinkFactory, MemorySource, MemorySourceFactory, MemoryStorage};
pub use parallel_sink::{ParallelSink, PartWriter};
pub use pipeline::{DataSink, DataSinkFactory, DataSource, DataSourceFactory, Part, PipelineService};
pub use request::DataFlowRequest;
pub use selection::{
    DataPlaneInstance, DataPlaneSelector, FirstSelectionStrategy, RandomSelectionStrategy,
    SelectionStrategy,
};
pub use state::TransferState;
pub use store::{DataPlaneStore, InMemoryDataPlaneStore, TransferExecutionRecord};
pub use transfer_service::{
    PipelineTransferService, SelectFirst, TransferService, TransferServiceRegistry,
    TransferServiceSelectionStrategy,
};
