//! Clients between control plane and data plane

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::error::DataPlaneError;
use super::manager::DataPlaneManager;
use super::request::DataFlowRequest;
use crate::flow::{StatusFailure, StatusResult};

/// Reports the outcome of a data flow back to the owning transfer process.
#[async_trait]
pub trait TransferProcessClient: Send + Sync {
    async fn completed(&self, request: &DataFlowRequest) -> StatusResult;

    async fn failed(&self, request: &DataFlowRequest, reason: &str) -> StatusResult;
}

/// Accepts every notification and drops it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransferProcessClient;

#[async_trait]
impl TransferProcessClient for NoopTransferProcessClient {
    async fn completed(&self, request: &DataFlowRequest) -> StatusResult {
        debug!(process_id = %request.process_id, "Transfer completed");
        Ok(())
    }

    async fn failed(&self, request: &DataFlowRequest, reason: &str) -> StatusResult {
        debug!(process_id = %request.process_id, reason = reason, "Transfer failed");
        Ok(())
    }
}

/// Hands a data flow request to a data plane.
#[async_trait]
pub trait DataPlaneClient: Send + Sync {
    async fn transfer(&self, request: DataFlowRequest) -> StatusResult;
}

/// Client for a data plane manager running in the same process.
pub struct EmbeddedDataPlaneClient {
    manager: Arc<DataPlaneManager>,
}

impl EmbeddedDataPlaneClient {
    pub fn new(manager: Arc<DataPlaneManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl DataPlaneClient for EmbeddedDataPlaneClient {
    async fn transfer(&self, request: DataFlowRequest) -> StatusResult {
        if let Err(e) = self.manager.validate(&request) {
            return Err(StatusFailure::fatal(e.to_string()));
        }
        match self.manager.initiate_transfer(request) {
            Ok(()) => Ok(()),
            Err(e @ (DataPlaneError::QueueFull(_) | DataPlaneError::NotRunning)) => {
                Err(StatusFailure::retry(e.to_string()))
            }
            Err(e) => Err(StatusFailure::fatal(e.to_string())),
        }
    }
}
