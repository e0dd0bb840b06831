use async_trait::async_trait;

use super::request::DataRequest;
use super::status::StatusResult;
use crate::core_types::{DataAddress, Policy};

/// Moves data for the requests it can handle, either inline or by handing the
/// request to a data plane.
#[async_trait]
pub trait DataFlowController: Send + Sync {
    fn can_handle(&self, request: &DataRequest, content_address: &DataAddress) -> bool;

    async fn initiate_flow(
        &self,
        request: &DataRequest,
        content_address: &DataAddress,
        policy: &Policy,
    ) -> StatusResult;
}
