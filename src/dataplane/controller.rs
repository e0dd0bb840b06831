//! Flow controller delegating data requests to a data plane.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::client::DataPlaneClient;
use super::request::DataFlowRequest;
use super::selection::DataPlaneSelector;
use crate::core_types::{DataAddress, Policy};
use crate::flow::{DataFlowController, DataRequest, StatusFailure, StatusResult};

/// Handles every request for which some known data plane instance accepts the
/// source and destination types.
pub struct DataPlaneFlowController {
    selector: Arc<DataPlaneSelector>,
    client: Arc<dyn DataPlaneClient>,
}

impl DataPlaneFlowController {
    pub fn new(selector: Arc<DataPlaneSelector>, client: Arc<dyn DataPlaneClient>) -> Self {
        Self { selector, client }
    }
}

#[async_trait]
impl DataFlowController for DataPlaneFlowController {
    fn can_handle(&self, request: &DataRequest, content_address: &DataAddress) -> bool {
        self.selector
            .can_handle(content_address, &request.data_destination)
    }

    async fn initiate_flow(
        &self,
        request: &DataRequest,
        content_address: &DataAddress,
        _policy: &Policy,
    ) -> StatusResult {
        let Some(instance) = self
            .selector
            .select(content_address, &request.data_destination)
        else {
            warn!(request_id = %request.id, "No data plane instance available");
            return Err(StatusFailure::fatal(format!(
                "Failed to find DataPlaneInstance for source/destination: {}/{}",
                content_address.kind(),
                request.destination_type
            )));
        };
        debug!(
            request_id = %request.id,
            process_id = %request.process_id,
            data_plane = %instance.id,
            "Delegating data flow"
        );

        let mut flow_request = DataFlowRequest::new(
            request.process_id.clone(),
            content_address.clone(),
            request.data_destination.clone(),
        )
        .with_id(request.id.clone());
        flow_request.properties = request.properties.clone();
        self.client.transfer(flow_request).await
    }
}
