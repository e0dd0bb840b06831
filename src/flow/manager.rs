//! Data Flow Manager
//!
//! Routes a data request to the first registered controller that can handle it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, warn};

use super::controller::DataFlowController;
use super::request::DataRequest;
use super::status::{StatusFailure, StatusResult};
use crate::core_types::{DataAddress, Policy};
use crate::error::panic_message;

#[derive(Default)]
pub struct DataFlowManager {
    controllers: Vec<Arc<dyn DataFlowController>>,
}

impl DataFlowManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a controller. Earlier registrations win.
    pub fn register(&mut self, controller: Arc<dyn DataFlowController>) {
        self.controllers.push(controller);
    }

    pub fn controller_count(&self) -> usize {
        self.controllers.len()
    }

    /// Initiate the flow with the first capable controller.
    ///
    /// The controller's own result is returned unchanged. A missing controller
    /// or a panicking one yields `FATAL_ERROR`.
    pub async fn initiate(
        &self,
        request: &DataRequest,
        content_address: &DataAddress,
        policy: &Policy,
    ) -> StatusResult {
        let selected = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.controllers
                .iter()
                .find(|c| c.can_handle(request, content_address))
                .cloned()
        }));

        let controller = match selected {
            Ok(Some(controller)) => controller,
            Ok(None) => {
                warn!(
                    request_id = %request.id,
                    destination_type = %request.destination_type,
                    "No data flow controller found"
                );
                return Err(StatusFailure::fatal(format!(
                    "Unable to process data request {}. No data flow controller found",
                    request.id
                )));
            }
            Err(payload) => return Err(controller_panicked(request, payload.as_ref())),
        };

        debug!(request_id = %request.id, source = %content_address, "Initiating data flow");
        match AssertUnwindSafe(controller.initiate_flow(request, content_address, policy))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(controller_panicked(request, payload.as_ref())),
        }
    }
}

fn controller_panicked(request: &DataRequest, payload: &(dyn std::any::Any + Send)) -> StatusFailure {
    let message = panic_message(payload);
    error!(request_id = %request.id, error = %message, "Data flow controller panicked");
    StatusFailure::fatal(format!(
        "Unable to process data request {}. Data flow controller throws an exception: {}",
        request.id, message
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::ResponseStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockController {
        handles: bool,
        result: StatusResult,
        calls: AtomicUsize,
    }

    impl MockController {
        fn new(handles: bool, result: StatusResult) -> Arc<Self> {
            Arc::new(Self {
                handles,
                result,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DataFlowController for MockController {
        fn can_handle(&self, _request: &DataRequest, _content_address: &DataAddress) -> bool {
            self.handles
        }

        async fn initiate_flow(
            &self,
            _request: &DataRequest,
            _content_address: &DataAddress,
            _policy: &Policy,
        ) -> StatusResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct PanickingController {
        in_can_handle: bool,
    }

    #[async_trait]
    impl DataFlowController for PanickingController {
        fn can_handle(&self, _request: &DataRequest, _content_address: &DataAddress) -> bool {
            if self.in_can_handle {
                panic!("can_handle exploded");
            }
            true
        }

        async fn initiate_flow(
            &self,
            _request: &DataRequest,
            _content_address: &DataAddress,
            _policy: &Policy,
        ) -> StatusResult {
            panic!("initiate_flow exploded");
        }
    }

    fn request() -> DataRequest {
        DataRequest::new("req-1", "tp-1", DataAddress::new("HttpData"))
    }

    async fn initiate(manager: &DataFlowManager) -> StatusResult {
        manager
            .initiate(&request(), &DataAddress::new("AmazonS3"), &Policy::empty())
            .await
    }

    #[tokio::test]
    async fn test_first_capable_controller_wins() {
        let a = MockController::new(false, Ok(()));
        let b = MockController::new(true, Ok(()));
        let c = MockController::new(true, Err(StatusFailure::fatal("never")));
        let mut manager = DataFlowManager::new();
        manager.register(a.clone());
        manager.register(b.clone());
        manager.register(c.clone());

        assert_eq!(manager.controller_count(), 3);
        assert_eq!(initiate(&manager).await, Ok(()));
        assert_eq!((a.calls(), b.calls(), c.calls()), (0, 1, 0));
    }

    #[tokio::test]
    async fn test_no_controller() {
        let manager = DataFlowManager::new();
        let failure = initiate(&manager).await.unwrap_err();
        assert_eq!(failure.status, ResponseStatus::FatalError);
        assert_eq!(
            failure.messages,
            vec!["Unable to process data request req-1. No data flow controller found"]
        );
    }

    #[tokio::test]
    async fn test_controller_failure_passes_through() {
        let mut manager = DataFlowManager::new();
        manager.register(MockController::new(true, Err(StatusFailure::retry("busy"))));

        let failure = initiate(&manager).await.unwrap_err();
        assert_eq!(failure, StatusFailure::retry("busy"));
    }

    #[tokio::test]
    async fn test_panic_becomes_fatal_error() {
        for in_can_handle in [true, false] {
            let mut manager = DataFlowManager::new();
            manager.register(Arc::new(PanickingController { in_can_handle }));

            let failure = initiate(&manager).await.unwrap_err();
            assert_eq!(failure.status, ResponseStatus::FatalError);
            let expected = if in_can_handle {
                "can_handle exploded"
            } else {
                "initiate_flow exploded"
            };
            assert_eq!(
                failure.messages,
                vec![format!(
                    "Unable to process data request req-1. Data flow controller throws an exception: {expected}"
                )]
            );
        }
    }
}
