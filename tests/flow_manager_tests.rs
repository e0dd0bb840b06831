use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use connector_engine::entity::ERROR_DETAIL_KEY;
use connector_engine::{
    DataAddress, DataFlowController, DataFlowManager, DataRequest, EntityProcessor,
    InMemoryEntityStore, ManualClock, Policy, ProcessResult, ResponseStatus, StateEntityStore,
    StateMachineManager, StatefulEntity, StatusFailure, StatusResult,
};

const REQUESTING: i32 = 100;
const STARTED: i32 = 200;
const TERMINATED: i32 = -1;

/// Controller with a fixed answer, counting how often it is asked to initiate.
struct MockController {
    name: &'static str,
    handles: bool,
    result: StatusResult,
    calls: AtomicUsize,
}

impl MockController {
    fn new(name: &'static str, handles: bool, result: StatusResult) -> Arc<Self> {
        Arc::new(Self {
            name,
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
        self.result
            .clone()
            .map_err(|e| StatusFailure::new(e.status, format!("{}: {}", self.name, e.detail())))
    }
}

struct ExplodingController;

#[async_trait]
impl DataFlowController for ExplodingController {
    fn can_handle(&self, _request: &DataRequest, _content_address: &DataAddress) -> bool {
        true
    }

    async fn initiate_flow(
        &self,
        request: &DataRequest,
        _content_address: &DataAddress,
        _policy: &Policy,
    ) -> StatusResult {
        if !request.properties.contains_key("secret") {
            panic!("secret not configured");
        }
        Ok(())
    }
}

fn request(id: &str) -> DataRequest {
    DataRequest::new(id, format!("tp-{id}"), DataAddress::new("HttpData"))
}

#[tokio::test]
async fn test_registration_order_decides() {
    let a = MockController::new("A", false, Ok(()));
    let b = MockController::new("B", true, Err(StatusFailure::retry("busy")));
    let c = MockController::new("C", true, Ok(()));

    let mut manager = DataFlowManager::new();
    manager.register(a.clone());
    manager.register(b.clone());
    manager.register(c.clone());

    let result = manager
        .initiate(&request("1"), &DataAddress::new("AmazonS3"), &Policy::empty())
        .await;

    let failure = result.unwrap_err();
    assert_eq!(failure.status, ResponseStatus::ErrorRetry);
    assert_eq!(failure.detail(), "B: busy");
    assert_eq!((a.calls(), b.calls(), c.calls()), (0, 1, 0));
}

#[tokio::test]
async fn test_no_controller_is_fatal() {
    let manager = DataFlowManager::new();
    let failure = manager
        .initiate(&request("42"), &DataAddress::new("AmazonS3"), &Policy::empty())
        .await
        .unwrap_err();
    assert_eq!(failure.status, ResponseStatus::FatalError);
    assert!(failure.detail().contains("42"));
    assert!(failure.detail().contains("No data flow controller found"));
}

#[tokio::test]
async fn test_panicking_controller_is_fatal() {
    let mut manager = DataFlowManager::new();
    manager.register(Arc::new(ExplodingController));

    let failure = manager
        .initiate(&request("7"), &DataAddress::new("AmazonS3"), &Policy::empty())
        .await
        .unwrap_err();
    assert_eq!(failure.status, ResponseStatus::FatalError);
    assert!(failure.detail().contains("7"));
    assert!(failure.detail().contains("secret not configured"));

    let ok = manager
        .initiate(
            &request("8").with_property("secret", "s3cr3t"),
            &DataAddress::new("AmazonS3"),
            &Policy::empty(),
        )
        .await;
    assert_eq!(ok, Ok(()));
}

/// Transfer process step asking the flow manager to start the data flow.
struct InitiateFlow {
    flow_manager: Arc<DataFlowManager>,
}

#[async_trait]
impl EntityProcessor<DataRequest> for InitiateFlow {
    async fn process(&self, entity: &mut StatefulEntity<DataRequest>) -> ProcessResult {
        let result = self
            .flow_manager
            .initiate(entity.payload(), &DataAddress::new("AmazonS3"), &Policy::empty())
            .await;
        ProcessResult::from_status(result, STARTED)
    }
}

#[tokio::test]
async fn test_flow_status_drives_transfer_process() {
    let clock = Arc::new(ManualClock::new(0));
    let store = Arc::new(InMemoryEntityStore::<DataRequest>::with_clock(
        clock.clone(),
        std::time::Duration::from_secs(60),
    ));

    // "ok" is served, "unknown" has no controller
    let mut manager = DataFlowManager::new();
    manager.register(Arc::new(OnlyDestination("HttpData")));
    let flow_manager = Arc::new(manager);

    let served = request("ok");
    let unserved = DataRequest::new("unknown", "tp-unknown", DataAddress::new("Ftp"));
    for payload in [served, unserved] {
        let id = payload.process_id.clone();
        store
            .create(StatefulEntity::new(id, REQUESTING, payload, clock.as_ref()))
            .await
            .unwrap();
    }

    let machine = StateMachineManager::<DataRequest>::builder(store.clone())
        .clock(clock.clone())
        .failure_state(TERMINATED)
        .processor(REQUESTING, Arc::new(InitiateFlow { flow_manager }))
        .build()
        .unwrap();
    let stats = machine.run_once().await.unwrap();
    assert_eq!(stats.advanced, 1);
    assert_eq!(stats.failed, 1);

    let ok = store.find("tp-ok").await.unwrap().unwrap();
    assert_eq!(ok.state(), STARTED);

    let unknown = store.find("tp-unknown").await.unwrap().unwrap();
    assert_eq!(unknown.state(), TERMINATED);
    let reason = unknown.trace_context().get(ERROR_DETAIL_KEY).unwrap();
    assert!(reason.contains("unknown"));
    assert!(reason.contains("No data flow controller found"));
}

struct OnlyDestination(&'static str);

#[async_trait]
impl DataFlowController for OnlyDestination {
    fn can_handle(&self, request: &DataRequest, _content_address: &DataAddress) -> bool {
        request.destination_type == self.0
    }

    async fn initiate_flow(
        &self,
        _request: &DataRequest,
        _content_address: &DataAddress,
        _policy: &Policy,
    ) -> StatusResult {
        Ok(())
    }
}
