//! Connector Runtime - explicit process-wide context
//!
//! Wires the flow manager, the embedded data plane and every state machine from
//! one [`AppConfig`], and owns their startup and teardown.
//!
//! # Lifecycle
//!
//! ```text
//! RuntimeBuilder ──build()──► ConnectorRuntime ──start()──► running ──shutdown()──► stopped
//!   controllers                 state machines              data plane workers
//!   factories                   may still be added          state machine loops
//!   instances
//! ```
//!
//! Controller, factory and data plane registries are fixed by `build()` and shared
//! through `Arc` without locking.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::dataplane::{
    DataPlaneFlowController, DataPlaneInstance, DataPlaneManager, DataPlaneSelector,
    DataSinkFactory, DataSourceFactory, EmbeddedDataPlaneClient, PipelineService,
    SelectionStrategy, TransferProcessClient,
};
use crate::entity::{Clock, SystemClock};
use crate::error::EngineError;
use crate::flow::{DataFlowController, DataFlowManager};
use crate::state_machine::{
    PassStats, StateMachineBuilder, StateMachineHandle, StateMachineManager,
};
use crate::store::{InMemoryEntityStore, StateEntityStore};

/// Type-erased state machine waiting to be started.
trait MachineStarter: Send + Sync {
    fn name(&self) -> &str;

    fn start(&self) -> StateMachineHandle;
}

impl<P> MachineStarter for StateMachineManager<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        StateMachineManager::name(self)
    }

    fn start(&self) -> StateMachineHandle {
        StateMachineManager::start(self)
    }
}

// ============================================================
// BUILDER
// ============================================================

pub struct RuntimeBuilder {
    config: AppConfig,
    clock: Arc<dyn Clock>,
    controllers: Vec<Arc<dyn DataFlowController>>,
    source_factories: Vec<Arc<dyn DataSourceFactory>>,
    sink_factories: Vec<Arc<dyn DataSinkFactory>>,
    instances: Vec<DataPlaneInstance>,
    strategies: Vec<Arc<dyn SelectionStrategy>>,
    client: Option<Arc<dyn TransferProcessClient>>,
}

impl RuntimeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            controllers: Vec::new(),
            source_factories: Vec::new(),
            sink_factories: Vec::new(),
            instances: Vec::new(),
            strategies: Vec::new(),
            client: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Controllers are consulted in registration order, before the embedded
    /// data plane controller.
    pub fn controller(mut self, controller: Arc<dyn DataFlowController>) -> Self {
        self.controllers.push(controller);
        self
    }

    pub fn source_factory(mut self, factory: Arc<dyn DataSourceFactory>) -> Self {
        self.source_factories.push(factory);
        self
    }

    pub fn sink_factory(mut self, factory: Arc<dyn DataSinkFactory>) -> Self {
        self.sink_factories.push(factory);
        self
    }

    pub fn data_plane_instance(mut self, instance: DataPlaneInstance) -> Self {
        self.instances.push(instance);
        self
    }

    pub fn selection_strategy(mut self, strategy: Arc<dyn SelectionStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Receives transfer outcomes from the embedded data plane.
    pub fn transfer_process_client(mut self, client: Arc<dyn TransferProcessClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> Result<ConnectorRuntime, EngineError> {
        let mut pipeline = PipelineService::new();
        for factory in self.source_factories {
            pipeline.register_source_factory(factory);
        }
        for factory in self.sink_factories {
            pipeline.register_sink_factory(factory);
        }

        let mut data_plane = DataPlaneManager::builder()
            .config(self.config.data_plane.clone())
            .pipeline(Arc::new(pipeline))
            .clock(Arc::clone(&self.clock));
        if let Some(client) = self.client {
            data_plane = data_plane.client(client);
        }
        let data_plane = Arc::new(data_plane.build()?);

        let mut selector = DataPlaneSelector::new();
        for strategy in self.strategies {
            selector.register_strategy(strategy);
        }
        selector.set_default_strategy(&self.config.data_plane.selection_strategy)?;
        let has_instances = !self.instances.is_empty();
        for instance in self.instances {
            selector.add_instance(instance);
        }
        let selector = Arc::new(selector);

        let mut flow_manager = DataFlowManager::new();
        for controller in self.controllers {
            flow_manager.register(controller);
        }
        if has_instances {
            let client = Arc::new(EmbeddedDataPlaneClient::new(Arc::clone(&data_plane)));
            flow_manager.register(Arc::new(DataPlaneFlowController::new(
                Arc::clone(&selector),
                client,
            )));
        }

        info!(
            controllers = flow_manager.controller_count(),
            data_plane_instances = selector.instances().len(),
            "Connector runtime built"
        );

        Ok(ConnectorRuntime {
            config: self.config,
            clock: self.clock,
            flow_manager: Arc::new(flow_manager),
            data_plane,
            selector,
            machines: Vec::new(),
            handles: Vec::new(),
            started: false,
        })
    }
}

// ============================================================
// RUNTIME
// ============================================================

pub struct ConnectorRuntime {
    config: AppConfig,
    clock: Arc<dyn Clock>,
    flow_manager: Arc<DataFlowManager>,
    data_plane: Arc<DataPlaneManager>,
    selector: Arc<DataPlaneSelector>,
    machines: Vec<Box<dyn MachineStarter>>,
    handles: Vec<StateMachineHandle>,
    started: bool,
}

impl ConnectorRuntime {
    pub fn builder(config: AppConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn flow_manager(&self) -> &Arc<DataFlowManager> {
        &self.flow_manager
    }

    pub fn data_plane(&self) -> &Arc<DataPlaneManager> {
        &self.data_plane
    }

    pub fn selector(&self) -> &Arc<DataPlaneSelector> {
        &self.selector
    }

    /// In-memory entity store using the configured lease duration and the
    /// runtime clock.
    pub fn memory_store<P>(&self) -> Arc<InMemoryEntityStore<P>>
    where
        P: Clone + Send + Sync + 'static,
    {
        Arc::new(InMemoryEntityStore::with_clock(
            Arc::clone(&self.clock),
            self.config.lease.duration(),
        ))
    }

    /// State machine builder preloaded with the `state_machine` and `retry`
    /// sections and the runtime clock.
    pub fn state_machine<P>(&self, store: Arc<dyn StateEntityStore<P>>) -> StateMachineBuilder<P>
    where
        P: Clone + Send + Sync + 'static,
    {
        StateMachineManager::builder(store)
            .config(self.config.state_machine.clone())
            .retry_policy(Arc::new(self.config.retry.build(Arc::clone(&self.clock))))
            .clock(Arc::clone(&self.clock))
    }

    /// Add a state machine to run. Only allowed before [`start`](Self::start).
    pub fn register_state_machine<P>(
        &mut self,
        machine: StateMachineManager<P>,
    ) -> Result<(), EngineError>
    where
        P: Clone + Send + Sync + 'static,
    {
        if self.started {
            return Err(EngineError::Runtime(format!(
                "cannot register state machine {} on a started runtime",
                machine.name()
            )));
        }
        if self.machines.iter().any(|m| m.name() == machine.name()) {
            return Err(EngineError::Config(format!(
                "duplicate state machine name: {}",
                machine.name()
            )));
        }
        self.machines.push(Box::new(machine));
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Start the data plane workers, then every registered state machine.
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.started {
            return Err(EngineError::Runtime("runtime already started".to_string()));
        }
        self.data_plane.start()?;
        for machine in &self.machines {
            self.handles.push(machine.start());
        }
        self.started = true;
        info!(
            state_machines = self.handles.len(),
            workers = self.data_plane.config().workers,
            "Connector runtime started"
        );
        Ok(())
    }

    /// Stats of every running state machine, by name.
    pub fn stats(&self) -> Vec<(String, PassStats)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.stats()))
            .collect()
    }

    /// Stop the state machines first so no new transfers are queued, then
    /// drain the data plane.
    pub async fn shutdown(mut self) {
        if !self.started {
            warn!("Shutdown of a runtime that was never started");
            return;
        }
        for handle in self.handles.drain(..) {
            let name = handle.name().to_string();
            handle.shutdown().await;
            info!(machine = %name, "State machine shut down");
        }
        self.data_plane.stop().await;
        info!("Connector runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{DataAddress, Policy};
    use crate::dataplane::{MemorySinkFactory, MemorySourceFactory, MemoryStorage};
    use crate::entity::StatefulEntity;
    use crate::flow::{DataRequest, StatusResult};
    use crate::state_machine::{FnProcessor, ProcessResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingController {
        handled: AtomicUsize,
    }

    #[async_trait]
    impl DataFlowController for CountingController {
        fn can_handle(&self, request: &DataRequest, _content: &DataAddress) -> bool {
            request.destination_type == "Counting"
        }

        async fn initiate_flow(
            &self,
            _request: &DataRequest,
            _content: &DataAddress,
            _policy: &Policy,
        ) -> StatusResult {
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.state_machine.poll_interval_ms = 5;
        config.state_machine.idle_backoff_max_ms = 10;
        config.data_plane.workers = 2;
        config.data_plane.wait_timeout_ms = 10;
        config
    }

    #[test]
    fn test_build_registers_data_plane_controller_last() {
        let counting = Arc::new(CountingController {
            handled: AtomicUsize::new(0),
        });
        let runtime = ConnectorRuntime::builder(fast_config())
            .controller(counting)
            .data_plane_instance(
                DataPlaneInstance::new("dp-1", "http://localhost").allow_source("Memory"),
            )
            .build()
            .unwrap();
        assert_eq!(runtime.flow_manager().controller_count(), 2);
        assert_eq!(runtime.selector().instances().len(), 1);
        assert!(!runtime.is_started());
    }

    #[test]
    fn test_build_without_instances_skips_data_plane_controller() {
        let runtime = ConnectorRuntime::builder(fast_config()).build().unwrap();
        assert_eq!(runtime.flow_manager().controller_count(), 0);
    }

    #[test]
    fn test_unknown_selection_strategy() {
        let mut config = fast_config();
        config.data_plane.selection_strategy = "round-robin".to_string();
        let result = ConnectorRuntime::builder(config).build();
        assert!(matches!(result, Err(EngineError::DataPlane(_))));
    }

    #[tokio::test]
    async fn test_first_controller_wins_over_data_plane() {
        let counting = Arc::new(CountingController {
            handled: AtomicUsize::new(0),
        });
        let runtime = ConnectorRuntime::builder(fast_config())
            .controller(counting.clone())
            .data_plane_instance(
                DataPlaneInstance::new("dp-1", "http://localhost")
                    .allow_source("Memory")
                    .allow_dest("Counting"),
            )
            .build()
            .unwrap();

        let request = DataRequest::new("req-1", "tp-1", DataAddress::new("Counting"));
        let result = runtime
            .flow_manager()
            .initiate(&request, &DataAddress::new("Memory"), &Policy::empty())
            .await;
        assert_eq!(result, Ok(()));
        assert_eq!(counting.handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_register_after_start_rejected() {
        let mut runtime = ConnectorRuntime::builder(fast_config()).build().unwrap();
        let store = runtime.memory_store::<u32>();
        let machine = runtime
            .state_machine::<u32>(store.clone())
            .name("first")
            .processor(
                1,
                Arc::new(FnProcessor::new(|_e: &mut StatefulEntity<u32>| {
                    ProcessResult::Success(2)
                })),
            )
            .build()
            .unwrap();
        runtime.register_state_machine(machine).unwrap();
        runtime.start().unwrap();
        assert!(matches!(runtime.start(), Err(EngineError::Runtime(_))));

        let late = runtime
            .state_machine::<u32>(store)
            .name("late")
            .processor(
                2,
                Arc::new(FnProcessor::new(|_e: &mut StatefulEntity<u32>| {
                    ProcessResult::Success(3)
                })),
            )
            .build()
            .unwrap();
        assert!(runtime.register_state_machine(late).is_err());
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_machine_name() {
        let mut runtime = ConnectorRuntime::builder(fast_config()).build().unwrap();
        let store = runtime.memory_store::<u32>();
        for expect_ok in [true, false] {
            let machine = runtime
                .state_machine::<u32>(store.clone())
                .name("same")
                .processor(
                    1,
                    Arc::new(FnProcessor::new(|_e: &mut StatefulEntity<u32>| {
                        ProcessResult::Success(2)
                    })),
                )
                .build()
                .unwrap();
            assert_eq!(runtime.register_state_machine(machine).is_ok(), expect_ok);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_state_machine_and_data_plane_run_together() {
        let storage = Arc::new(MemoryStorage::new());
        storage.put("in/a", b"alpha".to_vec());

        let mut runtime = ConnectorRuntime::builder(fast_config())
            .source_factory(Arc::new(MemorySourceFactory::new(storage.clone())))
            .sink_factory(Arc::new(MemorySinkFactory::new(storage.clone())))
            .data_plane_instance(
                DataPlaneInstance::new("dp-1", "http://localhost")
                    .allow_source("Memory")
                    .allow_dest("Memory"),
            )
            .build()
            .unwrap();

        let store = runtime.memory_store::<u32>();
        let clock = Arc::clone(runtime.clock());
        store
            .create(StatefulEntity::new("tp-1", 1, 0, clock.as_ref()))
            .await
            .unwrap();
        let machine = runtime
            .state_machine::<u32>(store.clone())
            .processor(
                1,
                Arc::new(FnProcessor::new(|e: &mut StatefulEntity<u32>| {
                    *e.payload_mut() += 1;
                    ProcessResult::Success(2)
                })),
            )
            .build()
            .unwrap();
        runtime.register_state_machine(machine).unwrap();
        runtime.start().unwrap();

        let request = DataRequest::new(
            "req-1",
            "tp-copy",
            DataAddress::new("Memory").with_key_name("out"),
        );
        let result = runtime
            .flow_manager()
            .initiate(
                &request,
                &DataAddress::new("Memory").with_key_name("in"),
                &Policy::empty(),
            )
            .await;
        assert_eq!(result, Ok(()));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let advanced = store
                .find("tp-1")
                .await
                .unwrap()
                .is_some_and(|e| e.state() == 2);
            if advanced && storage.get("out/a").is_some() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "runtime made no progress");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(storage.get("out/a"), Some(b"alpha".to_vec()));
        let stats = runtime.stats();
        assert_eq!(stats.len(), 1);
        assert!(stats[0].1.advanced >= 1);
        runtime.shutdown().await;
    }
}
