//! Data Plane Manager
//!
//! Accepts data flow requests onto a bounded queue and executes them on a pool
//! of worker tasks. Callers never wait for a transfer; progress is visible
//! through [`DataPlaneManager::transfer_state`] and the transfer process client.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::client::{NoopTransferProcessClient, TransferProcessClient};
use super::error::{DataPlaneError, ValidationError};
use super::pipeline::{DataSink, DataSource, PipelineService};
use super::request::DataFlowRequest;
use super::state::TransferState;
use super::store::{DEFAULT_STORE_CAPACITY, DataPlaneStore, InMemoryDataPlaneStore};
use super::transfer_service::{PipelineTransferService, TransferServiceRegistry};
use crate::entity::{Clock, SystemClock};
use crate::error::panic_message;
use crate::flow::{StatusFailure, StatusResult};

/// Trace context key stamped on every accepted request.
pub const RECEIVED_AT_KEY: &str = "dataplane.received_at";

/// Data plane section of the app config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPlaneConfig {
    pub queue_capacity: usize,
    pub workers: usize,
    /// How long an idle worker waits on the queue before polling again
    pub wait_timeout_ms: u64,
    /// Execution records kept before the oldest finished one is evicted
    pub store_capacity: usize,
    /// Strategy used to pick a data plane instance
    pub selection_strategy: String,
}

impl Default for DataPlaneConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            workers: 10,
            wait_timeout_ms: 1_000,
            store_capacity: DEFAULT_STORE_CAPACITY,
            selection_strategy: "random".to_string(),
        }
    }
}

struct Worker {
    registry: Arc<TransferServiceRegistry>,
    store: Arc<dyn DataPlaneStore>,
    client: Arc<dyn TransferProcessClient>,
}

impl Worker {
    async fn run(
        self: Arc<Self>,
        id: usize,
        queue: Arc<AsyncMutex<Receiver<DataFlowRequest>>>,
        wait: Duration,
    ) {
        debug!(worker = id, "Data plane worker started");
        loop {
            let next = {
                let mut queue = queue.lock().await;
                tokio::time::timeout(wait, queue.recv()).await
            };
            match next {
                Ok(Some(request)) => self.process(request).await,
                // closed and drained
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        debug!(worker = id, "Data plane worker stopped");
    }

    async fn process(&self, request: DataFlowRequest) {
        let process_id = request.process_id.as_str();

        let result = match self.registry.resolve(&request) {
            None => {
                error!(process_id = %process_id, "No transfer service for request");
                Err(StatusFailure::fatal("no transfer service"))
            }
            Some(service) => {
                debug!(process_id = %process_id, service = service.name(), "Starting transfer");
                match AssertUnwindSafe(service.transfer(&request))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(payload) => Err(StatusFailure::fatal(format!(
                        "Unhandled exception raised when transferring data: {}",
                        panic_message(payload.as_ref())
                    ))),
                }
            }
        };

        if request.trackable {
            match &result {
                Ok(()) => self.store.completed(process_id),
                Err(failure) => self.store.failed(process_id, &failure.detail()),
            }
        }

        let notification = match &result {
            Ok(()) => self.client.completed(&request).await,
            Err(failure) => self.client.failed(&request, &failure.detail()).await,
        };
        match notification {
            Ok(()) => {
                if request.trackable {
                    self.store.notified(process_id);
                }
            }
            Err(e) => warn!(process_id = %process_id, error = %e, "Failed to notify transfer process"),
        }

        match &result {
            Ok(()) => info!(process_id = %process_id, "Data flow completed"),
            Err(failure) => warn!(
                process_id = %process_id,
                status = %failure.status,
                error = %failure.detail(),
                "Data flow failed"
            ),
        }
    }
}

pub struct DataPlaneManager {
    config: DataPlaneConfig,
    pipeline: Arc<PipelineService>,
    registry: Arc<TransferServiceRegistry>,
    store: Arc<dyn DataPlaneStore>,
    clock: Arc<dyn Clock>,
    worker: Arc<Worker>,
    sender: Mutex<Option<Sender<DataFlowRequest>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DataPlaneManager {
    pub fn builder() -> DataPlaneManagerBuilder {
        DataPlaneManagerBuilder::default()
    }

    pub fn config(&self) -> &DataPlaneConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DataPlaneStore> {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_ok_and(|s| s.is_some())
    }

    /// Spawn the workers. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), DataPlaneError> {
        let mut sender = self.sender.lock().map_err(|_| DataPlaneError::NotRunning)?;
        if sender.is_some() {
            return Err(DataPlaneError::AlreadyRunning);
        }
        let mut tasks = self.tasks.lock().map_err(|_| DataPlaneError::NotRunning)?;

        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let queue = Arc::new(AsyncMutex::new(rx));
        let wait = Duration::from_millis(self.config.wait_timeout_ms);
        for id in 0..self.config.workers {
            let worker = Arc::clone(&self.worker);
            tasks.push(tokio::spawn(worker.run(id, Arc::clone(&queue), wait)));
        }
        *sender = Some(tx);

        info!(
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            "Data plane manager started"
        );
        Ok(())
    }

    /// Stop accepting requests and wait until the queued ones are done.
    pub async fn stop(&self) {
        let sender = self.sender.lock().ok().and_then(|mut s| s.take());
        drop(sender);

        let tasks = self
            .tasks
            .lock()
            .map(|mut t| std::mem::take(&mut *t))
            .unwrap_or_default();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Data plane worker failed");
            }
        }
        info!("Data plane manager stopped");
    }

    /// Abort the workers; queued and running transfers are dropped.
    pub fn force_stop(&self) {
        let sender = self.sender.lock().ok().and_then(|mut s| s.take());
        drop(sender);

        let tasks = self
            .tasks
            .lock()
            .map(|mut t| std::mem::take(&mut *t))
            .unwrap_or_default();
        for task in &tasks {
            task.abort();
        }
        warn!(workers = tasks.len(), "Data plane manager force stopped");
    }

    /// Check that some transfer service accepts the request. Has no side effects.
    pub fn validate(&self, request: &DataFlowRequest) -> Result<(), ValidationError> {
        match self.registry.resolve(request) {
            Some(service) => service.validate(request),
            None => Err(ValidationError::new(format!(
                "Cannot find a transfer service that can handle {} source and {} destination",
                request.source.kind(),
                request.destination.kind()
            ))),
        }
    }

    /// Queue the request without waiting for capacity.
    pub fn initiate_transfer(&self, mut request: DataFlowRequest) -> Result<(), DataPlaneError> {
        let sender = self
            .sender
            .lock()
            .ok()
            .and_then(|s| s.clone())
            .ok_or(DataPlaneError::NotRunning)?;

        request
            .trace_context
            .entry(RECEIVED_AT_KEY.to_string())
            .or_insert_with(|| self.clock.millis().to_string());
        let process_id = request.process_id.clone();
        let trackable = request.trackable;

        // recorded before queueing so a fast worker cannot finish first
        if trackable {
            self.store.received(&process_id);
        }
        let rejected = match sender.try_send(request) {
            Ok(()) => {
                debug!(process_id = %process_id, "Data flow request queued");
                return Ok(());
            }
            Err(TrySendError::Full(_)) => {
                warn!(process_id = %process_id, "Transfer queue full");
                DataPlaneError::QueueFull(process_id.clone())
            }
            Err(TrySendError::Closed(_)) => DataPlaneError::NotRunning,
        };
        if trackable {
            self.store.remove(&process_id);
        }
        Err(rejected)
    }

    pub async fn transfer_with_source(
        &self,
        source: Arc<dyn DataSource>,
        request: &DataFlowRequest,
    ) -> StatusResult {
        self.pipeline.transfer_with_source(source, request).await
    }

    pub async fn transfer_with_sink(
        &self,
        sink: Arc<dyn DataSink>,
        request: &DataFlowRequest,
    ) -> StatusResult {
        self.pipeline.transfer_with_sink(sink, request).await
    }

    pub fn transfer_state(&self, process_id: &str) -> TransferState {
        self.store.state(process_id)
    }
}

#[derive(Default)]
pub struct DataPlaneManagerBuilder {
    config: DataPlaneConfig,
    pipeline: Option<Arc<PipelineService>>,
    registry: Option<Arc<TransferServiceRegistry>>,
    store: Option<Arc<dyn DataPlaneStore>>,
    client: Option<Arc<dyn TransferProcessClient>>,
    clock: Option<Arc<dyn Clock>>,
}

impl DataPlaneManagerBuilder {
    pub fn config(mut self, config: DataPlaneConfig) -> Self {
        self.config = config;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn wait_timeout_ms(mut self, wait_timeout_ms: u64) -> Self {
        self.config.wait_timeout_ms = wait_timeout_ms;
        self
    }

    pub fn pipeline(mut self, pipeline: Arc<PipelineService>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Defaults to a registry holding one transfer service over the pipeline.
    pub fn registry(mut self, registry: Arc<TransferServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn store(mut self, store: Arc<dyn DataPlaneStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn client(mut self, client: Arc<dyn TransferProcessClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<DataPlaneManager, DataPlaneError> {
        if self.config.queue_capacity == 0 {
            return Err(DataPlaneError::Config(
                "queue_capacity must be positive".to_string(),
            ));
        }
        if self.config.workers == 0 {
            return Err(DataPlaneError::Config("workers must be positive".to_string()));
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let pipeline = self.pipeline.unwrap_or_default();
        let registry = self.registry.unwrap_or_else(|| {
            let mut registry = TransferServiceRegistry::default();
            registry.register(Arc::new(PipelineTransferService::new(Arc::clone(&pipeline))));
            Arc::new(registry)
        });
        let store = self.store.unwrap_or_else(|| {
            Arc::new(InMemoryDataPlaneStore::with_clock(
                self.config.store_capacity,
                Arc::clone(&clock),
            ))
        });
        let client = self
            .client
            .unwrap_or_else(|| Arc::new(NoopTransferProcessClient));

        Ok(DataPlaneManager {
            worker: Arc::new(Worker {
                registry: Arc::clone(&registry),
                store: Arc::clone(&store),
                client,
            }),
            config: self.config,
            pipeline,
            registry,
            store,
            clock,
            sender: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }
}
