//! Connector Engine - demo process
//!
//! Runs one state machine that initiates data flows for transfer processes and
//! an embedded data plane that copies between in-memory locations:
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ StateMachine │───▶│ FlowManager  │───▶│  DataPlane   │───▶│ MemoryStorage│
//! │ (REQUESTING) │    │ (controller) │    │ (queue+pool) │    │  (sink)      │
//! └──────────────┘    └──────────────┘    └──────────────┘    └──────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use connector_engine::config::AppConfig;
use connector_engine::dataplane::{
    DataPlaneInstance, MEMORY_TYPE, MemorySinkFactory, MemorySourceFactory, MemoryStorage,
};
use connector_engine::{
    ConnectorRuntime, DataAddress, DataFlowManager, DataRequest, EntityProcessor, Policy,
    ProcessResult, StateEntityStore, StatefulEntity,
};

// ============================================================
// TRANSFER PROCESS STATES
// ============================================================

const REQUESTING: i32 = 100;
const IN_PROGRESS: i32 = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TransferPayload {
    request: DataRequest,
    content_address: DataAddress,
}

/// Initiates the data flow of a transfer process in `REQUESTING`.
struct InitiateFlowProcessor {
    flow_manager: Arc<DataFlowManager>,
}

#[async_trait]
impl EntityProcessor<TransferPayload> for InitiateFlowProcessor {
    async fn process(&self, entity: &mut StatefulEntity<TransferPayload>) -> ProcessResult {
        let payload = entity.payload();
        let result = self
            .flow_manager
            .initiate(&payload.request, &payload.content_address, &Policy::empty())
            .await;
        ProcessResult::from_status(result, IN_PROGRESS)
    }
}

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn get_demo_count() -> usize {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--transfers" && i + 1 < args.len() {
            return args[i + 1].parse().unwrap_or(3);
        }
    }
    3
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config =
        AppConfig::load(&env).with_context(|| format!("loading configuration for {env}"))?;
    let _log_guard = connector_engine::logging::init_logging(&app_config.log);

    info!(
        env = %env,
        git_hash = env!("GIT_HASH"),
        "Starting connector engine"
    );

    let storage = Arc::new(MemoryStorage::new());
    let mut runtime = ConnectorRuntime::builder(app_config)
        .source_factory(Arc::new(MemorySourceFactory::new(Arc::clone(&storage))))
        .sink_factory(Arc::new(MemorySinkFactory::new(Arc::clone(&storage))))
        .data_plane_instance(
            DataPlaneInstance::new("embedded", "local://embedded")
                .allow_source(MEMORY_TYPE)
                .allow_dest(MEMORY_TYPE),
        )
        .build()?;

    let store = runtime.memory_store::<TransferPayload>();
    let processor = Arc::new(InitiateFlowProcessor {
        flow_manager: Arc::clone(runtime.flow_manager()),
    });
    let machine = runtime
        .state_machine::<TransferPayload>(store.clone())
        .name("transfer-process")
        .processor(REQUESTING, processor)
        .build()?;
    runtime.register_state_machine(machine)?;

    let clock = Arc::clone(runtime.clock());
    for i in 0..get_demo_count() {
        let process_id = format!("tp-{i}");
        storage.put(format!("assets/{process_id}/part-0"), format!("payload {i}").into_bytes());
        let payload = TransferPayload {
            request: DataRequest::new(
                uuid::Uuid::new_v4().to_string(),
                process_id.clone(),
                DataAddress::new(MEMORY_TYPE).with_key_name(format!("delivered/{process_id}")),
            ),
            content_address: DataAddress::new(MEMORY_TYPE)
                .with_key_name(format!("assets/{process_id}")),
        };
        store
            .create(StatefulEntity::new(process_id, REQUESTING, payload, clock.as_ref()))
            .await?;
    }

    runtime.start()?;

    let mut report = tokio::time::interval(Duration::from_secs(5));
    report.tick().await;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C, shutting down");
                }
                break;
            }
            _ = report.tick() => {
                for (name, stats) in runtime.stats() {
                    info!(machine = %name, %stats, "State machine progress");
                }
                info!(
                    delivered = storage.keys_with_prefix("delivered/").len(),
                    "Data plane progress"
                );
            }
        }
    }

    info!("Shutting down");
    runtime.shutdown().await;
    Ok(())
}
