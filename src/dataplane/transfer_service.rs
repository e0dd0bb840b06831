//! Transfer services and their registry

use std::sync::Arc;

use async_trait::async_trait;

use super::error::ValidationError;
use super::pipeline::PipelineService;
use super::request::DataFlowRequest;
use crate::flow::StatusResult;

/// Executes data flow requests of the kinds it can handle.
#[async_trait]
pub trait TransferService: Send + Sync {
    fn name(&self) -> &str;

    fn can_handle(&self, request: &DataFlowRequest) -> bool;

    fn validate(&self, request: &DataFlowRequest) -> Result<(), ValidationError>;

    async fn transfer(&self, request: &DataFlowRequest) -> StatusResult;
}

/// Runs requests through a [`PipelineService`].
pub struct PipelineTransferService {
    pipeline: Arc<PipelineService>,
}

impl PipelineTransferService {
    pub fn new(pipeline: Arc<PipelineService>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl TransferService for PipelineTransferService {
    fn name(&self) -> &str {
        "pipeline"
    }

    fn can_handle(&self, request: &DataFlowRequest) -> bool {
        self.pipeline.can_handle(request)
    }

    fn validate(&self, request: &DataFlowRequest) -> Result<(), ValidationError> {
        self.pipeline.validate(request)
    }

    async fn transfer(&self, request: &DataFlowRequest) -> StatusResult {
        self.pipeline.transfer(request).await
    }
}

/// Picks one service among those able to handle a request.
pub trait TransferServiceSelectionStrategy: Send + Sync {
    fn choose(&self, candidates: &[Arc<dyn TransferService>]) -> Option<Arc<dyn TransferService>>;
}

/// First capable service in registration order.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectFirst;

impl TransferServiceSelectionStrategy for SelectFirst {
    fn choose(&self, candidates: &[Arc<dyn TransferService>]) -> Option<Arc<dyn TransferService>> {
        candidates.first().cloned()
    }
}

pub struct TransferServiceRegistry {
    services: Vec<Arc<dyn TransferService>>,
    strategy: Arc<dyn TransferServiceSelectionStrategy>,
}

impl Default for TransferServiceRegistry {
    fn default() -> Self {
        Self::new(Arc::new(SelectFirst))
    }
}

impl TransferServiceRegistry {
    pub fn new(strategy: Arc<dyn TransferServiceSelectionStrategy>) -> Self {
        Self {
            services: Vec::new(),
            strategy,
        }
    }

    pub fn register(&mut self, service: Arc<dyn TransferService>) {
        self.services.push(service);
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn resolve(&self, request: &DataFlowRequest) -> Option<Arc<dyn TransferService>> {
        let capable: Vec<Arc<dyn TransferService>> = self
            .services
            .iter()
            .filter(|s| s.can_handle(request))
            .cloned()
            .collect();
        self.strategy.choose(&capable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::DataAddress;

    struct FixedService {
        name: &'static str,
        handles: bool,
    }

    #[async_trait]
    impl TransferService for FixedService {
        fn name(&self) -> &str {
            self.name
        }

        fn can_handle(&self, _request: &DataFlowRequest) -> bool {
            self.handles
        }

        fn validate(&self, _request: &DataFlowRequest) -> Result<(), ValidationError> {
            Ok(())
        }

        async fn transfer(&self, _request: &DataFlowRequest) -> StatusResult {
            Ok(())
        }
    }

    struct SelectLast;

    impl TransferServiceSelectionStrategy for SelectLast {
        fn choose(&self, candidates: &[Arc<dyn TransferService>]) -> Option<Arc<dyn TransferService>> {
            candidates.last().cloned()
        }
    }

    fn request() -> DataFlowRequest {
        DataFlowRequest::new("tp-1", DataAddress::new("a"), DataAddress::new("b"))
    }

    fn services(registry: &mut TransferServiceRegistry) {
        for (name, handles) in [("one", false), ("two", true), ("three", true)] {
            registry.register(Arc::new(FixedService { name, handles }));
        }
    }

    #[test]
    fn test_select_first_capable() {
        let mut registry = TransferServiceRegistry::default();
        assert!(registry.resolve(&request()).is_none());

        services(&mut registry);
        assert_eq!(registry.len(), 3);
        let chosen = registry.resolve(&request()).unwrap();
        assert_eq!(chosen.name(), "two");
    }

    #[test]
    fn test_strategy_sees_only_capable_services() {
        let mut registry = TransferServiceRegistry::new(Arc::new(SelectLast));
        services(&mut registry);
        assert_eq!(registry.resolve(&request()).unwrap().name(), "three");
    }
}
