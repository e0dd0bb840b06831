//! Data transfer pipeline
//!
//! A [`PipelineService`] builds a source and a sink for a request from the
//! first registered factories that accept it, then lets the sink pull every part
//! of the source.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::error::ValidationError;
use super::request::DataFlowRequest;
use crate::flow::{StatusFailure, StatusResult};

/// One independently transferable unit of a source (a file, an object).
pub trait Part: Send + Sync {
    fn name(&self) -> &str;

    fn read(&self) -> StatusResult<Vec<u8>>;
}

pub trait DataSource: Send + Sync + fmt::Debug {
    fn open_parts(&self) -> StatusResult<Vec<Box<dyn Part>>>;
}

#[async_trait]
pub trait DataSink: Send + Sync + fmt::Debug {
    async fn transfer(&self, source: Arc<dyn DataSource>) -> StatusResult;
}

pub trait DataSourceFactory: Send + Sync {
    fn can_handle(&self, request: &DataFlowRequest) -> bool;

    fn validate(&self, request: &DataFlowRequest) -> Result<(), ValidationError>;

    fn create_source(&self, request: &DataFlowRequest) -> StatusResult<Arc<dyn DataSource>>;
}

pub trait DataSinkFactory: Send + Sync {
    fn can_handle(&self, request: &DataFlowRequest) -> bool;

    fn validate(&self, request: &DataFlowRequest) -> Result<(), ValidationError>;

    fn create_sink(&self, request: &DataFlowRequest) -> StatusResult<Arc<dyn DataSink>>;
}

#[derive(Default)]
pub struct PipelineService {
    source_factories: Vec<Arc<dyn DataSourceFactory>>,
    sink_factories: Vec<Arc<dyn DataSinkFactory>>,
}

impl PipelineService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source_factory(&mut self, factory: Arc<dyn DataSourceFactory>) {
        self.source_factories.push(factory);
    }

    pub fn register_sink_factory(&mut self, factory: Arc<dyn DataSinkFactory>) {
        self.sink_factories.push(factory);
    }

    fn source_factory(&self, request: &DataFlowRequest) -> Option<&Arc<dyn DataSourceFactory>> {
        self.source_factories.iter().find(|f| f.can_handle(request))
    }

    fn sink_factory(&self, request: &DataFlowRequest) -> Option<&Arc<dyn DataSinkFactory>> {
        self.sink_factories.iter().find(|f| f.can_handle(request))
    }

    pub fn can_handle(&self, request: &DataFlowRequest) -> bool {
        self.source_factory(request).is_some() && self.sink_factory(request).is_some()
    }

    /// Validate both ends of the request.
    ///
    /// Unsupported ends are reported by request id only; address types are
    /// internal and stay out of the message.
    pub fn validate(&self, request: &DataFlowRequest) -> Result<(), ValidationError> {
        let Some(source_factory) = self.source_factory(request) else {
            return Err(ValidationError::new(format!(
                "Data source not supported for: {}",
                request.id
            )));
        };
        source_factory.validate(request)?;

        let Some(sink_factory) = self.sink_factory(request) else {
            return Err(ValidationError::new(format!(
                "Data sink not supported for: {}",
                request.id
            )));
        };
        sink_factory.validate(request)
    }

    pub async fn transfer(&self, request: &DataFlowRequest) -> StatusResult {
        let source = self.create_source(request)?;
        let sink = self.create_sink(request)?;
        debug!(process_id = %request.process_id, ?source, ?sink, "Transferring");
        sink.transfer(source).await
    }

    /// Transfer from a caller-supplied source into the sink built for the request.
    pub async fn transfer_with_source(
        &self,
        source: Arc<dyn DataSource>,
        request: &DataFlowRequest,
    ) -> StatusResult {
        let sink = self.create_sink(request)?;
        debug!(process_id = %request.process_id, ?source, ?sink, "Transferring");
        sink.transfer(source).await
    }

    /// Transfer from the source built for the request into a caller-supplied sink.
    pub async fn transfer_with_sink(
        &self,
        sink: Arc<dyn DataSink>,
        request: &DataFlowRequest,
    ) -> StatusResult {
        let source = self.create_source(request)?;
        debug!(process_id = %request.process_id, ?source, ?sink, "Transferring");
        sink.transfer(source).await
    }

    fn create_source(&self, request: &DataFlowRequest) -> StatusResult<Arc<dyn DataSource>> {
        match self.source_factory(request) {
            Some(factory) => factory.create_source(request),
            None => Err(StatusFailure::fatal(format!(
                "Unknown data source type: {}",
                request.source.kind()
            ))),
        }
    }

    fn create_sink(&self, request: &DataFlowRequest) -> StatusResult<Arc<dyn DataSink>> {
        match self.sink_factory(request) {
            Some(factory) => factory.create_sink(request),
            None => Err(StatusFailure::fatal(format!(
                "Unknown data sink type: {}",
                request.destination.kind()
            ))),
        }
    }
}
