//! In-memory object storage with matching source and sink.
//!
//! Objects are keyed by path. A `keyName` either names one object or a prefix
//! whose objects (`{keyName}/{part}`) become the parts of the source.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::error::ValidationError;
use super::parallel_sink::{DEFAULT_PARTITION_SIZE, ParallelSink, PartWriter};
use super::pipeline::{DataSink, DataSinkFactory, DataSource, DataSourceFactory, Part};
use super::request::DataFlowRequest;
use crate::flow::{StatusFailure, StatusResult};

/// Address type served by the memory source and sink.
pub const MEMORY_TYPE: &str = "Memory";

#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: impl Into<String>, data: Vec<u8>) {
        self.objects.insert(key.into(), data);
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.get(key).map(|d| d.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Sorted keys starting with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// The object at `key` as a single part, or the objects under `key/`.
    fn parts_under(&self, key: &str) -> Vec<(String, Vec<u8>)> {
        if let Some(data) = self.get(key) {
            let name = key.rsplit('/').next().unwrap_or(key).to_string();
            return vec![(name, data)];
        }
        let prefix = format!("{key}/");
        self.keys_with_prefix(&prefix)
            .into_iter()
            .filter_map(|k| {
                let data = self.get(&k)?;
                Some((k[prefix.len()..].to_string(), data))
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct MemoryPart {
    name: String,
    data: Vec<u8>,
}

impl Part for MemoryPart {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> StatusResult<Vec<u8>> {
        Ok(self.data.clone())
    }
}

#[derive(Debug)]
pub struct MemorySource {
    parts: Vec<(String, Vec<u8>)>,
}

impl MemorySource {
    pub fn new(parts: Vec<(String, Vec<u8>)>) -> Self {
        Self { parts }
    }
}

impl DataSource for MemorySource {
    fn open_parts(&self) -> StatusResult<Vec<Box<dyn Part>>> {
        Ok(self
            .parts
            .iter()
            .map(|(name, data)| {
                Box::new(MemoryPart {
                    name: name.clone(),
                    data: data.clone(),
                }) as Box<dyn Part>
            })
            .collect())
    }
}

#[derive(Debug)]
struct MemoryPartWriter {
    storage: Arc<MemoryStorage>,
    prefix: String,
}

#[async_trait]
impl PartWriter for MemoryPartWriter {
    async fn write_parts(&self, parts: Vec<Box<dyn Part>>) -> StatusResult {
        for part in parts {
            let data = part.read()?;
            self.storage
                .put(format!("{}/{}", self.prefix, part.name()), data);
        }
        Ok(())
    }
}

/// Writes every part to `{prefix}/{part name}`.
#[derive(Debug)]
pub struct MemorySink {
    inner: ParallelSink,
}

impl MemorySink {
    pub fn new(storage: Arc<MemoryStorage>, prefix: impl Into<String>) -> Self {
        Self::with_partition_size(storage, prefix, "memory", DEFAULT_PARTITION_SIZE)
    }

    fn with_partition_size(
        storage: Arc<MemoryStorage>,
        prefix: impl Into<String>,
        request_id: &str,
        partition_size: usize,
    ) -> Self {
        let writer = MemoryPartWriter {
            storage,
            prefix: prefix.into(),
        };
        Self {
            inner: ParallelSink::new(request_id, Arc::new(writer))
                .with_partition_size(partition_size),
        }
    }
}

#[async_trait]
impl DataSink for MemorySink {
    async fn transfer(&self, source: Arc<dyn DataSource>) -> StatusResult {
        self.inner.transfer(source).await
    }
}

pub struct MemorySourceFactory {
    storage: Arc<MemoryStorage>,
}

impl MemorySourceFactory {
    pub fn new(storage: Arc<MemoryStorage>) -> Self {
        Self { storage }
    }
}

impl DataSourceFactory for MemorySourceFactory {
    fn can_handle(&self, request: &DataFlowRequest) -> bool {
        request.source.kind() == MEMORY_TYPE
    }

    fn validate(&self, request: &DataFlowRequest) -> Result<(), ValidationError> {
        match request.source.key_name() {
            Some(_) => Ok(()),
            None => Err(ValidationError::new("Missing keyName on memory source")),
        }
    }

    fn create_source(&self, request: &DataFlowRequest) -> StatusResult<Arc<dyn DataSource>> {
        let key = request
            .source
            .key_name()
            .ok_or_else(|| StatusFailure::fatal("Missing keyName on memory source"))?;
        let parts = self.storage.parts_under(key);
        if parts.is_empty() {
            return Err(StatusFailure::fatal(format!("No data found at {key}")));
        }
        Ok(Arc::new(MemorySource::new(parts)))
    }
}

pub struct MemorySinkFactory {
    storage: Arc<MemoryStorage>,
    partition_size: usize,
}

impl MemorySinkFactory {
    pub fn new(storage: Arc<MemoryStorage>) -> Self {
        Self {
            storage,
            partition_size: DEFAULT_PARTITION_SIZE,
        }
    }

    pub fn with_partition_size(mut self, partition_size: usize) -> Self {
        self.partition_size = partition_size;
        self
    }
}

impl DataSinkFactory for MemorySinkFactory {
    fn can_handle(&self, request: &DataFlowRequest) -> bool {
        request.destination.kind() == MEMORY_TYPE
    }

    fn validate(&self, request: &DataFlowRequest) -> Result<(), ValidationError> {
        match request.destination.key_name() {
            Some(_) => Ok(()),
            None => Err(ValidationError::new("Missing keyName on memory destination")),
        }
    }

    fn create_sink(&self, request: &DataFlowRequest) -> StatusResult<Arc<dyn DataSink>> {
        let prefix = request
            .destination
            .key_name()
            .ok_or_else(|| StatusFailure::fatal("Missing keyName on memory destination"))?;
        Ok(Arc::new(MemorySink::with_partition_size(
            Arc::clone(&self.storage),
            prefix,
            &request.id,
            self.partition_size,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parts_under_key_or_prefix() {
        let storage = MemoryStorage::new();
        storage.put("single/report.csv", b"r".to_vec());
        storage.put("batch/2", b"2".to_vec());
        storage.put("batch/1", b"1".to_vec());
        storage.put("batchx/ignored", b"x".to_vec());

        let single = storage.parts_under("single/report.csv");
        assert_eq!(single, vec![("report.csv".to_string(), b"r".to_vec())]);

        let batch = storage.parts_under("batch");
        assert_eq!(
            batch,
            vec![("1".to_string(), b"1".to_vec()), ("2".to_string(), b"2".to_vec())]
        );
        assert!(storage.parts_under("missing").is_empty());
    }

    #[test]
    fn test_source_factory_rejects_missing_data() {
        use crate::core_types::DataAddress;

        let factory = MemorySourceFactory::new(Arc::new(MemoryStorage::new()));
        let request = DataFlowRequest::new(
            "tp-1",
            DataAddress::new(MEMORY_TYPE).with_key_name("nothing"),
            DataAddress::new(MEMORY_TYPE).with_key_name("out"),
        );
        assert!(factory.can_handle(&request));
        assert!(factory.validate(&request).is_ok());
        let failure = factory.create_source(&request).unwrap_err();
        assert_eq!(failure.messages, vec!["No data found at nothing"]);
    }
}
