//! Sink that writes the parts of a source in parallel partitions.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use super::pipeline::{DataSink, DataSource, Part};
use crate::flow::{ResponseStatus, StatusFailure, StatusResult};

pub const DEFAULT_PARTITION_SIZE: usize = 5;

/// Writes one partition of parts to the destination.
#[async_trait]
pub trait PartWriter: Send + Sync + fmt::Debug {
    async fn write_parts(&self, parts: Vec<Box<dyn Part>>) -> StatusResult;

    /// Runs once after every partition was written successfully.
    async fn complete(&self) -> StatusResult {
        Ok(())
    }
}

#[derive(Debug)]
pub struct ParallelSink {
    request_id: String,
    partition_size: usize,
    writer: Arc<dyn PartWriter>,
}

impl ParallelSink {
    pub fn new(request_id: impl Into<String>, writer: Arc<dyn PartWriter>) -> Self {
        Self {
            request_id: request_id.into(),
            partition_size: DEFAULT_PARTITION_SIZE,
            writer,
        }
    }

    pub fn with_partition_size(mut self, partition_size: usize) -> Self {
        self.partition_size = partition_size.max(1);
        self
    }

    pub fn partition_size(&self) -> usize {
        self.partition_size
    }
}

#[async_trait]
impl DataSink for ParallelSink {
    async fn transfer(&self, source: Arc<dyn DataSource>) -> StatusResult {
        let parts = match source.open_parts() {
            Ok(parts) => parts,
            Err(e) => {
                error!(request_id = %self.request_id, error = %e, "Error processing data transfer request");
                return Err(StatusFailure::retry("Error processing data transfer request"));
            }
        };

        let mut parts = parts.into_iter();
        let mut partitions = Vec::new();
        loop {
            let partition: Vec<Box<dyn Part>> = parts.by_ref().take(self.partition_size).collect();
            if partition.is_empty() {
                break;
            }
            let writer = Arc::clone(&self.writer);
            partitions.push(tokio::spawn(async move { writer.write_parts(partition).await }));
        }
        debug!(
            request_id = %self.request_id,
            partitions = partitions.len(),
            "Writing partitions"
        );

        // every partition is awaited, the first failure in partition order wins
        let mut failure = None;
        for handle in partitions {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(StatusFailure::retry(format!(
                    "Unhandled exception raised when transferring data: {e}"
                ))),
            };
            if let Err(f) = result
                && failure.is_none()
            {
                failure = Some(StatusFailure {
                    status: ResponseStatus::ErrorRetry,
                    messages: vec![f.messages.join(",")],
                });
            }
        }

        match failure {
            Some(failure) => Err(failure),
            None => self.writer.complete().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::memory::MemorySource;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct RecordingWriter {
        partitions: Mutex<Vec<Vec<String>>>,
        completed: AtomicUsize,
        fail_on: Option<&'static str>,
        panic_on: Option<&'static str>,
    }

    #[async_trait]
    impl PartWriter for RecordingWriter {
        async fn write_parts(&self, parts: Vec<Box<dyn Part>>) -> StatusResult {
            let names: Vec<String> = parts.iter().map(|p| p.name().to_string()).collect();
            if let Some(bad) = self.panic_on
                && names.iter().any(|n| n == bad)
            {
                panic!("writer crashed on {bad}");
            }
            if let Some(bad) = self.fail_on
                && names.iter().any(|n| n == bad)
            {
                return Err(StatusFailure::fatal(format!("cannot write {bad}")));
            }
            self.partitions.lock().unwrap().push(names);
            Ok(())
        }

        async fn complete(&self) -> StatusResult {
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn source(count: usize) -> Arc<MemorySource> {
        let parts = (0..count)
            .map(|i| (format!("part-{i}"), vec![i as u8]))
            .collect();
        Arc::new(MemorySource::new(parts))
    }

    #[tokio::test]
    async fn test_parts_are_partitioned() {
        let writer = Arc::new(RecordingWriter::default());
        let sink = ParallelSink::new("req-1", writer.clone());
        assert_eq!(sink.partition_size(), DEFAULT_PARTITION_SIZE);

        assert_eq!(sink.transfer(source(12)).await, Ok(()));

        let mut sizes: Vec<usize> = writer.partitions.lock().unwrap().iter().map(Vec::len).collect();
        sizes.sort();
        assert_eq!(sizes, vec![2, 5, 5]);
        assert_eq!(writer.completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_partition_is_retryable() {
        let writer = Arc::new(RecordingWriter {
            fail_on: Some("part-3"),
            ..Default::default()
        });
        let sink = ParallelSink::new("req-1", writer.clone()).with_partition_size(2);

        let failure = sink.transfer(source(6)).await.unwrap_err();
        assert_eq!(failure.status, ResponseStatus::ErrorRetry);
        assert_eq!(failure.messages, vec!["cannot write part-3"]);
        // other partitions still ran, completion did not
        assert_eq!(writer.partitions.lock().unwrap().len(), 2);
        assert_eq!(writer.completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_writer_panic_is_reported() {
        let writer = Arc::new(RecordingWriter {
            panic_on: Some("part-0"),
            ..Default::default()
        });
        let sink = ParallelSink::new("req-1", writer);

        let failure = sink.transfer(source(3)).await.unwrap_err();
        assert_eq!(failure.status, ResponseStatus::ErrorRetry);
        assert!(
            failure.messages[0].starts_with("Unhandled exception raised when transferring data"),
            "{:?}",
            failure.messages
        );
    }

    #[tokio::test]
    async fn test_empty_source_completes() {
        let writer = Arc::new(RecordingWriter::default());
        let sink = ParallelSink::new("req-1", writer.clone());
        assert_eq!(sink.transfer(source(0)).await, Ok(()));
        assert_eq!(writer.completed.load(Ordering::SeqCst), 1);
    }
}
