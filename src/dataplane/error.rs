//! Data plane error types

use thiserror::Error;

use crate::core_types::ProcessId;

/// Rejected data flow request. Messages are safe to return to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .messages.join(", "))]
pub struct ValidationError {
    pub messages: Vec<String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
        }
    }

    /// Collect the messages of all failed checks, in order.
    pub fn merge(results: impl IntoIterator<Item = Result<(), ValidationError>>) -> Result<(), ValidationError> {
        let messages: Vec<String> = results
            .into_iter()
            .filter_map(Result::err)
            .flat_map(|e| e.messages)
            .collect();
        if messages.is_empty() {
            Ok(())
        } else {
            Err(Self { messages })
        }
    }
}

#[derive(Debug, Error)]
pub enum DataPlaneError {
    #[error("Transfer queue is full, rejected {0}")]
    QueueFull(ProcessId),

    #[error("Data plane manager is not running")]
    NotRunning,

    #[error("Data plane manager is already running")]
    AlreadyRunning,

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unknown selection strategy: {0}")]
    UnknownStrategy(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DataPlaneError {
    /// Conditions a caller can wait out.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DataPlaneError::QueueFull(_) | DataPlaneError::NotRunning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_order() {
        let merged = ValidationError::merge([
            Ok(()),
            Err(ValidationError::new("missing keyName")),
            Err(ValidationError::new("missing bucket")),
        ]);
        let err = merged.unwrap_err();
        assert_eq!(err.messages, vec!["missing keyName", "missing bucket"]);
        assert_eq!(err.to_string(), "missing keyName, missing bucket");

        assert!(ValidationError::merge([Ok(()), Ok(())]).is_ok());
    }

    #[test]
    fn test_retryable() {
        assert!(DataPlaneError::QueueFull("tp-1".into()).is_retryable());
        assert!(DataPlaneError::NotRunning.is_retryable());
        assert!(!DataPlaneError::Validation(ValidationError::new("x")).is_retryable());
    }
}
