//! Typed status results returned across the flow and data plane boundary.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    /// Transient; the caller may try again later.
    ErrorRetry,
    /// Terminal; retrying cannot succeed.
    FatalError,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::ErrorRetry => "ERROR_RETRY",
            ResponseStatus::FatalError => "FATAL_ERROR",
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failed outcome of a flow operation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{status}: {}", .messages.join(", "))]
pub struct StatusFailure {
    pub status: ResponseStatus,
    pub messages: Vec<String>,
}

impl StatusFailure {
    pub fn new(status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            messages: vec![message.into()],
        }
    }

    pub fn retry(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::ErrorRetry, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::FatalError, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.status == ResponseStatus::ErrorRetry
    }

    /// All messages joined with ", ".
    pub fn detail(&self) -> String {
        self.messages.join(", ")
    }
}

pub type StatusResult<T = ()> = Result<T, StatusFailure>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_display() {
        let failure = StatusFailure {
            status: ResponseStatus::ErrorRetry,
            messages: vec!["part-1 failed".into(), "part-2 failed".into()],
        };
        assert!(failure.is_retryable());
        assert_eq!(failure.detail(), "part-1 failed, part-2 failed");
        assert_eq!(failure.to_string(), "ERROR_RETRY: part-1 failed, part-2 failed");
        assert!(!StatusFailure::fatal("x").is_retryable());
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&ResponseStatus::FatalError).unwrap();
        assert_eq!(json, "\"FATAL_ERROR\"");
        let status: ResponseStatus = serde_json::from_str("\"ERROR_RETRY\"").unwrap();
        assert_eq!(status, ResponseStatus::ErrorRetry);
    }
}
