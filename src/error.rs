//! Engine-level errors

use std::any::Any;

use thiserror::Error;

use crate::dataplane::DataPlaneError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Data plane error: {0}")]
    DataPlane(#[from] DataPlaneError),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Best-effort message of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_downcasts() {
        let caught = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom");

        let caught = std::panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "code 7");

        let caught = std::panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "unknown panic");
    }

    #[test]
    fn test_store_error_converts() {
        let err: EngineError = StoreError::Timeout(50).into();
        assert_eq!(err.to_string(), "Store error: Store operation timed out after 50ms");
    }
}
