use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::dataplane::DataPlaneConfig;
use crate::error::EngineError;
use crate::retry::RetryConfig;
use crate::state_machine::StateMachineConfig;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub state_machine: StateMachineConfig,
    #[serde(default)]
    pub lease: LeaseConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub data_plane: DataPlaneConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    /// `hourly`, `daily` or `never`
    pub rotation: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "connector.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
        }
    }
}

/// Lease granted on every entity fetched by a state machine.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct LeaseConfig {
    pub duration_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            duration_ms: 60_000,
        }
    }
}

impl LeaseConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

impl AppConfig {
    /// Load `config/{env}.yaml`.
    pub fn load(env: &str) -> Result<Self, EngineError> {
        let config_path = format!("config/{}.yaml", env);
        Self::from_file(&config_path)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, EngineError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.state_machine.batch_size == 0 {
            return Err(EngineError::Config(
                "state_machine.batch_size must be positive".to_string(),
            ));
        }
        if self.lease.duration_ms == 0 {
            return Err(EngineError::Config(
                "lease.duration_ms must be positive".to_string(),
            ));
        }
        if self.data_plane.queue_capacity == 0 {
            return Err(EngineError::Config(
                "data_plane.queue_capacity must be positive".to_string(),
            ));
        }
        if !matches!(self.log.rotation.as_str(), "hourly" | "daily" | "never") {
            return Err(EngineError::Config(format!(
                "Unknown log rotation: {}",
                self.log.rotation
            )));
        }
        Ok(())
    }
}
