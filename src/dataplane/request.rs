use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core_types::{DataAddress, ProcessId};

fn trackable_default() -> bool {
    true
}

/// Request to move data from `source` to `destination` on behalf of a transfer
/// process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFlowRequest {
    pub id: String,
    pub process_id: ProcessId,
    pub source: DataAddress,
    pub destination: DataAddress,
    /// Untracked requests leave no execution record behind.
    #[serde(default = "trackable_default")]
    pub trackable: bool,
    #[serde(default)]
    pub trace_context: HashMap<String, String>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl DataFlowRequest {
    pub fn new(
        process_id: impl Into<ProcessId>,
        source: DataAddress,
        destination: DataAddress,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            process_id: process_id.into(),
            source,
            destination,
            trackable: true,
            trace_context: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn untracked(mut self) -> Self {
        self.trackable = false;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
