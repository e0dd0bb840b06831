use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core_types::{DataAddress, ProcessId};

/// Control plane request to move the data of an asset to a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    pub id: String,
    pub process_id: ProcessId,
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub contract_id: Option<String>,
    pub destination_type: String,
    pub data_destination: DataAddress,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl DataRequest {
    /// `destination_type` is taken from the destination address.
    pub fn new(
        id: impl Into<String>,
        process_id: impl Into<ProcessId>,
        data_destination: DataAddress,
    ) -> Self {
        Self {
            id: id.into(),
            process_id: process_id.into(),
            asset_id: None,
            contract_id: None,
            destination_type: data_destination.kind().to_string(),
            data_destination,
            properties: HashMap::new(),
        }
    }

    pub fn with_asset(mut self, asset_id: impl Into<String>) -> Self {
        self.asset_id = Some(asset_id.into());
        self
    }

    pub fn with_contract(mut self, contract_id: impl Into<String>) -> Self {
        self.contract_id = Some(contract_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
