//! Core types used throughout the system
//!
//! Identifiers, addresses and the opaque usage policy shared by the state machine,
//! the flow manager and the data plane.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Entity ID - opaque, globally unique identifier of a stateful entity.
pub type EntityId = String;

/// Process ID - identifies a transfer process across control and data plane.
pub type ProcessId = String;

/// Epoch milliseconds, as produced by [`crate::entity::Clock::millis`].
pub type Millis = i64;

/// Location of data, described by a type and free-form properties.
///
/// The engine never interprets the properties; sources, sinks and controllers
/// decide which keys they need.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataAddress {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl DataAddress {
    /// Property holding the key (object name, file name) at the address.
    pub const KEY_NAME: &'static str = "keyName";

    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_key_name(self, key_name: impl Into<String>) -> Self {
        self.with_property(Self::KEY_NAME, key_name)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn key_name(&self) -> Option<&str> {
        self.property(Self::KEY_NAME)
    }
}

impl fmt::Display for DataAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key_name() {
            Some(key) => write!(f, "{}[{}]", self.kind, key),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Contract agreement usage policy.
///
/// Policy evaluation lives outside the engine, so the policy is carried as raw JSON.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Policy(pub serde_json::Value);

impl Policy {
    pub fn empty() -> Self {
        Self(serde_json::Value::Null)
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }
}
