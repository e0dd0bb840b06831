//! Data plane instance selection

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::error::DataPlaneError;
use crate::core_types::{DataAddress, Millis};

/// A data plane the control plane can delegate transfers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPlaneInstance {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub allowed_source_types: HashSet<String>,
    #[serde(default)]
    pub allowed_dest_types: HashSet<String>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    #[serde(default)]
    pub turn_count: u64,
    #[serde(default)]
    pub last_active: Millis,
}

impl DataPlaneInstance {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            allowed_source_types: HashSet::new(),
            allowed_dest_types: HashSet::new(),
            properties: HashMap::new(),
            turn_count: 0,
            last_active: 0,
        }
    }

    pub fn allow_source(mut self, kind: impl Into<String>) -> Self {
        self.allowed_source_types.insert(kind.into());
        self
    }

    pub fn allow_dest(mut self, kind: impl Into<String>) -> Self {
        self.allowed_dest_types.insert(kind.into());
        self
    }

    pub fn can_handle(&self, source: &DataAddress, destination: &DataAddress) -> bool {
        self.allowed_source_types.contains(source.kind())
            && self.allowed_dest_types.contains(destination.kind())
    }
}

pub trait SelectionStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, instances: &[DataPlaneInstance]) -> Option<DataPlaneInstance>;
}

/// Uniformly random choice.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelectionStrategy;

impl SelectionStrategy for RandomSelectionStrategy {
    fn name(&self) -> &str {
        "random"
    }

    fn apply(&self, instances: &[DataPlaneInstance]) -> Option<DataPlaneInstance> {
        instances.choose(&mut rand::thread_rng()).cloned()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FirstSelectionStrategy;

impl SelectionStrategy for FirstSelectionStrategy {
    fn name(&self) -> &str {
        "first"
    }

    fn apply(&self, instances: &[DataPlaneInstance]) -> Option<DataPlaneInstance> {
        instances.first().cloned()
    }
}

/// Known data plane instances plus named selection strategies.
pub struct DataPlaneSelector {
    instances: Vec<DataPlaneInstance>,
    strategies: Vec<Arc<dyn SelectionStrategy>>,
    default_strategy: Arc<dyn SelectionStrategy>,
}

impl Default for DataPlaneSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl DataPlaneSelector {
    /// Selector with the `random` (default) and `first` strategies.
    pub fn new() -> Self {
        let random: Arc<dyn SelectionStrategy> = Arc::new(RandomSelectionStrategy);
        Self {
            instances: Vec::new(),
            strategies: vec![Arc::clone(&random), Arc::new(FirstSelectionStrategy)],
            default_strategy: random,
        }
    }

    pub fn add_instance(&mut self, instance: DataPlaneInstance) {
        self.instances.push(instance);
    }

    pub fn register_strategy(&mut self, strategy: Arc<dyn SelectionStrategy>) {
        self.strategies.push(strategy);
    }

    /// Make the named strategy the one [`select`](Self::select) uses.
    pub fn set_default_strategy(&mut self, name: &str) -> Result<(), DataPlaneError> {
        self.default_strategy = self.strategy(name)?;
        Ok(())
    }

    pub fn instances(&self) -> &[DataPlaneInstance] {
        &self.instances
    }

    fn strategy(&self, name: &str) -> Result<Arc<dyn SelectionStrategy>, DataPlaneError> {
        self.strategies
            .iter()
            .find(|s| s.name() == name)
            .cloned()
            .ok_or_else(|| DataPlaneError::UnknownStrategy(name.to_string()))
    }

    pub fn can_handle(&self, source: &DataAddress, destination: &DataAddress) -> bool {
        self.instances
            .iter()
            .any(|i| i.can_handle(source, destination))
    }

    pub fn select(
        &self,
        source: &DataAddress,
        destination: &DataAddress,
    ) -> Option<DataPlaneInstance> {
        self.select_with(source, destination, self.default_strategy.as_ref())
    }

    /// Apply `strategy` to the instances qualifying for the address pair only.
    pub fn select_with(
        &self,
        source: &DataAddress,
        destination: &DataAddress,
        strategy: &dyn SelectionStrategy,
    ) -> Option<DataPlaneInstance> {
        let qualifying: Vec<DataPlaneInstance> = self
            .instances
            .iter()
            .filter(|i| i.can_handle(source, destination))
            .cloned()
            .collect();
        strategy.apply(&qualifying)
    }

    pub fn select_by_name(
        &self,
        source: &DataAddress,
        destination: &DataAddress,
        strategy: &str,
    ) -> Result<Option<DataPlaneInstance>, DataPlaneError> {
        let strategy = self.strategy(strategy)?;
        Ok(self.select_with(source, destination, strategy.as_ref()))
    }
}
