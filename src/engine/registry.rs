//! Driver Registry
//!
//! Maps engine names (and their aliases) to driver implementations.

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::DataEngine;
use crate::engine::types::DriverInfo;

/// Registry that holds all available database drivers
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn DataEngine>>,
    aliases: HashMap<String, String>,
}

impl DriverRegistry {
    /// Creates a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Registers a new driver
    ///
    /// The driver's `driver_id()` is used as the key; each of its aliases
    /// resolves to the same driver.
    pub fn register(&mut self, driver: Arc<dyn DataEngine>) {
        let id = driver.driver_id().to_string();
        for alias in driver.aliases() {
            self.aliases.insert(alias.to_ascii_lowercase(), id.clone());
        }
        self.drivers.insert(id, driver);
    }

    /// Gets a driver by id or alias, ignoring case
    pub fn get(&self, engine: &str) -> Option<Arc<dyn DataEngine>> {
        let key = engine.trim().to_ascii_lowercase();
        let id = self.aliases.get(&key).unwrap_or(&key);
        self.drivers.get(id).cloned()
    }

    /// Like [`get`](Self::get), failing with `UnsupportedEngine`
    pub fn resolve(&self, engine: &str) -> EngineResult<Arc<dyn DataEngine>> {
        self.get(engine)
            .ok_or_else(|| EngineError::unsupported_engine(engine))
    }

    /// Lists all registered driver IDs
    pub fn list(&self) -> Vec<&str> {
        self.drivers.keys().map(|s| s.as_str()).collect()
    }

    /// Lists all registered drivers with their metadata.
    pub fn list_infos(&self) -> Vec<DriverInfo> {
        let mut infos: Vec<DriverInfo> = self
            .drivers
            .values()
            .map(|driver| DriverInfo {
                id: driver.driver_id().to_string(),
                name: driver.driver_name().to_string(),
                aliases: driver.aliases().iter().map(|a| a.to_string()).collect(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Returns the number of registered drivers
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Returns true if no drivers are registered
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
