//! Driver selection by backend name

use std::collections::HashMap;
use std::sync::Arc;

use super::inventory::Inventory;
use super::mock::MockHypervisor;
use super::HypervisorDriver;
use crate::config::InfrastructureConfig;
use crate::error::{LabforgeError, LabforgeResult};

/// Builds drivers of one backend type
pub trait HypervisorFactory: Send + Sync {
    fn create_driver(&self, config: &InfrastructureConfig)
        -> LabforgeResult<Arc<dyn HypervisorDriver>>;

    /// Registry key, matched against `infrastructure.backend`
    fn backend_type(&self) -> &'static str;

    fn description(&self) -> &'static str;
}

#[derive(Clone)]
pub struct HypervisorRegistry {
    factories: HashMap<String, Arc<dyn HypervisorFactory>>,
}

impl HypervisorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, factory: Arc<dyn HypervisorFactory>) {
        let backend_type = factory.backend_type().to_string();
        tracing::debug!(
            "Registering hypervisor backend: {} ({})",
            backend_type,
            factory.description()
        );
        self.factories.insert(backend_type, factory);
    }

    /// Build the driver named by `config.backend`
    pub fn create_driver(
        &self,
        config: &InfrastructureConfig,
    ) -> LabforgeResult<Arc<dyn HypervisorDriver>> {
        let factory = self.factories.get(&config.backend).ok_or_else(|| {
            LabforgeError::configuration(
                "infrastructure.backend",
                format!(
                    "Unknown hypervisor backend '{}'. Available backends: {:?}",
                    config.backend,
                    self.list_available_backends()
                ),
            )
        })?;

        factory.create_driver(config)
    }

    /// Registered backend names, sorted
    pub fn list_available_backends(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for HypervisorRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MemoryHypervisorFactory));
        registry
    }
}

/// Factory for the in-memory driver
pub struct MemoryHypervisorFactory;

impl HypervisorFactory for MemoryHypervisorFactory {
    fn create_driver(
        &self,
        config: &InfrastructureConfig,
    ) -> LabforgeResult<Arc<dyn HypervisorDriver>> {
        let inventory = if config.hosts.is_empty() {
            Inventory::default()
        } else {
            Inventory::new(config.hosts.clone())
        };
        Ok(Arc::new(MockHypervisor::with_inventory(inventory)))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }

    fn description(&self) -> &'static str {
        "In-memory hypervisor that forgets everything on exit"
    }
}
