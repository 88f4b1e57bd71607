pub mod seed;
pub mod simulated;

pub use seed::{SeedNetwork, SeedTemplate, SiteSeed};
pub use simulated::{SimulatedHypervisor, SimulatedHypervisorFactory};

// Re-export core types for convenience
pub use labforge_core::{
    error::{LabforgeError, LabforgeResult},
    hypervisor::{HypervisorDriver, HypervisorRegistry},
};

use std::sync::Arc;

/// The default registry plus the `"simulated"` backend
pub fn registry() -> HypervisorRegistry {
    let mut registry = HypervisorRegistry::default();
    registry.register(Arc::new(SimulatedHypervisorFactory));
    registry
}
