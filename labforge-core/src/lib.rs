pub mod cleanup;
pub mod config;
pub mod environment;
pub mod error;
pub mod groups;
pub mod hypervisor;
pub mod instances;
pub mod network;
pub mod nic;
pub mod report;
pub mod spec;
pub mod template;
pub mod walker;

// Test helpers are exposed for integration tests
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::LabforgeConfig;
pub use environment::Environment;
pub use error::{LabforgeError, LabforgeResult};
pub use hypervisor::{HypervisorDriver, HypervisorFactory, HypervisorRegistry};
pub use report::{CleanupReport, ProvisionReport};
pub use spec::EnvironmentSpec;
