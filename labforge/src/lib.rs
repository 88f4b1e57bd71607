pub mod orchestrator;

pub use orchestrator::{LabOrchestrator, Operation, RunOutcome};

// Re-export commonly used types
pub use labforge_core::{
    config::LabforgeConfig,
    error::{LabforgeError, LabforgeResult},
    spec::EnvironmentSpec,
};
