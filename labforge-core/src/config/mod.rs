//! Configuration for Labforge
//!
//! Configuration is read from a TOML file, optionally overridden by
//! `LABFORGE_*` environment variables, and validated before use. Every
//! section has defaults, so an empty file is a valid configuration.

use crate::error::{LabforgeError, LabforgeResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

pub mod defaults;
pub mod engine;
pub mod infrastructure;

pub use defaults::*;
pub use engine::{EngineConfig, ObjectKind, SnapshotNames, Threshold, Thresholds, VlanRange};
pub use infrastructure::InfrastructureConfig;

/// Root configuration structure for Labforge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabforgeConfig {
    /// Walker, naming and threshold settings
    pub engine: EngineConfig,

    /// Hypervisor connection and placement settings
    pub infrastructure: InfrastructureConfig,
}

impl LabforgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> LabforgeResult<Self> {
        let config: LabforgeConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file and apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> LabforgeResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LabforgeError::configuration(
                "config",
                format!("Could not read configuration file '{}': {}", path.display(), e),
            )
        })?;
        let mut config: LabforgeConfig = toml::from_str(&contents)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration purely from defaults and environment variables
    pub fn from_env() -> LabforgeResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> LabforgeResult<()> {
        self.engine.apply_env()?;
        self.infrastructure.apply_env()?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> LabforgeResult<()> {
        self.engine.validate()?;
        self.infrastructure.validate()?;
        Ok(())
    }

    /// Create a test configuration backed by the in-memory driver
    pub fn test() -> Self {
        let mut config = Self::default();
        config.infrastructure.backend = "memory".to_string();
        config.infrastructure.datastore = Some("datastore1".to_string());
        config
    }
}

/// Parse an optional environment variable into `T`
pub(crate) fn parse_from_env<T: FromStr>(key: &str) -> LabforgeResult<Option<T>> {
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map(Some)
            .map_err(|_| LabforgeError::configuration("environment", format!("Invalid {}", key))),
        Err(_) => Ok(None),
    }
}
