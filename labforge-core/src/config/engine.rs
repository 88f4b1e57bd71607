//! Provisioning engine configuration

use super::defaults::*;
use super::parse_from_env;
use crate::error::{LabforgeError, LabforgeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Kind of object an instance directive is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Folder,
    Service,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Folder => write!(f, "folder"),
            ObjectKind::Service => write!(f, "service"),
        }
    }
}

/// Warn/error instance-count limits for one object kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    pub warn: u64,
    pub error: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub folder: Threshold,
    pub service: Threshold,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            folder: Threshold {
                warn: DEFAULT_FOLDER_WARN_THRESHOLD,
                error: DEFAULT_FOLDER_ERROR_THRESHOLD,
            },
            service: Threshold {
                warn: DEFAULT_SERVICE_WARN_THRESHOLD,
                error: DEFAULT_SERVICE_ERROR_THRESHOLD,
            },
        }
    }
}

impl Thresholds {
    pub fn for_kind(&self, kind: ObjectKind) -> Threshold {
        match kind {
            ObjectKind::Folder => self.folder,
            ObjectKind::Service => self.service,
        }
    }
}

/// Inclusive range of VLAN tags handed out to auto-created networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VlanRange {
    pub start: u16,
    pub end: u16,
}

impl Default for VlanRange {
    fn default() -> Self {
        Self {
            start: DEFAULT_VLAN_START,
            end: DEFAULT_VLAN_END,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotNames {
    pub mastering: String,
    pub mastering_description: String,
    pub exercise: String,
    pub exercise_description: String,
}

impl Default for SnapshotNames {
    fn default() -> Self {
        Self {
            mastering: DEFAULT_MASTERING_SNAPSHOT.to_string(),
            mastering_description: DEFAULT_MASTERING_SNAPSHOT_DESCRIPTION.to_string(),
            exercise: DEFAULT_EXERCISE_SNAPSHOT.to_string(),
            exercise_description: DEFAULT_EXERCISE_SNAPSHOT_DESCRIPTION.to_string(),
        }
    }
}

/// Settings the folder walker is constructed with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix applied to every Master folder and Master VM
    pub master_prefix: String,

    /// Name of the folder holding the Master tree under the environment root
    pub master_root_name: String,

    /// Separator between a generic network name and its instance number
    pub generic_infix: String,

    /// Zero-padding width for instance numbers
    pub instance_padding: usize,

    pub thresholds: Thresholds,

    pub vlans: VlanRange,

    pub snapshots: SnapshotNames,

    /// Deadline for a whole run, enforced by the caller
    #[serde(with = "humantime_serde")]
    pub run_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            master_prefix: DEFAULT_MASTER_PREFIX.to_string(),
            master_root_name: DEFAULT_MASTER_ROOT_NAME.to_string(),
            generic_infix: DEFAULT_GENERIC_INFIX.to_string(),
            instance_padding: DEFAULT_INSTANCE_PADDING,
            thresholds: Thresholds::default(),
            vlans: VlanRange::default(),
            snapshots: SnapshotNames::default(),
            run_timeout: None,
        }
    }
}

impl EngineConfig {
    /// Apply `LABFORGE_ENGINE_*` overrides on top of this configuration
    pub fn apply_env(&mut self) -> LabforgeResult<()> {
        if let Ok(val) = std::env::var("LABFORGE_ENGINE_MASTER_PREFIX") {
            self.master_prefix = val;
        }
        if let Ok(val) = std::env::var("LABFORGE_ENGINE_MASTER_ROOT_NAME") {
            self.master_root_name = val;
        }
        if let Some(val) = parse_from_env("LABFORGE_ENGINE_FOLDER_WARN")? {
            self.thresholds.folder.warn = val;
        }
        if let Some(val) = parse_from_env("LABFORGE_ENGINE_FOLDER_ERROR")? {
            self.thresholds.folder.error = val;
        }
        if let Some(val) = parse_from_env("LABFORGE_ENGINE_SERVICE_WARN")? {
            self.thresholds.service.warn = val;
        }
        if let Some(val) = parse_from_env("LABFORGE_ENGINE_SERVICE_ERROR")? {
            self.thresholds.service.error = val;
        }
        if let Ok(val) = std::env::var("LABFORGE_ENGINE_RUN_TIMEOUT") {
            let timeout = humantime_serde::re::humantime::parse_duration(&val).map_err(|e| {
                LabforgeError::configuration(
                    "engine.run_timeout",
                    format!("Invalid LABFORGE_ENGINE_RUN_TIMEOUT '{}': {}", val, e),
                )
            })?;
            self.run_timeout = Some(timeout);
        }
        Ok(())
    }

    /// Validate engine configuration
    pub fn validate(&self) -> LabforgeResult<()> {
        if self.master_prefix.is_empty() || self.master_prefix.contains('/') {
            return Err(LabforgeError::configuration(
                "engine.master_prefix",
                "must be non-empty and may not contain '/'",
            ));
        }

        if self.master_root_name.is_empty() || self.master_root_name.contains('/') {
            return Err(LabforgeError::configuration(
                "engine.master_root_name",
                "must be a non-empty folder name without '/'",
            ));
        }

        if self.generic_infix.is_empty() {
            return Err(LabforgeError::configuration(
                "engine.generic_infix",
                "must not be empty",
            ));
        }

        for (kind, threshold) in [
            (ObjectKind::Folder, self.thresholds.folder),
            (ObjectKind::Service, self.thresholds.service),
        ] {
            if threshold.warn >= threshold.error {
                return Err(LabforgeError::configuration(
                    format!("engine.thresholds.{}", kind),
                    format!(
                        "warn threshold {} must be below error threshold {}",
                        threshold.warn, threshold.error
                    ),
                ));
            }
        }

        if self.vlans.start == 0 || self.vlans.end > MAX_VLAN_TAG || self.vlans.start > self.vlans.end
        {
            return Err(LabforgeError::configuration(
                "engine.vlans",
                format!(
                    "invalid VLAN range {}..={} (must lie within 1..={})",
                    self.vlans.start, self.vlans.end, MAX_VLAN_TAG
                ),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_engine_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.thresholds.for_kind(ObjectKind::Folder).warn, 25);
        assert_eq!(config.thresholds.for_kind(ObjectKind::Service).error, 70);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = EngineConfig::default();
        config.thresholds.service = Threshold { warn: 80, error: 70 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_master_prefix_with_slash_rejected() {
        let mut config = EngineConfig::default();
        config.master_prefix = "MASTER/".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("engine.master_prefix"));
    }

    #[test]
    fn test_invalid_vlan_range_rejected() {
        let mut config = EngineConfig::default();
        config.vlans = VlanRange {
            start: 3000,
            end: 2000,
        };
        assert!(config.validate().is_err());

        config.vlans = VlanRange {
            start: 2000,
            end: 5000,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_run_timeout_parses_humantime() {
        let config: EngineConfig = toml::from_str("run_timeout = \"2h 30m\"").unwrap();
        assert_eq!(config.run_timeout, Some(Duration::from_secs(9000)));
        assert_eq!(config.master_prefix, DEFAULT_MASTER_PREFIX);
    }
}
