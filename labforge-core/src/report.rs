//! Run reports returned by the environment entry points

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::spec::FolderSettings;

/// A node the walker did not provision, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedNode {
    pub path: String,
    pub reason: String,
}

/// Group bindings of a folder; recorded, not enforced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupBinding {
    pub path: String,
    pub group: Option<String>,
    pub master_group: Option<String>,
}

/// Outcome of converting the Master tree to templates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionReport {
    pub converted: Vec<String>,
    /// Already templates before the run
    pub already_templates: Vec<String>,
    pub failed: Vec<String>,
    pub ignored: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Masters,
    Deployment,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Masters => write!(f, "masters"),
            Phase::Deployment => write!(f, "deployment"),
        }
    }
}

/// What a Master or Deployment run provisioned
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    pub phase: Phase,
    pub folders_created: Vec<String>,
    pub vms_cloned: Vec<String>,
    pub networks_created: Vec<String>,
    /// Master paths looked up while deploying
    pub master_lookups: Vec<String>,
    pub skipped: Vec<SkippedNode>,
    pub group_bindings: Vec<GroupBinding>,
    pub conversion: Option<ConversionReport>,
    pub started_at: DateTime<Utc>,
}

impl ProvisionReport {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            folders_created: Vec::new(),
            vms_cloned: Vec::new(),
            networks_created: Vec::new(),
            master_lookups: Vec::new(),
            skipped: Vec::new(),
            group_bindings: Vec::new(),
            conversion: None,
            started_at: Utc::now(),
        }
    }

    pub fn skip(&mut self, path: impl Into<String>, reason: impl Into<String>) {
        self.skipped.push(SkippedNode {
            path: path.into(),
            reason: reason.into(),
        });
    }

    /// Record the group bindings of a folder; `master-group` falls back to
    /// `group`
    pub fn bind(&mut self, path: &str, settings: &FolderSettings) {
        if settings.group.is_none() && settings.master_group.is_none() {
            return;
        }
        self.group_bindings.push(GroupBinding {
            path: path.to_string(),
            group: settings.group.clone(),
            master_group: settings
                .master_group
                .clone()
                .or_else(|| settings.group.clone()),
        });
    }

    pub fn was_skipped(&self, path: &str) -> bool {
        self.skipped.iter().any(|s| s.path == path)
    }
}

impl fmt::Display for ProvisionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} folders, {} VMs, {} networks created, {} skipped",
            self.phase,
            self.folders_created.len(),
            self.vms_cloned.len(),
            self.networks_created.len(),
            self.skipped.len()
        )?;
        if let Some(conversion) = &self.conversion {
            write!(
                f,
                "; {} templates converted, {} failed",
                conversion.converted.len(),
                conversion.failed.len()
            )?;
        }
        Ok(())
    }
}

/// What a cleanup run destroyed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub vms_destroyed: Vec<String>,
    pub folders_destroyed: Vec<String>,
    pub networks_deleted: Vec<String>,
    pub failures: Vec<SkippedNode>,
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cleanup: {} VMs, {} folders, {} networks removed, {} failures",
            self.vms_destroyed.len(),
            self.folders_destroyed.len(),
            self.networks_deleted.len(),
            self.failures.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_group_defaults_to_group() {
        let mut report = ProvisionReport::new(Phase::Masters);
        report.bind(
            "/Team",
            &FolderSettings {
                group: Some("Players".to_string()),
                ..Default::default()
            },
        );
        report.bind("/Other", &FolderSettings::default());

        assert_eq!(report.group_bindings.len(), 1);
        assert_eq!(report.group_bindings[0].master_group.as_deref(), Some("Players"));
    }

    #[test]
    fn test_display() {
        let mut report = ProvisionReport::new(Phase::Deployment);
        report.vms_cloned.push("/T-01/web".to_string());
        report.skip("/T-02", "clone failed");
        assert_eq!(
            report.to_string(),
            "deployment: 0 folders, 1 VMs, 0 networks created, 1 skipped"
        );
        assert!(report.was_skipped("/T-02"));
    }
}
