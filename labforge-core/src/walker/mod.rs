//! Folder tree walker
//!
//! Walks the specification's folder tree in one of two modes:
//!
//! - **Master** ([`FolderTreeWalker::generate_master_tree`]): mirrors every
//!   folder under the Master root with the Master prefix and clones one Master
//!   VM per hypervisor-managed service from its template.
//! - **Deployment** ([`FolderTreeWalker::generate_deploy_tree`]): expands
//!   folder and service instance directives and clones every service instance
//!   from the Master at the mirrored path.
//!
//! Both modes build the Master path the same way, one [`master_path`] step per
//! folder, so a Deployment run finds exactly the Master its base folder was
//! mastered as.
//!
//! Only fatal errors ([`LabforgeError::is_fatal`]) leave the walk. Every other
//! failure is logged, recorded as a skipped node in the report, and the walk
//! continues with the next sibling.

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::EngineConfig;
use crate::error::LabforgeResult;
use crate::groups::GroupRegistry;
use crate::hypervisor::{CloneSpec, FolderHandle, HypervisorDriver};
use crate::instances::InstanceResolver;
use crate::network::NetworkResolver;
use crate::nic::NicReconciler;
use crate::report::{Phase, ProvisionReport};
use crate::spec::{EnvironmentSpec, FolderSettings};

mod deploy;
mod master;

/// Next step of a Master path: `path/<prefix><name>`
pub fn master_path(path: &str, prefix: &str, name: &str) -> String {
    format!("{}/{}{}", path, prefix, name)
}

/// Where the walker currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkPosition {
    /// Hypervisor folder new objects are placed in
    pub folder: FolderHandle,
    /// Display path of `folder`, relative to the walk root
    pub path: String,
    /// Mirrored path of the corresponding Master folder
    pub master_path: String,
}

impl WalkPosition {
    pub fn root(folder: FolderHandle) -> Self {
        Self {
            folder,
            path: String::new(),
            master_path: String::new(),
        }
    }
}

pub struct FolderTreeWalker {
    spec: Arc<EnvironmentSpec>,
    engine: EngineConfig,
    driver: Arc<dyn HypervisorDriver>,
    groups: Arc<GroupRegistry>,
    instances: InstanceResolver,
    nics: NicReconciler,
    clone_spec: CloneSpec,
}

impl FolderTreeWalker {
    pub fn new(
        spec: Arc<EnvironmentSpec>,
        engine: EngineConfig,
        driver: Arc<dyn HypervisorDriver>,
        groups: Arc<GroupRegistry>,
        networks: Arc<NetworkResolver>,
        clone_spec: CloneSpec,
    ) -> Self {
        Self {
            instances: InstanceResolver::new(engine.thresholds.clone(), groups.clone()),
            nics: NicReconciler::new(driver.clone(), networks),
            spec,
            engine,
            driver,
            groups,
            clone_spec,
        }
    }

    fn master_path(&self, path: &str, name: &str) -> String {
        master_path(path, &self.engine.master_prefix, name)
    }

    fn master_name(&self, name: &str) -> String {
        format!("{}{}", self.engine.master_prefix, name)
    }

    /// Record the group bindings of a folder. The group that applies to the
    /// current phase is looked up in the registry; `master-group` falls back
    /// to `group` while mastering.
    fn bind_groups(&self, path: &str, settings: &FolderSettings, report: &mut ProvisionReport) {
        let name = match report.phase {
            Phase::Masters => settings.master_group.as_deref().or(settings.group.as_deref()),
            Phase::Deployment => settings.group.as_deref(),
        };
        if let Some(name) = name {
            match self.groups.get(name) {
                Some(group) => debug!("Folder '{}' is bound to group '{}'", path, group.name),
                None => warn!("Folder '{}' is bound to unknown group '{}'", path, name),
            }
        }
        report.bind(path, settings);
    }
}

/// Turn a soft failure into a skipped node; fatal errors pass through
fn soft<T>(
    result: LabforgeResult<T>,
    path: &str,
    report: &mut ProvisionReport,
) -> LabforgeResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            error!("Skipping '{}': {}", path, e);
            report.skip(path, e.to_string());
            Ok(None)
        }
    }
}
