//! Conversion of Master VMs into templates
//!
//! Runs over the whole Master tree before a deployment. Each Master VM is
//! powered off (gracefully when the guest allows), given the start-of-exercise
//! snapshot, converted, and checked. VMs that already are templates are left
//! alone, so repeated deployments do not snapshot them again.

use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::SnapshotNames;
use crate::error::{LabforgeError, LabforgeResult};
use crate::hypervisor::{FolderHandle, HypervisorDriver, InventoryItem, PowerState, VmHandle};
use crate::report::ConversionReport;

/// Result of converting one VM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionOutcome {
    Converted,
    AlreadyTemplate,
}

pub struct TemplateConverter {
    driver: Arc<dyn HypervisorDriver>,
    snapshots: SnapshotNames,
}

impl TemplateConverter {
    pub fn new(driver: Arc<dyn HypervisorDriver>, snapshots: SnapshotNames) -> Self {
        Self { driver, snapshots }
    }

    /// Convert every VM below `folder`. Failures are recorded, never returned.
    pub async fn convert_tree(&self, folder: &FolderHandle) -> ConversionReport {
        let mut report = ConversionReport::default();
        self.convert_folder(folder.clone(), String::new(), &mut report)
            .await;
        info!(
            "Converted {} Masters to templates ({} already converted, {} failed)",
            report.converted.len(),
            report.already_templates.len(),
            report.failed.len()
        );
        report
    }

    fn convert_folder<'a>(
        &'a self,
        folder: FolderHandle,
        path: String,
        report: &'a mut ConversionReport,
    ) -> BoxFuture<'a, ()> {
        async move {
            let children = match self.driver.list_children(&folder).await {
                Ok(children) => children,
                Err(e) => {
                    error!("Could not list folder '{}': {}", folder.name, e);
                    report.failed.push(path);
                    return;
                }
            };

            for item in children {
                let item_path = format!("{}/{}", path, item.name());
                match item {
                    InventoryItem::Folder(child) => {
                        self.convert_folder(child, item_path, report).await;
                    }
                    InventoryItem::Vm(vm) => match self.convert_vm(&vm).await {
                        Ok(ConversionOutcome::Converted) => report.converted.push(item_path),
                        Ok(ConversionOutcome::AlreadyTemplate) => {
                            report.already_templates.push(item_path)
                        }
                        Err(e) => {
                            error!("Could not convert Master '{}': {}", vm.name, e);
                            report.failed.push(item_path);
                        }
                    },
                    InventoryItem::Other { name, kind, .. } => {
                        warn!("Ignoring unknown object '{}' of type '{}' in the Master tree", name, kind);
                        report.ignored.push(item_path);
                    }
                }
            }
        }
        .boxed()
    }

    /// Take one VM to the template state
    pub async fn convert_vm(&self, vm: &VmHandle) -> LabforgeResult<ConversionOutcome> {
        if self.driver.is_template(vm).await? {
            debug!("'{}' is already a template", vm.name);
            return Ok(ConversionOutcome::AlreadyTemplate);
        }

        if self.driver.powered_on(vm).await? {
            self.driver.set_power_state(vm, PowerState::Off, true).await?;
        }
        self.driver
            .create_snapshot(vm, &self.snapshots.exercise, &self.snapshots.exercise_description)
            .await?;
        self.driver.convert_to_template(vm).await?;

        if !self.driver.is_template(vm).await? {
            return Err(LabforgeError::VerificationFailed {
                vm: vm.name.clone(),
            });
        }
        debug!("Converted '{}' to a template", vm.name);
        Ok(ConversionOutcome::Converted)
    }
}
