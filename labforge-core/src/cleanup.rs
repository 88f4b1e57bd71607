//! Teardown of Master and Deployment trees

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, error, info, warn};

use crate::error::LabforgeResult;
use crate::hypervisor::{FolderHandle, HypervisorDriver, InventoryItem, PowerState, VmHandle};
use crate::report::{CleanupReport, SkippedNode};

/// Which VMs a teardown destroys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmFilter<'a> {
    All,
    /// Only VMs whose name starts with the prefix
    Prefixed(&'a str),
}

impl VmFilter<'_> {
    fn matches(&self, name: &str) -> bool {
        match self {
            VmFilter::All => true,
            VmFilter::Prefixed(prefix) => name.starts_with(prefix),
        }
    }
}

/// Destroys matching VMs below a folder, then every folder left empty
pub struct TreeCleaner<'a> {
    driver: &'a dyn HypervisorDriver,
    filter: VmFilter<'a>,
    /// Name of a direct child of the starting folder to leave alone
    keep: Option<&'a str>,
}

impl<'a> TreeCleaner<'a> {
    pub fn new(driver: &'a dyn HypervisorDriver, filter: VmFilter<'a>) -> Self {
        Self {
            driver,
            filter,
            keep: None,
        }
    }

    pub fn keeping(mut self, name: &'a str) -> Self {
        self.keep = Some(name);
        self
    }

    /// Clean below `folder`; `folder` itself is kept
    pub async fn clean(&self, folder: &FolderHandle, report: &mut CleanupReport) {
        self.clean_folder(folder.clone(), String::new(), true, report)
            .await;
    }

    fn clean_folder<'b>(
        &'b self,
        folder: FolderHandle,
        path: String,
        top: bool,
        report: &'b mut CleanupReport,
    ) -> BoxFuture<'b, ()> {
        async move {
            let children = match self.driver.list_children(&folder).await {
                Ok(children) => children,
                Err(e) => {
                    fail(report, &path, e.to_string());
                    return;
                }
            };

            for item in children {
                let item_path = format!("{}/{}", path, item.name());
                match item {
                    InventoryItem::Folder(child) => {
                        if top && self.keep == Some(child.name.as_str()) {
                            debug!("Leaving '{}' in place", item_path);
                            continue;
                        }
                        self.clean_folder(child.clone(), item_path.clone(), false, report)
                            .await;
                        self.destroy_if_empty(&child, &item_path, report).await;
                    }
                    InventoryItem::Vm(vm) if self.filter.matches(&vm.name) => {
                        match self.destroy_vm(&vm).await {
                            Ok(()) => report.vms_destroyed.push(item_path),
                            Err(e) => fail(report, &item_path, e.to_string()),
                        }
                    }
                    InventoryItem::Vm(_) => {}
                    InventoryItem::Other { name, kind, .. } => {
                        warn!("Leaving unknown object '{}' of type '{}'", name, kind);
                    }
                }
            }
        }
        .boxed()
    }

    async fn destroy_vm(&self, vm: &VmHandle) -> LabforgeResult<()> {
        if self.driver.powered_on(vm).await? {
            self.driver.set_power_state(vm, PowerState::Off, false).await?;
        }
        self.driver.destroy_vm(vm).await?;
        debug!("Destroyed VM '{}'", vm.name);
        Ok(())
    }

    /// Destroy `folder` when nothing is left in it
    pub async fn destroy_if_empty(
        &self,
        folder: &FolderHandle,
        path: &str,
        report: &mut CleanupReport,
    ) {
        match self.driver.list_children(folder).await {
            Ok(children) if children.is_empty() => match self.driver.destroy_folder(folder).await {
                Ok(()) => report.folders_destroyed.push(path.to_string()),
                Err(e) => fail(report, path, e.to_string()),
            },
            Ok(_) => debug!("Folder '{}' is not empty, keeping it", path),
            Err(e) => fail(report, path, e.to_string()),
        }
    }
}

/// Delete the named portgroups from `host` where they exist
pub async fn delete_networks<I, S>(
    driver: &dyn HypervisorDriver,
    names: I,
    host: &str,
    report: &mut CleanupReport,
) where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for name in names {
        let name = name.as_ref();
        match driver.network_exists(name).await {
            Ok(true) => match driver.delete_portgroup(name, host).await {
                Ok(()) => {
                    info!("Deleted network '{}'", name);
                    report.networks_deleted.push(name.to_string());
                }
                Err(e) => fail(report, name, e.to_string()),
            },
            Ok(false) => debug!("Network '{}' does not exist", name),
            Err(e) => fail(report, name, e.to_string()),
        }
    }
}

fn fail(report: &mut CleanupReport, path: &str, reason: String) {
    error!("Could not clean up '{}': {}", path, reason);
    report.failures.push(SkippedNode {
        path: path.to_string(),
        reason,
    });
}
