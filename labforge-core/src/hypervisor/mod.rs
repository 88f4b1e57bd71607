//! Hypervisor driver abstraction
//!
//! The provisioning engine never talks to a hypervisor directly. Every folder,
//! clone, snapshot, NIC and portgroup operation goes through a
//! [`HypervisorDriver`], selected by name from a [`HypervisorRegistry`].
//!
//! ## Contract
//!
//! - All operations are async and may block on remote calls; the engine does
//!   not retry any of them.
//! - NIC indices are 1-based and follow the order returned by
//!   [`HypervisorDriver::list_nics`].
//! - [`HypervisorDriver::create_folder`] returns the existing folder when a
//!   folder of that name is already present under the parent.
//! - Names are unique among the children of one folder.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LabforgeResult;

pub mod inventory;
pub mod mock;
pub mod registry;

pub use inventory::Inventory;
pub use mock::{DriverCall, MockHypervisor};
pub use registry::{HypervisorFactory, HypervisorRegistry, MemoryHypervisorFactory};

/// Identifier of an object in a hypervisor inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderHandle {
    pub id: ObjectId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmHandle {
    pub id: ObjectId,
    pub name: String,
}

/// An object found in a folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventoryItem {
    Folder(FolderHandle),
    Vm(VmHandle),
    /// Anything else the hypervisor keeps in folders (vApps, datastores, ...)
    Other {
        id: ObjectId,
        name: String,
        kind: String,
    },
}

impl InventoryItem {
    pub fn name(&self) -> &str {
        match self {
            InventoryItem::Folder(folder) => &folder.name,
            InventoryItem::Vm(vm) => &vm.name,
            InventoryItem::Other { name, .. } => name,
        }
    }

    pub fn into_folder(self) -> Option<FolderHandle> {
        match self {
            InventoryItem::Folder(folder) => Some(folder),
            _ => None,
        }
    }

    pub fn into_vm(self) -> Option<VmHandle> {
        match self {
            InventoryItem::Vm(vm) => Some(vm),
            _ => None,
        }
    }
}

/// Virtual NIC hardware model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NicModel {
    /// Paravirtual adapter; needs guest tools
    Vmxnet3,
    /// Emulated legacy adapter
    E1000,
}

impl NicModel {
    pub fn for_guest(has_guest_tools: bool) -> Self {
        if has_guest_tools {
            NicModel::Vmxnet3
        } else {
            NicModel::E1000
        }
    }
}

impl fmt::Display for NicModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NicModel::Vmxnet3 => write!(f, "vmxnet3"),
            NicModel::E1000 => write!(f, "e1000"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicInfo {
    /// 1-based slot
    pub index: usize,
    /// Backing network, if connected
    pub network: Option<String>,
    /// Display summary shown by inventory browsers
    pub summary: String,
    pub model: NicModel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
    Suspended,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::On => write!(f, "on"),
            PowerState::Off => write!(f, "off"),
            PowerState::Suspended => write!(f, "suspended"),
        }
    }
}

/// Request to create a host portgroup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortgroupSpec {
    pub name: String,
    pub host: String,
    pub promiscuous: bool,
    pub vlan: u16,
    pub vswitch: String,
}

/// Placement of a clone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneSpec {
    pub datastore: Option<String>,
    pub power_on: bool,
}

/// Operations the provisioning engine needs from a hypervisor
#[async_trait]
pub trait HypervisorDriver: Send + Sync {
    /// Top-level VM folder of the datacenter
    async fn root_folder(&self) -> LabforgeResult<FolderHandle>;

    async fn create_folder(&self, name: &str, parent: &FolderHandle) -> LabforgeResult<FolderHandle>;

    /// Look up a slash-separated path of names below `root`
    async fn find_by_path(
        &self,
        root: &FolderHandle,
        path: &str,
    ) -> LabforgeResult<Option<InventoryItem>>;

    async fn list_children(&self, folder: &FolderHandle) -> LabforgeResult<Vec<InventoryItem>>;

    async fn clone_vm(
        &self,
        source: &VmHandle,
        dest: &FolderHandle,
        name: &str,
        spec: &CloneSpec,
    ) -> LabforgeResult<VmHandle>;

    async fn set_note(&self, vm: &VmHandle, text: &str) -> LabforgeResult<()>;

    async fn create_snapshot(
        &self,
        vm: &VmHandle,
        name: &str,
        description: &str,
    ) -> LabforgeResult<()>;

    async fn is_template(&self, vm: &VmHandle) -> LabforgeResult<bool>;

    async fn convert_to_template(&self, vm: &VmHandle) -> LabforgeResult<()>;

    async fn powered_on(&self, vm: &VmHandle) -> LabforgeResult<bool>;

    async fn set_power_state(
        &self,
        vm: &VmHandle,
        state: PowerState,
        attempt_guest: bool,
    ) -> LabforgeResult<()>;

    async fn list_nics(&self, vm: &VmHandle) -> LabforgeResult<Vec<NicInfo>>;

    async fn add_nic(
        &self,
        vm: &VmHandle,
        network: &str,
        model: NicModel,
        summary: &str,
    ) -> LabforgeResult<()>;

    async fn delete_nic(&self, vm: &VmHandle, index: usize) -> LabforgeResult<()>;

    async fn edit_nic(
        &self,
        vm: &VmHandle,
        index: usize,
        network: &str,
        summary: &str,
    ) -> LabforgeResult<()>;

    async fn has_guest_tools(&self, vm: &VmHandle) -> LabforgeResult<bool>;

    async fn network_exists(&self, name: &str) -> LabforgeResult<bool>;

    async fn list_networks(&self) -> LabforgeResult<Vec<String>>;

    /// VLAN tags of the portgroups already on `host`
    async fn vlans_in_use(&self, host: &str) -> LabforgeResult<Vec<u16>>;

    async fn create_portgroup(&self, spec: &PortgroupSpec) -> LabforgeResult<()>;

    async fn delete_portgroup(&self, name: &str, host: &str) -> LabforgeResult<()>;

    async fn destroy_vm(&self, vm: &VmHandle) -> LabforgeResult<()>;

    /// Destroy an empty folder
    async fn destroy_folder(&self, folder: &FolderHandle) -> LabforgeResult<()>;

    /// Host networks are realized on when none is configured
    async fn default_host(&self) -> LabforgeResult<Option<String>>;
}

/// Render the inventory below `folder` as an indented tree
pub async fn format_tree(
    driver: &dyn HypervisorDriver,
    folder: &FolderHandle,
) -> LabforgeResult<String> {
    let mut out = format!("{}/\n", folder.name);
    render_children(driver, folder.clone(), 1, &mut out).await?;
    Ok(out)
}

fn render_children<'a>(
    driver: &'a dyn HypervisorDriver,
    folder: FolderHandle,
    depth: usize,
    out: &'a mut String,
) -> BoxFuture<'a, LabforgeResult<()>> {
    async move {
        for item in driver.list_children(&folder).await? {
            let indent = "  ".repeat(depth);
            match item {
                InventoryItem::Folder(child) => {
                    out.push_str(&format!("{}{}/\n", indent, child.name));
                    render_children(driver, child, depth + 1, out).await?;
                }
                InventoryItem::Vm(vm) => {
                    let marker = if driver.is_template(&vm).await? {
                        " [template]"
                    } else {
                        ""
                    };
                    out.push_str(&format!("{}{}{}\n", indent, vm.name, marker));
                }
                InventoryItem::Other { name, kind, .. } => {
                    out.push_str(&format!("{}{} ({})\n", indent, name, kind));
                }
            }
        }
        Ok(())
    }
    .boxed()
}
