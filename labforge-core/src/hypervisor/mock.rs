//! In-memory hypervisor driver
//!
//! Backs the `"memory"` backend and the engine's tests. Every mutating call is
//! recorded as a [`DriverCall`] so tests can assert on exactly what the engine
//! asked the hypervisor to do. Failures can be injected per operation and
//! object name.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;

use super::inventory::{Inventory, VmRecord};
use super::{
    CloneSpec, FolderHandle, HypervisorDriver, InventoryItem, NicInfo, NicModel, PortgroupSpec,
    PowerState, VmHandle,
};
use crate::error::{LabforgeError, LabforgeResult};

/// A mutating driver call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    CreateFolder { name: String, parent: String },
    CloneVm { source: String, folder: String, name: String },
    SetNote { vm: String },
    CreateSnapshot { vm: String, name: String },
    ConvertToTemplate { vm: String },
    SetPowerState { vm: String, state: PowerState },
    AddNic { vm: String, network: String, model: NicModel },
    DeleteNic { vm: String, index: usize },
    EditNic { vm: String, index: usize, network: String },
    CreatePortgroup { name: String, vlan: u16, vswitch: String },
    DeletePortgroup { name: String },
    DestroyVm { vm: String },
    DestroyFolder { name: String },
}

impl DriverCall {
    pub fn is_nic_change(&self) -> bool {
        matches!(
            self,
            DriverCall::AddNic { .. } | DriverCall::DeleteNic { .. } | DriverCall::EditNic { .. }
        )
    }

    /// Name of the object the call acts on
    pub fn target(&self) -> &str {
        match self {
            DriverCall::CreateFolder { name, .. }
            | DriverCall::CloneVm { name, .. }
            | DriverCall::CreatePortgroup { name, .. }
            | DriverCall::DeletePortgroup { name }
            | DriverCall::DestroyFolder { name } => name,
            DriverCall::SetNote { vm }
            | DriverCall::CreateSnapshot { vm, .. }
            | DriverCall::ConvertToTemplate { vm }
            | DriverCall::SetPowerState { vm, .. }
            | DriverCall::AddNic { vm, .. }
            | DriverCall::DeleteNic { vm, .. }
            | DriverCall::EditNic { vm, .. }
            | DriverCall::DestroyVm { vm } => vm,
        }
    }
}

#[derive(Debug, Default)]
pub struct MockHypervisor {
    inventory: Mutex<Inventory>,
    calls: Mutex<Vec<DriverCall>>,
    /// (operation, object name) pairs that fail
    failures: Mutex<HashSet<(String, String)>>,
    /// VMs whose template conversion silently does nothing
    stuck_conversions: Mutex<HashSet<String>>,
}

impl MockHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inventory(inventory: Inventory) -> Self {
        Self {
            inventory: Mutex::new(inventory),
            ..Self::default()
        }
    }

    /// Snapshot of the current inventory
    pub fn inventory(&self) -> Inventory {
        self.inventory.lock().clone()
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Make `operation` (a driver method name) fail for the object `name`
    pub fn fail_on(&self, operation: &str, name: &str) {
        self.failures
            .lock()
            .insert((operation.to_string(), name.to_string()));
    }

    /// Accept template conversion of `vm` without converting it
    pub fn stall_conversion(&self, vm: &str) {
        self.stuck_conversions.lock().insert(vm.to_string());
    }

    /// Place a template at `folder_path`, creating the folders on the way
    pub fn add_template(
        &self,
        folder_path: &str,
        name: &str,
        guest_tools: bool,
        networks: &[&str],
    ) -> LabforgeResult<VmHandle> {
        self.inventory
            .lock()
            .add_vm(folder_path, name, VmRecord::template(guest_tools, networks))
    }

    pub fn add_other(&self, folder_path: &str, name: &str, kind: &str) -> LabforgeResult<()> {
        self.inventory.lock().add_other(folder_path, name, kind)
    }

    pub fn add_portgroup(&self, name: &str, vlan: u16, vswitch: &str) -> LabforgeResult<()> {
        self.inventory.lock().add_portgroup(name, vlan, vswitch)
    }

    pub fn ensure_folder_path(&self, path: &str) -> LabforgeResult<FolderHandle> {
        self.inventory.lock().ensure_folder_path(path)
    }

    fn check(&self, operation: &str, name: &str) -> LabforgeResult<()> {
        if self
            .failures
            .lock()
            .contains(&(operation.to_string(), name.to_string()))
        {
            return Err(LabforgeError::vm_operation(
                operation,
                format!("injected failure for '{}'", name),
            ));
        }
        Ok(())
    }

    fn record(&self, call: DriverCall) {
        tracing::debug!("Mock: {:?}", call);
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl HypervisorDriver for MockHypervisor {
    async fn root_folder(&self) -> LabforgeResult<FolderHandle> {
        Ok(self.inventory.lock().root())
    }

    async fn create_folder(&self, name: &str, parent: &FolderHandle) -> LabforgeResult<FolderHandle> {
        self.check("create_folder", name)?;
        let folder = self.inventory.lock().create_folder(name, parent)?;
        self.record(DriverCall::CreateFolder {
            name: name.to_string(),
            parent: parent.name.clone(),
        });
        Ok(folder)
    }

    async fn find_by_path(
        &self,
        root: &FolderHandle,
        path: &str,
    ) -> LabforgeResult<Option<InventoryItem>> {
        self.inventory.lock().find_by_path(root, path)
    }

    async fn list_children(&self, folder: &FolderHandle) -> LabforgeResult<Vec<InventoryItem>> {
        self.inventory.lock().list_children(folder)
    }

    async fn clone_vm(
        &self,
        source: &VmHandle,
        dest: &FolderHandle,
        name: &str,
        spec: &CloneSpec,
    ) -> LabforgeResult<VmHandle> {
        self.check("clone_vm", name)?;
        let vm = self.inventory.lock().clone_vm(source, dest, name, spec)?;
        self.record(DriverCall::CloneVm {
            source: source.name.clone(),
            folder: dest.name.clone(),
            name: name.to_string(),
        });
        Ok(vm)
    }

    async fn set_note(&self, vm: &VmHandle, text: &str) -> LabforgeResult<()> {
        self.inventory.lock().set_note(vm, text)?;
        self.record(DriverCall::SetNote { vm: vm.name.clone() });
        Ok(())
    }

    async fn create_snapshot(
        &self,
        vm: &VmHandle,
        name: &str,
        description: &str,
    ) -> LabforgeResult<()> {
        self.check("create_snapshot", &vm.name)?;
        self.inventory.lock().create_snapshot(vm, name, description)?;
        self.record(DriverCall::CreateSnapshot {
            vm: vm.name.clone(),
            name: name.to_string(),
        });
        Ok(())
    }

    async fn is_template(&self, vm: &VmHandle) -> LabforgeResult<bool> {
        self.inventory.lock().is_template(vm)
    }

    async fn convert_to_template(&self, vm: &VmHandle) -> LabforgeResult<()> {
        self.check("convert_to_template", &vm.name)?;
        if !self.stuck_conversions.lock().contains(&vm.name) {
            self.inventory.lock().convert_to_template(vm)?;
        }
        self.record(DriverCall::ConvertToTemplate { vm: vm.name.clone() });
        Ok(())
    }

    async fn powered_on(&self, vm: &VmHandle) -> LabforgeResult<bool> {
        self.inventory.lock().powered_on(vm)
    }

    async fn set_power_state(
        &self,
        vm: &VmHandle,
        state: PowerState,
        _attempt_guest: bool,
    ) -> LabforgeResult<()> {
        self.check("set_power_state", &vm.name)?;
        self.inventory.lock().set_power_state(vm, state)?;
        self.record(DriverCall::SetPowerState {
            vm: vm.name.clone(),
            state,
        });
        Ok(())
    }

    async fn list_nics(&self, vm: &VmHandle) -> LabforgeResult<Vec<NicInfo>> {
        self.inventory.lock().list_nics(vm)
    }

    async fn add_nic(
        &self,
        vm: &VmHandle,
        network: &str,
        model: NicModel,
        summary: &str,
    ) -> LabforgeResult<()> {
        self.check("add_nic", &vm.name)?;
        self.inventory.lock().add_nic(vm, network, model, summary)?;
        self.record(DriverCall::AddNic {
            vm: vm.name.clone(),
            network: network.to_string(),
            model,
        });
        Ok(())
    }

    async fn delete_nic(&self, vm: &VmHandle, index: usize) -> LabforgeResult<()> {
        self.check("delete_nic", &vm.name)?;
        self.inventory.lock().delete_nic(vm, index)?;
        self.record(DriverCall::DeleteNic {
            vm: vm.name.clone(),
            index,
        });
        Ok(())
    }

    async fn edit_nic(
        &self,
        vm: &VmHandle,
        index: usize,
        network: &str,
        summary: &str,
    ) -> LabforgeResult<()> {
        self.check("edit_nic", &vm.name)?;
        self.inventory.lock().edit_nic(vm, index, network, summary)?;
        self.record(DriverCall::EditNic {
            vm: vm.name.clone(),
            index,
            network: network.to_string(),
        });
        Ok(())
    }

    async fn has_guest_tools(&self, vm: &VmHandle) -> LabforgeResult<bool> {
        self.inventory.lock().has_guest_tools(vm)
    }

    async fn network_exists(&self, name: &str) -> LabforgeResult<bool> {
        Ok(self.inventory.lock().network_exists(name))
    }

    async fn list_networks(&self) -> LabforgeResult<Vec<String>> {
        Ok(self.inventory.lock().list_networks())
    }

    async fn vlans_in_use(&self, host: &str) -> LabforgeResult<Vec<u16>> {
        Ok(self.inventory.lock().vlans_in_use(host))
    }

    async fn create_portgroup(&self, spec: &PortgroupSpec) -> LabforgeResult<()> {
        self.check("create_portgroup", &spec.name)?;
        self.inventory.lock().create_portgroup(spec)?;
        self.record(DriverCall::CreatePortgroup {
            name: spec.name.clone(),
            vlan: spec.vlan,
            vswitch: spec.vswitch.clone(),
        });
        Ok(())
    }

    async fn delete_portgroup(&self, name: &str, host: &str) -> LabforgeResult<()> {
        self.inventory.lock().delete_portgroup(name, host)?;
        self.record(DriverCall::DeletePortgroup {
            name: name.to_string(),
        });
        Ok(())
    }

    async fn destroy_vm(&self, vm: &VmHandle) -> LabforgeResult<()> {
        self.check("destroy_vm", &vm.name)?;
        self.inventory.lock().destroy_vm(vm)?;
        self.record(DriverCall::DestroyVm { vm: vm.name.clone() });
        Ok(())
    }

    async fn destroy_folder(&self, folder: &FolderHandle) -> LabforgeResult<()> {
        self.inventory.lock().destroy_folder(folder)?;
        self.record(DriverCall::DestroyFolder {
            name: folder.name.clone(),
        });
        Ok(())
    }

    async fn default_host(&self) -> LabforgeResult<Option<String>> {
        Ok(self.inventory.lock().default_host())
    }
}
