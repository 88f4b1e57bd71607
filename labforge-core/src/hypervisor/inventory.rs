//! Serializable hypervisor inventory
//!
//! A small object model of a datacenter: a folder tree holding VMs, plus the
//! host portgroups VMs attach to. The in-memory driver keeps one of these in
//! memory; the simulated driver persists it between runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    CloneSpec, FolderHandle, InventoryItem, NicInfo, NicModel, ObjectId, PortgroupSpec,
    PowerState, VmHandle,
};
use crate::error::{LabforgeError, LabforgeResult};

const ROOT_FOLDER_NAME: &str = "vm";
const DEFAULT_HOST_NAME: &str = "esxi-01";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    pub power: PowerState,
    pub template: bool,
    pub guest_tools: bool,
    #[serde(default)]
    pub nics: Vec<NicInfo>,
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
    #[serde(default)]
    pub note: Option<String>,
}

impl VmRecord {
    /// A template whose NICs are attached to `networks`, in order
    pub fn template(guest_tools: bool, networks: &[&str]) -> Self {
        let model = NicModel::for_guest(guest_tools);
        Self {
            power: PowerState::Off,
            template: true,
            guest_tools,
            nics: networks
                .iter()
                .enumerate()
                .map(|(i, network)| NicInfo {
                    index: i + 1,
                    network: Some(network.to_string()),
                    summary: network.to_string(),
                    model,
                })
                .collect(),
            snapshots: Vec::new(),
            note: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ObjectBody {
    Folder {
        #[serde(default)]
        children: Vec<u64>,
    },
    Vm(VmRecord),
    Other {
        kind: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryObject {
    pub name: String,
    pub parent: Option<u64>,
    #[serde(flatten)]
    pub body: ObjectBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    next_id: u64,
    root: u64,
    objects: BTreeMap<u64, InventoryObject>,
    #[serde(default)]
    portgroups: BTreeMap<String, PortgroupSpec>,
    #[serde(default)]
    hosts: Vec<String>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new(vec![DEFAULT_HOST_NAME.to_string()])
    }
}

impl Inventory {
    pub fn new(hosts: Vec<String>) -> Self {
        let mut objects = BTreeMap::new();
        objects.insert(
            0,
            InventoryObject {
                name: ROOT_FOLDER_NAME.to_string(),
                parent: None,
                body: ObjectBody::Folder {
                    children: Vec::new(),
                },
            },
        );
        Self {
            next_id: 1,
            root: 0,
            objects,
            portgroups: BTreeMap::new(),
            hosts,
        }
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn root(&self) -> FolderHandle {
        FolderHandle {
            id: ObjectId(self.root),
            name: self
                .objects
                .get(&self.root)
                .map(|o| o.name.clone())
                .unwrap_or_else(|| ROOT_FOLDER_NAME.to_string()),
        }
    }

    fn object(&self, id: ObjectId) -> LabforgeResult<&InventoryObject> {
        self.objects
            .get(&id.0)
            .ok_or_else(|| LabforgeError::not_found(format!("inventory object {}", id)))
    }

    fn children(&self, folder: ObjectId) -> LabforgeResult<&[u64]> {
        match &self.object(folder)?.body {
            ObjectBody::Folder { children } => Ok(children.as_slice()),
            _ => Err(LabforgeError::not_found(format!("folder {}", folder))),
        }
    }

    fn children_mut(&mut self, folder: ObjectId) -> LabforgeResult<&mut Vec<u64>> {
        match self.objects.get_mut(&folder.0).map(|o| &mut o.body) {
            Some(ObjectBody::Folder { children }) => Ok(children),
            _ => Err(LabforgeError::not_found(format!("folder {}", folder))),
        }
    }

    pub fn vm_record(&self, vm: &VmHandle) -> LabforgeResult<&VmRecord> {
        match &self.object(vm.id)?.body {
            ObjectBody::Vm(record) => Ok(record),
            _ => Err(LabforgeError::not_found(format!("VM '{}'", vm.name))),
        }
    }

    fn vm_record_mut(&mut self, vm: &VmHandle) -> LabforgeResult<&mut VmRecord> {
        match self.objects.get_mut(&vm.id.0).map(|o| &mut o.body) {
            Some(ObjectBody::Vm(record)) => Ok(record),
            _ => Err(LabforgeError::not_found(format!("VM '{}'", vm.name))),
        }
    }

    fn item(&self, id: u64) -> LabforgeResult<InventoryItem> {
        let object = self.object(ObjectId(id))?;
        Ok(match &object.body {
            ObjectBody::Folder { .. } => InventoryItem::Folder(FolderHandle {
                id: ObjectId(id),
                name: object.name.clone(),
            }),
            ObjectBody::Vm(_) => InventoryItem::Vm(VmHandle {
                id: ObjectId(id),
                name: object.name.clone(),
            }),
            ObjectBody::Other { kind } => InventoryItem::Other {
                id: ObjectId(id),
                name: object.name.clone(),
                kind: kind.clone(),
            },
        })
    }

    fn child_named(&self, folder: ObjectId, name: &str) -> LabforgeResult<Option<u64>> {
        Ok(self
            .children(folder)?
            .iter()
            .copied()
            .find(|id| self.objects.get(id).is_some_and(|o| o.name == name)))
    }

    fn insert(&mut self, parent: ObjectId, name: &str, body: ObjectBody) -> LabforgeResult<u64> {
        if self.child_named(parent, name)?.is_some() {
            return Err(LabforgeError::already_exists(format!(
                "'{}' in folder {}",
                name, parent
            )));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(
            id,
            InventoryObject {
                name: name.to_string(),
                parent: Some(parent.0),
                body,
            },
        );
        self.children_mut(parent)?.push(id);
        Ok(id)
    }

    fn remove(&mut self, id: ObjectId) -> LabforgeResult<()> {
        let object = self
            .objects
            .remove(&id.0)
            .ok_or_else(|| LabforgeError::not_found(format!("inventory object {}", id)))?;
        if let Some(parent) = object.parent {
            self.children_mut(ObjectId(parent))?.retain(|child| *child != id.0);
        }
        Ok(())
    }

    pub fn create_folder(&mut self, name: &str, parent: &FolderHandle) -> LabforgeResult<FolderHandle> {
        if let Some(existing) = self.child_named(parent.id, name)? {
            if let InventoryItem::Folder(folder) = self.item(existing)? {
                return Ok(folder);
            }
        }
        let id = self.insert(
            parent.id,
            name,
            ObjectBody::Folder {
                children: Vec::new(),
            },
        )?;
        Ok(FolderHandle {
            id: ObjectId(id),
            name: name.to_string(),
        })
    }

    pub fn find_by_path(&self, root: &FolderHandle, path: &str) -> LabforgeResult<Option<InventoryItem>> {
        let mut current = root.id.0;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            match self.child_named(ObjectId(current), part) {
                Ok(Some(child)) => current = child,
                Ok(None) | Err(_) => return Ok(None),
            }
        }
        self.item(current).map(Some)
    }

    pub fn list_children(&self, folder: &FolderHandle) -> LabforgeResult<Vec<InventoryItem>> {
        self.children(folder.id)?
            .iter()
            .map(|id| self.item(*id))
            .collect()
    }

    pub fn clone_vm(
        &mut self,
        source: &VmHandle,
        dest: &FolderHandle,
        name: &str,
        spec: &CloneSpec,
    ) -> LabforgeResult<VmHandle> {
        let source_record = self.vm_record(source)?;
        let record = VmRecord {
            power: if spec.power_on {
                PowerState::On
            } else {
                PowerState::Off
            },
            template: false,
            guest_tools: source_record.guest_tools,
            nics: source_record.nics.clone(),
            snapshots: Vec::new(),
            note: None,
        };
        let id = self.insert(dest.id, name, ObjectBody::Vm(record))?;
        Ok(VmHandle {
            id: ObjectId(id),
            name: name.to_string(),
        })
    }

    pub fn set_note(&mut self, vm: &VmHandle, text: &str) -> LabforgeResult<()> {
        self.vm_record_mut(vm)?.note = Some(text.to_string());
        Ok(())
    }

    pub fn create_snapshot(&mut self, vm: &VmHandle, name: &str, description: &str) -> LabforgeResult<()> {
        self.vm_record_mut(vm)?.snapshots.push(Snapshot {
            name: name.to_string(),
            description: description.to_string(),
        });
        Ok(())
    }

    pub fn is_template(&self, vm: &VmHandle) -> LabforgeResult<bool> {
        Ok(self.vm_record(vm)?.template)
    }

    pub fn convert_to_template(&mut self, vm: &VmHandle) -> LabforgeResult<()> {
        let record = self.vm_record_mut(vm)?;
        if record.power != PowerState::Off {
            return Err(LabforgeError::vm_operation(
                "convert_to_template",
                format!("VM '{}' is powered {}", vm.name, record.power),
            ));
        }
        record.template = true;
        Ok(())
    }

    pub fn powered_on(&self, vm: &VmHandle) -> LabforgeResult<bool> {
        Ok(self.vm_record(vm)?.power == PowerState::On)
    }

    pub fn set_power_state(&mut self, vm: &VmHandle, state: PowerState) -> LabforgeResult<()> {
        let record = self.vm_record_mut(vm)?;
        if record.template && state == PowerState::On {
            return Err(LabforgeError::vm_operation(
                "set_power_state",
                format!("VM '{}' is a template", vm.name),
            ));
        }
        record.power = state;
        Ok(())
    }

    pub fn list_nics(&self, vm: &VmHandle) -> LabforgeResult<Vec<NicInfo>> {
        Ok(self.vm_record(vm)?.nics.clone())
    }

    fn require_network(&self, network: &str) -> LabforgeResult<()> {
        if self.portgroups.contains_key(network) {
            Ok(())
        } else {
            Err(LabforgeError::not_found(format!("network '{}'", network)))
        }
    }

    pub fn add_nic(
        &mut self,
        vm: &VmHandle,
        network: &str,
        model: NicModel,
        summary: &str,
    ) -> LabforgeResult<()> {
        self.require_network(network)?;
        let record = self.vm_record_mut(vm)?;
        let index = record.nics.len() + 1;
        record.nics.push(NicInfo {
            index,
            network: Some(network.to_string()),
            summary: summary.to_string(),
            model,
        });
        Ok(())
    }

    pub fn delete_nic(&mut self, vm: &VmHandle, index: usize) -> LabforgeResult<()> {
        let record = self.vm_record_mut(vm)?;
        if index == 0 || index > record.nics.len() {
            return Err(LabforgeError::not_found(format!("NIC {} on VM '{}'", index, vm.name)));
        }
        record.nics.remove(index - 1);
        for (i, nic) in record.nics.iter_mut().enumerate() {
            nic.index = i + 1;
        }
        Ok(())
    }

    pub fn edit_nic(
        &mut self,
        vm: &VmHandle,
        index: usize,
        network: &str,
        summary: &str,
    ) -> LabforgeResult<()> {
        self.require_network(network)?;
        let record = self.vm_record_mut(vm)?;
        let nic = index
            .checked_sub(1)
            .and_then(|i| record.nics.get_mut(i))
            .ok_or_else(|| LabforgeError::not_found(format!("NIC {} on VM '{}'", index, vm.name)))?;
        nic.network = Some(network.to_string());
        nic.summary = summary.to_string();
        Ok(())
    }

    pub fn has_guest_tools(&self, vm: &VmHandle) -> LabforgeResult<bool> {
        Ok(self.vm_record(vm)?.guest_tools)
    }

    pub fn network_exists(&self, name: &str) -> bool {
        self.portgroups.contains_key(name)
    }

    pub fn list_networks(&self) -> Vec<String> {
        self.portgroups.keys().cloned().collect()
    }

    pub fn vlans_in_use(&self, host: &str) -> Vec<u16> {
        self.portgroups
            .values()
            .filter(|pg| pg.host == host)
            .map(|pg| pg.vlan)
            .collect()
    }

    pub fn portgroup(&self, name: &str) -> Option<&PortgroupSpec> {
        self.portgroups.get(name)
    }

    pub fn create_portgroup(&mut self, spec: &PortgroupSpec) -> LabforgeResult<()> {
        if !self.hosts.is_empty() && !self.hosts.contains(&spec.host) {
            return Err(LabforgeError::not_found(format!("host '{}'", spec.host)));
        }
        if self.portgroups.contains_key(&spec.name) {
            return Err(LabforgeError::already_exists(format!("portgroup '{}'", spec.name)));
        }
        self.portgroups.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    pub fn delete_portgroup(&mut self, name: &str, host: &str) -> LabforgeResult<()> {
        match self.portgroups.get(name) {
            Some(existing) if existing.host == host => {
                self.portgroups.remove(name);
                Ok(())
            }
            _ => Err(LabforgeError::not_found(format!(
                "portgroup '{}' on host '{}'",
                name, host
            ))),
        }
    }

    pub fn destroy_vm(&mut self, vm: &VmHandle) -> LabforgeResult<()> {
        if self.vm_record(vm)?.power == PowerState::On {
            return Err(LabforgeError::vm_operation(
                "destroy_vm",
                format!("VM '{}' is powered on", vm.name),
            ));
        }
        self.remove(vm.id)
    }

    pub fn destroy_folder(&mut self, folder: &FolderHandle) -> LabforgeResult<()> {
        if folder.id.0 == self.root {
            return Err(LabforgeError::vm_operation(
                "destroy_folder",
                "the root folder cannot be destroyed",
            ));
        }
        if !self.children(folder.id)?.is_empty() {
            return Err(LabforgeError::vm_operation(
                "destroy_folder",
                format!("folder '{}' is not empty", folder.name),
            ));
        }
        self.remove(folder.id)
    }

    pub fn default_host(&self) -> Option<String> {
        self.hosts.first().cloned()
    }

    /// Create every folder along `path` below the root
    pub fn ensure_folder_path(&mut self, path: &str) -> LabforgeResult<FolderHandle> {
        let mut folder = self.root();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            folder = self.create_folder(part, &folder)?;
        }
        Ok(folder)
    }

    /// Place a VM at `folder_path`, creating the folders on the way
    pub fn add_vm(&mut self, folder_path: &str, name: &str, record: VmRecord) -> LabforgeResult<VmHandle> {
        let folder = self.ensure_folder_path(folder_path)?;
        let id = self.insert(folder.id, name, ObjectBody::Vm(record))?;
        Ok(VmHandle {
            id: ObjectId(id),
            name: name.to_string(),
        })
    }

    pub fn add_other(&mut self, folder_path: &str, name: &str, kind: &str) -> LabforgeResult<()> {
        let folder = self.ensure_folder_path(folder_path)?;
        self.insert(
            folder.id,
            name,
            ObjectBody::Other {
                kind: kind.to_string(),
            },
        )?;
        Ok(())
    }

    /// Register an existing portgroup on the first host
    pub fn add_portgroup(&mut self, name: &str, vlan: u16, vswitch: &str) -> LabforgeResult<()> {
        let host = self
            .default_host()
            .unwrap_or_else(|| DEFAULT_HOST_NAME.to_string());
        self.create_portgroup(&PortgroupSpec {
            name: name.to_string(),
            host,
            promiscuous: false,
            vlan,
            vswitch: vswitch.to_string(),
        })
    }

    /// Number of VMs anywhere in the inventory
    pub fn vm_count(&self) -> usize {
        self.objects
            .values()
            .filter(|o| matches!(o.body, ObjectBody::Vm(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn inventory() -> (Inventory, VmHandle) {
        let mut inventory = Inventory::default();
        inventory.add_portgroup("internet", 10, "vSwitch0").unwrap();
        inventory.add_portgroup("lan", 20, "vSwitch0").unwrap();
        let template = inventory
            .add_vm("Labs/Templates", "web-tmpl", VmRecord::template(true, &["internet"]))
            .unwrap();
        (inventory, template)
    }

    #[test]
    fn test_create_folder_returns_existing() {
        let mut inventory = Inventory::default();
        let root = inventory.root();
        let first = inventory.create_folder("Labs", &root).unwrap();
        let second = inventory.create_folder("Labs", &root).unwrap();
        assert_eq!(first, second);
        assert_eq!(inventory.list_children(&root).unwrap().len(), 1);
    }

    #[test]
    fn test_find_by_path() {
        let (inventory, template) = inventory();
        let root = inventory.root();
        assert_eq!(
            inventory.find_by_path(&root, "/Labs/Templates/web-tmpl").unwrap(),
            Some(InventoryItem::Vm(template))
        );
        assert_eq!(inventory.find_by_path(&root, "Labs/Nope").unwrap(), None);
        assert_eq!(
            inventory.find_by_path(&root, "").unwrap(),
            Some(InventoryItem::Folder(root))
        );
    }

    #[test]
    fn test_clone_copies_hardware_not_state() {
        let (mut inventory, template) = inventory();
        let dest = inventory.ensure_folder_path("Labs/Env").unwrap();
        let clone = inventory
            .clone_vm(&template, &dest, "web", &CloneSpec::default())
            .unwrap();

        let record = inventory.vm_record(&clone).unwrap();
        assert!(!record.template);
        assert_eq!(record.power, PowerState::Off);
        assert_eq!(record.nics.len(), 1);

        let duplicate = inventory.clone_vm(&template, &dest, "web", &CloneSpec::default());
        assert!(matches!(duplicate, Err(LabforgeError::AlreadyExists { .. })));
    }

    #[test]
    fn test_nic_operations_renumber_and_require_networks() {
        let (mut inventory, template) = inventory();
        inventory.add_nic(&template, "lan", NicModel::Vmxnet3, "lan").unwrap();
        assert!(inventory.add_nic(&template, "missing", NicModel::E1000, "missing").is_err());

        inventory.delete_nic(&template, 1).unwrap();
        let nics = inventory.list_nics(&template).unwrap();
        assert_eq!(nics.len(), 1);
        assert_eq!(nics[0].index, 1);
        assert_eq!(nics[0].network.as_deref(), Some("lan"));

        inventory.edit_nic(&template, 1, "internet", "internet").unwrap();
        assert!(inventory.edit_nic(&template, 2, "internet", "internet").is_err());
    }

    #[test]
    fn test_template_conversion_requires_power_off() {
        let (mut inventory, template) = inventory();
        let dest = inventory.ensure_folder_path("Labs/Masters").unwrap();
        let master = inventory
            .clone_vm(&template, &dest, "(MASTER) web", &CloneSpec { datastore: None, power_on: true })
            .unwrap();

        assert!(inventory.convert_to_template(&master).is_err());
        inventory.set_power_state(&master, PowerState::Off).unwrap();
        inventory.convert_to_template(&master).unwrap();
        assert!(inventory.is_template(&master).unwrap());
    }

    #[test]
    fn test_destroy_folder_requires_empty() {
        let (mut inventory, template) = inventory();
        let root = inventory.root();
        let templates = inventory.find_by_path(&root, "Labs/Templates").unwrap().unwrap();
        let templates = templates.into_folder().unwrap();

        assert!(inventory.destroy_folder(&templates).is_err());
        inventory.destroy_vm(&template).unwrap();
        inventory.destroy_folder(&templates).unwrap();
        assert!(inventory.destroy_folder(&root).is_err());
    }

    #[test]
    fn test_portgroups() {
        let (mut inventory, _) = inventory();
        assert!(inventory.network_exists("internet"));
        assert_eq!(inventory.list_networks(), vec!["internet", "lan"]);
        assert!(inventory.delete_portgroup("internet", "esxi-99").is_err());
        inventory.delete_portgroup("internet", "esxi-01").unwrap();
        assert!(!inventory.network_exists("internet"));
    }

    #[test]
    fn test_json_roundtrip_keeps_tree() {
        let (inventory, _) = inventory();
        let json = serde_json::to_string(&inventory).unwrap();
        let restored: Inventory = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, inventory);
    }
}
