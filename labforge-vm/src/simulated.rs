//! File-backed simulated hypervisor
//!
//! Keeps an [`Inventory`] in memory and writes it to a JSON state file after
//! every change, so consecutive `labforge` invocations (masters, deploy,
//! cleanup) see each other's work the way they would against a real
//! management server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use labforge_core::config::InfrastructureConfig;
use labforge_core::error::{LabforgeError, LabforgeResult};
use labforge_core::hypervisor::{
    CloneSpec, FolderHandle, HypervisorDriver, HypervisorFactory, Inventory, InventoryItem,
    NicInfo, NicModel, PortgroupSpec, PowerState, VmHandle,
};

use crate::seed::SiteSeed;

#[derive(Serialize)]
struct StateRef<'a> {
    saved_at: DateTime<Utc>,
    inventory: &'a Inventory,
}

#[derive(Deserialize)]
struct StateFile {
    saved_at: DateTime<Utc>,
    inventory: Inventory,
}

pub struct SimulatedHypervisor {
    state_file: PathBuf,
    inventory: RwLock<Inventory>,
}

impl SimulatedHypervisor {
    /// Open the state at `state_file`. When there is none yet, start from
    /// `seed`, or from an empty datacenter with `hosts`.
    pub fn open(
        state_file: impl Into<PathBuf>,
        seed: Option<&SiteSeed>,
        hosts: &[String],
    ) -> LabforgeResult<Self> {
        let state_file = state_file.into();
        let inventory = if state_file.exists() {
            let contents = std::fs::read_to_string(&state_file)?;
            let state: StateFile = serde_json::from_str(&contents)?;
            info!(
                "Loaded simulated inventory from '{}' (saved {})",
                state_file.display(),
                state.saved_at.to_rfc3339()
            );
            state.inventory
        } else if let Some(seed) = seed {
            info!("Starting simulated inventory from seed");
            seed.to_inventory(hosts)?
        } else if hosts.is_empty() {
            Inventory::default()
        } else {
            Inventory::new(hosts.to_vec())
        };

        let driver = Self {
            state_file,
            inventory: RwLock::new(inventory),
        };
        driver.save_blocking()?;
        Ok(driver)
    }

    /// Copy of the current inventory
    pub async fn snapshot(&self) -> Inventory {
        self.inventory.read().await.clone()
    }

    fn encode(inventory: &Inventory) -> LabforgeResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&StateRef {
            saved_at: Utc::now(),
            inventory,
        })?)
    }

    fn temp_path(&self) -> PathBuf {
        self.state_file.with_extension("json.tmp")
    }

    fn save_blocking(&self) -> LabforgeResult<()> {
        let inventory = self.inventory.try_read().map_err(|_| {
            LabforgeError::vm_operation("save_state", "inventory is locked")
        })?;
        if let Some(parent) = self.state_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(self.temp_path(), Self::encode(&inventory)?)?;
        std::fs::rename(self.temp_path(), &self.state_file)?;
        Ok(())
    }

    async fn save(&self, inventory: &Inventory) -> LabforgeResult<()> {
        let bytes = Self::encode(inventory)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, bytes).await?;
        tokio::fs::rename(&temp, &self.state_file).await?;
        debug!("Saved simulated inventory to '{}'", self.state_file.display());
        Ok(())
    }

    async fn read<T>(&self, op: impl FnOnce(&Inventory) -> LabforgeResult<T>) -> LabforgeResult<T> {
        op(&*self.inventory.read().await)
    }

    /// Apply a change and persist it; nothing is written when `op` fails
    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut Inventory) -> LabforgeResult<T>,
    ) -> LabforgeResult<T> {
        let mut inventory = self.inventory.write().await;
        let value = op(&mut inventory)?;
        self.save(&inventory).await?;
        Ok(value)
    }
}

#[async_trait]
impl HypervisorDriver for SimulatedHypervisor {
    async fn root_folder(&self) -> LabforgeResult<FolderHandle> {
        self.read(|inv| Ok(inv.root())).await
    }

    async fn create_folder(&self, name: &str, parent: &FolderHandle) -> LabforgeResult<FolderHandle> {
        self.mutate(|inv| inv.create_folder(name, parent)).await
    }

    async fn find_by_path(
        &self,
        root: &FolderHandle,
        path: &str,
    ) -> LabforgeResult<Option<InventoryItem>> {
        self.read(|inv| inv.find_by_path(root, path)).await
    }

    async fn list_children(&self, folder: &FolderHandle) -> LabforgeResult<Vec<InventoryItem>> {
        self.read(|inv| inv.list_children(folder)).await
    }

    async fn clone_vm(
        &self,
        source: &VmHandle,
        dest: &FolderHandle,
        name: &str,
        spec: &CloneSpec,
    ) -> LabforgeResult<VmHandle> {
        debug!(
            "Cloning '{}' to '{}' in '{}' (datastore {:?})",
            source.name, name, dest.name, spec.datastore
        );
        self.mutate(|inv| inv.clone_vm(source, dest, name, spec)).await
    }

    async fn set_note(&self, vm: &VmHandle, text: &str) -> LabforgeResult<()> {
        self.mutate(|inv| inv.set_note(vm, text)).await
    }

    async fn create_snapshot(
        &self,
        vm: &VmHandle,
        name: &str,
        description: &str,
    ) -> LabforgeResult<()> {
        self.mutate(|inv| inv.create_snapshot(vm, name, description))
            .await
    }

    async fn is_template(&self, vm: &VmHandle) -> LabforgeResult<bool> {
        self.read(|inv| inv.is_template(vm)).await
    }

    async fn convert_to_template(&self, vm: &VmHandle) -> LabforgeResult<()> {
        self.mutate(|inv| inv.convert_to_template(vm)).await
    }

    async fn powered_on(&self, vm: &VmHandle) -> LabforgeResult<bool> {
        self.read(|inv| inv.powered_on(vm)).await
    }

    async fn set_power_state(
        &self,
        vm: &VmHandle,
        state: PowerState,
        attempt_guest: bool,
    ) -> LabforgeResult<()> {
        self.mutate(|inv| {
            if attempt_guest && state == PowerState::Off && inv.has_guest_tools(vm)? {
                debug!("Shutting down guest of '{}'", vm.name);
            }
            inv.set_power_state(vm, state)
        })
        .await
    }

    async fn list_nics(&self, vm: &VmHandle) -> LabforgeResult<Vec<NicInfo>> {
        self.read(|inv| inv.list_nics(vm)).await
    }

    async fn add_nic(
        &self,
        vm: &VmHandle,
        network: &str,
        model: NicModel,
        summary: &str,
    ) -> LabforgeResult<()> {
        self.mutate(|inv| inv.add_nic(vm, network, model, summary))
            .await
    }

    async fn delete_nic(&self, vm: &VmHandle, index: usize) -> LabforgeResult<()> {
        self.mutate(|inv| inv.delete_nic(vm, index)).await
    }

    async fn edit_nic(
        &self,
        vm: &VmHandle,
        index: usize,
        network: &str,
        summary: &str,
    ) -> LabforgeResult<()> {
        self.mutate(|inv| inv.edit_nic(vm, index, network, summary))
            .await
    }

    async fn has_guest_tools(&self, vm: &VmHandle) -> LabforgeResult<bool> {
        self.read(|inv| inv.has_guest_tools(vm)).await
    }

    async fn network_exists(&self, name: &str) -> LabforgeResult<bool> {
        self.read(|inv| Ok(inv.network_exists(name))).await
    }

    async fn list_networks(&self) -> LabforgeResult<Vec<String>> {
        self.read(|inv| Ok(inv.list_networks())).await
    }

    async fn vlans_in_use(&self, host: &str) -> LabforgeResult<Vec<u16>> {
        self.read(|inv| Ok(inv.vlans_in_use(host))).await
    }

    async fn create_portgroup(&self, spec: &PortgroupSpec) -> LabforgeResult<()> {
        self.mutate(|inv| inv.create_portgroup(spec)).await
    }

    async fn delete_portgroup(&self, name: &str, host: &str) -> LabforgeResult<()> {
        self.mutate(|inv| inv.delete_portgroup(name, host)).await
    }

    async fn destroy_vm(&self, vm: &VmHandle) -> LabforgeResult<()> {
        self.mutate(|inv| inv.destroy_vm(vm)).await
    }

    async fn destroy_folder(&self, folder: &FolderHandle) -> LabforgeResult<()> {
        self.mutate(|inv| inv.destroy_folder(folder)).await
    }

    async fn default_host(&self) -> LabforgeResult<Option<String>> {
        self.read(|inv| Ok(inv.default_host())).await
    }
}

pub struct SimulatedHypervisorFactory;

impl HypervisorFactory for SimulatedHypervisorFactory {
    fn create_driver(
        &self,
        config: &InfrastructureConfig,
    ) -> LabforgeResult<Arc<dyn HypervisorDriver>> {
        let seed = config.seed_file.as_ref().map(SiteSeed::load).transpose()?;
        let driver = SimulatedHypervisor::open(&config.state_file, seed.as_ref(), &config.hosts)?;
        Ok(Arc::new(driver))
    }

    fn backend_type(&self) -> &'static str {
        "simulated"
    }

    fn description(&self) -> &'static str {
        "Simulated hypervisor persisting its inventory to a JSON state file"
    }
}
