//! Site descriptions the simulated hypervisor starts from
//!
//! A seed lists the hosts, the portgroups that already exist, and the folders
//! and templates an administrator would have prepared before a run:
//!
//! ```yaml
//! hosts: [esxi-01]
//! networks:
//!   - name: VM Network
//!     vswitch: vSwitch0
//! folders: [Labs]
//! templates:
//!   - folder: Labs/Templates
//!     name: web-tmpl
//!     networks: [VM Network]
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use labforge_core::error::{LabforgeError, LabforgeResult};
use labforge_core::hypervisor::inventory::VmRecord;
use labforge_core::hypervisor::Inventory;

const DEFAULT_SEED_VSWITCH: &str = "vSwitch0";

fn default_vswitch() -> String {
    DEFAULT_SEED_VSWITCH.to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SeedNetwork {
    pub name: String,
    #[serde(default)]
    pub vlan: u16,
    #[serde(default = "default_vswitch")]
    pub vswitch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SeedTemplate {
    /// Folder path below the datacenter root
    pub folder: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub guest_tools: bool,
    /// Networks of the template's NICs, in slot order
    #[serde(default)]
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SiteSeed {
    pub hosts: Vec<String>,
    pub networks: Vec<SeedNetwork>,
    pub folders: Vec<String>,
    pub templates: Vec<SeedTemplate>,
}

impl SiteSeed {
    pub fn from_yaml_str(contents: &str) -> LabforgeResult<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Load a seed file; `.json` files are read as JSON, anything else as YAML
    pub fn load(path: impl AsRef<Path>) -> LabforgeResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LabforgeError::configuration(
                "infrastructure.seed_file",
                format!("Could not read seed file '{}': {}", path.display(), e),
            )
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(serde_json::from_str(&contents)?),
            _ => Self::from_yaml_str(&contents),
        }
    }

    /// Build an inventory from this seed. `hosts` is used when the seed does
    /// not name any.
    pub fn to_inventory(&self, hosts: &[String]) -> LabforgeResult<Inventory> {
        let hosts = if self.hosts.is_empty() {
            hosts.to_vec()
        } else {
            self.hosts.clone()
        };
        let mut inventory = if hosts.is_empty() {
            Inventory::default()
        } else {
            Inventory::new(hosts)
        };

        for network in &self.networks {
            inventory.add_portgroup(&network.name, network.vlan, &network.vswitch)?;
        }
        for folder in &self.folders {
            inventory.ensure_folder_path(folder)?;
        }
        for template in &self.templates {
            let networks: Vec<&str> = template.networks.iter().map(String::as_str).collect();
            inventory.add_vm(
                &template.folder,
                &template.name,
                VmRecord::template(template.guest_tools, &networks),
            )?;
        }
        debug!(
            "Seeded inventory with {} networks and {} templates",
            self.networks.len(),
            self.templates.len()
        );
        Ok(inventory)
    }
}
