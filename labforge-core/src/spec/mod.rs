//! In-memory model of an environment specification
//!
//! An [`EnvironmentSpec`] is loaded once per run from YAML, checked for
//! dangling service and network references, and never mutated afterwards.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::error;

use crate::error::{LabforgeError, LabforgeResult};

pub mod folder;
pub mod network;

pub use folder::{
    BaseFolder, FolderNode, FolderSettings, ParentFolder, ServiceInstanceSpec, RESERVED_KEYS,
};
pub use network::{NetworkCatalog, NetworkCategory, NetworkConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,

    /// Environment root folder path, relative to the server root
    #[serde(rename = "folder-name", default)]
    pub folder_name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml::Value>,
}

/// Declaration of a service in the top-level `services` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Template the service is cloned from; absent for services that live
    /// outside the hypervisor
    #[serde(rename = "template", default)]
    pub template_ref: Option<String>,

    #[serde(default)]
    pub note: Option<String>,

    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml::Value>,
}

impl ServiceDefinition {
    pub fn is_hypervisor_managed(&self) -> bool {
        self.template_ref.is_some()
    }
}

/// Declaration of a group in the top-level `groups` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupSpec {
    #[serde(default)]
    pub ad_group: Option<String>,

    #[serde(default)]
    pub user_list: Option<Vec<String>>,

    #[serde(default)]
    pub filename: Option<PathBuf>,

    /// Present on template groups: number of per-instance groups
    #[serde(default)]
    pub instances: Option<usize>,

    #[serde(default)]
    pub description: Option<String>,
}

/// The `instances` directive of a folder or service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InstanceSpec {
    /// Fixed count, no prefix
    Count(u64),
    Directive(InstanceDirective),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstanceDirective {
    #[serde(default)]
    pub prefix: Option<String>,

    #[serde(default)]
    pub number: Option<u64>,

    /// Group whose size determines the count
    #[serde(default)]
    pub size_of: Option<String>,
}

#[derive(Deserialize)]
struct RawSpec {
    metadata: Metadata,
    #[serde(default)]
    groups: IndexMap<String, GroupSpec>,
    #[serde(default)]
    services: IndexMap<String, ServiceDefinition>,
    #[serde(default)]
    networks: NetworkCatalog,
    #[serde(default)]
    folders: serde_yaml::Mapping,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentSpec {
    pub metadata: Metadata,
    pub groups: IndexMap<String, GroupSpec>,
    pub services: IndexMap<String, ServiceDefinition>,
    pub networks: NetworkCatalog,
    pub folders: ParentFolder,
    /// Directory the specification was loaded from; relative group files
    /// resolve against it
    pub source_dir: Option<PathBuf>,
}

impl EnvironmentSpec {
    /// Parse and check a specification from YAML text
    pub fn from_yaml_str(contents: &str) -> LabforgeResult<Self> {
        let raw: RawSpec = serde_yaml::from_str(contents)?;
        let folders = folder::parse_root(&raw.folders)?;

        let spec = Self {
            metadata: raw.metadata,
            groups: raw.groups,
            services: raw.services,
            networks: raw.networks,
            folders,
            source_dir: None,
        };
        spec.check_references()?;
        Ok(spec)
    }

    /// Load a specification file
    pub fn load(path: impl AsRef<Path>) -> LabforgeResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut spec = Self::from_yaml_str(&contents)?;
        spec.source_dir = path.parent().map(Path::to_path_buf);
        Ok(spec)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.get(name)
    }

    /// Whether a service is built from a hypervisor template
    pub fn is_hypervisor_managed(&self, service_ref: &str) -> bool {
        match self.services.get(service_ref) {
            Some(definition) => definition.is_hypervisor_managed(),
            None => {
                error!("Could not find service '{}' in list of services", service_ref);
                false
            }
        }
    }

    /// Every service instance must reference a declared service and every NIC
    /// a catalogued network
    fn check_references(&self) -> LabforgeResult<()> {
        let mut problem = None;
        self.folders.visit_base_folders("folders", &mut |path, base| {
            if problem.is_some() {
                return;
            }
            for (name, instance) in &base.services {
                let instance_path = format!("{}/services/{}", path, name);
                if !self.services.contains_key(&instance.service_ref) {
                    problem = Some(LabforgeError::invalid_spec(
                        instance_path,
                        format!("unknown service '{}'", instance.service_ref),
                    ));
                    return;
                }
                if let Some(network) = instance
                    .networks
                    .iter()
                    .find(|n| self.networks.category_of(n).is_none())
                {
                    problem = Some(LabforgeError::invalid_spec(
                        instance_path,
                        format!("network '{}' is not declared in any network category", network),
                    ));
                    return;
                }
            }
        });

        match problem {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn summary(&self) -> SpecSummary {
        let mut base_folders = 0;
        let mut service_instances = 0;
        let mut foreign_instances = 0;
        self.folders.visit_base_folders("", &mut |_, base| {
            base_folders += 1;
            for instance in base.services.values() {
                service_instances += 1;
                if !self
                    .services
                    .get(&instance.service_ref)
                    .is_some_and(ServiceDefinition::is_hypervisor_managed)
                {
                    foreign_instances += 1;
                }
            }
        });

        SpecSummary {
            name: self.metadata.name.clone(),
            folders: self.folders.folder_count(),
            base_folders,
            service_instances,
            foreign_instances,
            services: self.services.len(),
            networks: self.networks.len(),
            groups: self.groups.len(),
        }
    }
}

/// Counts reported by `labforge validate`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSummary {
    pub name: String,
    pub folders: usize,
    pub base_folders: usize,
    pub service_instances: usize,
    pub foreign_instances: usize,
    pub services: usize,
    pub networks: usize,
    pub groups: usize,
}

impl fmt::Display for SpecSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Environment: {}", self.name)?;
        writeln!(f, "  folders:           {} ({} base)", self.folders, self.base_folders)?;
        writeln!(
            f,
            "  service instances: {} ({} outside the hypervisor)",
            self.service_instances, self.foreign_instances
        )?;
        writeln!(f, "  services:          {}", self.services)?;
        writeln!(f, "  networks:          {}", self.networks)?;
        write!(f, "  groups:            {}", self.groups)
    }
}
