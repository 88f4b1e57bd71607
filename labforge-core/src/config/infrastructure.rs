//! Hypervisor infrastructure configuration

use super::defaults::*;
use super::parse_from_env;
use crate::error::{LabforgeError, LabforgeResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the environment is built and which driver builds it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfrastructureConfig {
    /// Driver registry key ("memory", "simulated", ...)
    pub backend: String,

    /// Management server hostname
    pub hostname: Option<String>,

    pub port: u16,

    pub datacenter: Option<String>,

    /// Datastore clones are placed on
    pub datastore: Option<String>,

    /// Hosts available to the environment; networks are realized on the first
    pub hosts: Vec<String>,

    /// Folder path under the datacenter VM folder used as the server root
    pub server_root: Option<String>,

    /// Folder path under the server root holding the service templates
    pub template_folder: String,

    /// Default vswitch for auto-created networks
    pub vswitch: Option<String>,

    /// Credentials file handed to drivers that need one
    pub login_file: Option<PathBuf>,

    /// Inventory state file used by the simulated backend
    pub state_file: PathBuf,

    /// Initial inventory used by the simulated backend when no state exists
    pub seed_file: Option<PathBuf>,
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            hostname: None,
            port: DEFAULT_HYPERVISOR_PORT,
            datacenter: None,
            datastore: None,
            hosts: Vec::new(),
            server_root: None,
            template_folder: DEFAULT_TEMPLATE_FOLDER.to_string(),
            vswitch: None,
            login_file: None,
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            seed_file: None,
        }
    }
}

impl InfrastructureConfig {
    /// Apply `LABFORGE_INFRA_*` overrides on top of this configuration
    pub fn apply_env(&mut self) -> LabforgeResult<()> {
        if let Ok(val) = std::env::var("LABFORGE_INFRA_BACKEND") {
            self.backend = val;
        }
        if let Ok(val) = std::env::var("LABFORGE_INFRA_HOSTNAME") {
            self.hostname = Some(val);
        }
        if let Some(port) = parse_from_env("LABFORGE_INFRA_PORT")? {
            self.port = port;
        }
        if let Ok(val) = std::env::var("LABFORGE_INFRA_SERVER_ROOT") {
            self.server_root = Some(val);
        }
        if let Ok(val) = std::env::var("LABFORGE_INFRA_TEMPLATE_FOLDER") {
            self.template_folder = val;
        }
        if let Ok(val) = std::env::var("LABFORGE_INFRA_VSWITCH") {
            self.vswitch = Some(val);
        }
        if let Ok(val) = std::env::var("LABFORGE_INFRA_STATE_FILE") {
            self.state_file = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("LABFORGE_INFRA_SEED_FILE") {
            self.seed_file = Some(PathBuf::from(val));
        }
        Ok(())
    }

    /// Validate infrastructure configuration
    pub fn validate(&self) -> LabforgeResult<()> {
        if self.backend.is_empty() {
            return Err(LabforgeError::configuration(
                "infrastructure.backend",
                "must name a hypervisor backend",
            ));
        }

        if self.template_folder.trim_matches('/').is_empty() {
            return Err(LabforgeError::configuration(
                "infrastructure.template_folder",
                "must not be empty",
            ));
        }

        if self.hosts.iter().any(|h| h.is_empty()) {
            return Err(LabforgeError::configuration(
                "infrastructure.hosts",
                "host names must not be empty",
            ));
        }

        if self.port == 0 {
            return Err(LabforgeError::configuration(
                "infrastructure.port",
                "must be non-zero",
            ));
        }

        Ok(())
    }

    /// Host on which networks are realized, if one is configured
    pub fn network_host(&self) -> Option<&str> {
        self.hosts.first().map(String::as_str)
    }
}
