//! Fixtures shared by unit and integration tests

use std::sync::Arc;

use crate::config::LabforgeConfig;
use crate::environment::Environment;
use crate::error::LabforgeResult;
use crate::groups::UnresolvedDirectory;
use crate::hypervisor::{HypervisorDriver, InventoryItem, MockHypervisor};
use crate::spec::EnvironmentSpec;

/// One team folder instantiated three times, a shared and a per-team network,
/// and a service that is not built from a template
pub const TEAM_EXERCISE: &str = r#"
metadata:
  name: Team Exercise
services:
  web:
    template: web-tmpl
    note: Public web server
  scoreboard:
    image: scoreboard:latest
networks:
  unique-networks:
    internet:
  generic-networks:
    team-lan:
folders:
  Team:
    instances:
      prefix: "T-"
      number: 3
    services:
      web:
        service: web
        networks: [internet, team-lan]
      board:
        service: scoreboard
"#;

/// Configuration for the in-memory driver with placement fully specified
pub fn test_config() -> LabforgeConfig {
    let mut config = LabforgeConfig::test();
    config.infrastructure.vswitch = Some("vSwitch0".to_string());
    config
}

/// A hypervisor holding the `Templates` folder with a few bare templates
pub fn seeded_hypervisor() -> Arc<MockHypervisor> {
    let driver = Arc::new(MockHypervisor::new());
    for (name, guest_tools) in [("web-tmpl", true), ("db-tmpl", true), ("legacy-tmpl", false)] {
        if let Err(e) = driver.add_template("Templates", name, guest_tools, &[]) {
            panic!("Could not seed template '{}': {}", name, e);
        }
    }
    driver
}

/// Connect an environment for `yaml` to `driver` with [`test_config`]
pub async fn connect(yaml: &str, driver: Arc<MockHypervisor>) -> LabforgeResult<Environment> {
    connect_with(yaml, driver, test_config()).await
}

pub async fn connect_with(
    yaml: &str,
    driver: Arc<MockHypervisor>,
    config: LabforgeConfig,
) -> LabforgeResult<Environment> {
    let spec = EnvironmentSpec::from_yaml_str(yaml)?;
    Environment::connect(config, spec, driver, &UnresolvedDirectory).await
}

/// Networks attached to the VM at `path` below the inventory root, by slot.
/// `None` when there is no VM at `path`.
pub async fn nic_networks(driver: &dyn HypervisorDriver, path: &str) -> Option<Vec<String>> {
    let root = driver.root_folder().await.ok()?;
    let vm = driver.find_by_path(&root, path).await.ok()??.into_vm()?;
    let nics = driver.list_nics(&vm).await.ok()?;
    Some(
        nics.into_iter()
            .map(|nic| nic.network.unwrap_or_default())
            .collect(),
    )
}

/// Names of the objects directly inside the folder at `path`
pub async fn child_names(driver: &dyn HypervisorDriver, path: &str) -> Vec<String> {
    let Ok(root) = driver.root_folder().await else {
        return Vec::new();
    };
    match driver.find_by_path(&root, path).await {
        Ok(Some(InventoryItem::Folder(folder))) => driver
            .list_children(&folder)
            .await
            .map(|children| children.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}
