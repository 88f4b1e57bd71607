//! Entry points of a provisioning run
//!
//! An [`Environment`] binds one specification to one hypervisor. It is
//! created with [`Environment::connect`], which locates the folders the run
//! works in, and then drives the four phases: creating Masters, deploying
//! the environment, and tearing either of them down again.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cleanup::{delete_networks, TreeCleaner, VmFilter};
use crate::config::LabforgeConfig;
use crate::error::{LabforgeError, LabforgeResult};
use crate::groups::{DirectoryService, GroupRegistry};
use crate::hypervisor::{format_tree, CloneSpec, FolderHandle, HypervisorDriver, InventoryItem};
use crate::network::{NetworkPlacement, NetworkResolver};
use crate::report::{CleanupReport, Phase, ProvisionReport};
use crate::spec::{EnvironmentSpec, NetworkCategory};
use crate::template::TemplateConverter;
use crate::walker::{FolderTreeWalker, WalkPosition};

pub struct Environment {
    config: LabforgeConfig,
    spec: Arc<EnvironmentSpec>,
    driver: Arc<dyn HypervisorDriver>,
    server_root: FolderHandle,
    root: FolderHandle,
    groups: Arc<GroupRegistry>,
    networks: Arc<NetworkResolver>,
    clone_spec: CloneSpec,
}

impl Environment {
    pub async fn connect(
        config: LabforgeConfig,
        spec: EnvironmentSpec,
        driver: Arc<dyn HypervisorDriver>,
        directory: &dyn DirectoryService,
    ) -> LabforgeResult<Self> {
        let infra = &config.infrastructure;

        let datacenter_root = driver.root_folder().await?;
        let server_root = match &infra.server_root {
            Some(path) => match driver.find_by_path(&datacenter_root, path).await? {
                Some(InventoryItem::Folder(folder)) => folder,
                _ => {
                    return Err(LabforgeError::configuration(
                        "infrastructure.server_root",
                        format!("Could not find server root folder '{}'", path),
                    ))
                }
            },
            None => datacenter_root,
        };

        let root_path = spec
            .metadata
            .folder_name
            .clone()
            .unwrap_or_else(|| spec.metadata.name.clone());
        let mut root = server_root.clone();
        for part in root_path.split('/').filter(|p| !p.is_empty()) {
            root = driver.create_folder(part, &root).await?;
        }
        info!("Using environment root folder '{}'", root_path);

        let host = match infra.hosts.first() {
            Some(host) => host.clone(),
            None => driver.default_host().await?.ok_or_else(|| {
                LabforgeError::configuration("infrastructure.hosts", "no host available for networks")
            })?,
        };
        let vswitch = match &infra.vswitch {
            Some(vswitch) => vswitch.clone(),
            None => driver
                .list_networks()
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    LabforgeError::configuration(
                        "infrastructure.vswitch",
                        "no vswitch configured and none known to the hypervisor",
                    )
                })?,
        };
        debug!("Networks will be placed on host '{}', vswitch '{}'", host, vswitch);

        let groups = Arc::new(GroupRegistry::build(
            &spec.groups,
            spec.source_dir.as_deref(),
            directory,
        )?);
        let networks = Arc::new(NetworkResolver::new(
            spec.networks.clone(),
            driver.clone(),
            &config.engine,
            NetworkPlacement { host, vswitch },
        ));
        let clone_spec = CloneSpec {
            datastore: infra.datastore.clone(),
            power_on: false,
        };

        Ok(Self {
            spec: Arc::new(spec),
            config,
            driver,
            server_root,
            root,
            groups,
            networks,
            clone_spec,
        })
    }

    pub fn root(&self) -> &FolderHandle {
        &self.root
    }

    pub fn networks(&self) -> &Arc<NetworkResolver> {
        &self.networks
    }

    fn walker(&self) -> FolderTreeWalker {
        FolderTreeWalker::new(
            self.spec.clone(),
            self.config.engine.clone(),
            self.driver.clone(),
            self.groups.clone(),
            self.networks.clone(),
            self.clone_spec.clone(),
        )
    }

    async fn find_master_root(&self) -> LabforgeResult<Option<FolderHandle>> {
        let name = &self.config.engine.master_root_name;
        Ok(self
            .driver
            .find_by_path(&self.root, name)
            .await?
            .and_then(InventoryItem::into_folder))
    }

    /// Build the Master tree: one Master VM per hypervisor-managed service,
    /// cloned from its template, wired and snapshotted
    pub async fn create_masters(&self) -> LabforgeResult<ProvisionReport> {
        let mut report = ProvisionReport::new(Phase::Masters);
        let template_folder = &self.config.infrastructure.template_folder;
        let templates = match self
            .driver
            .find_by_path(&self.server_root, template_folder)
            .await?
        {
            Some(InventoryItem::Folder(folder)) => folder,
            _ => {
                return Err(LabforgeError::configuration(
                    "infrastructure.template_folder",
                    format!("Could not find template folder '{}'", template_folder),
                ))
            }
        };

        let master_root = self
            .driver
            .create_folder(&self.config.engine.master_root_name, &self.root)
            .await?;

        let before = self.networks.created_networks().await;
        for category in NetworkCategory::ALL {
            self.networks
                .ensure_base_networks(category, true, &mut report)
                .await?;
        }

        info!("Creating Masters for environment '{}'", self.spec.metadata.name);
        self.walker()
            .generate_master_tree(
                &self.spec.folders,
                WalkPosition::root(master_root),
                &templates,
                &mut report,
            )
            .await?;

        report.networks_created = self.created_since(&before).await;
        self.log_tree().await;
        info!("{}", report);
        Ok(report)
    }

    /// Convert the Masters to templates and clone every instance
    pub async fn deploy_environment(&self) -> LabforgeResult<ProvisionReport> {
        let mut report = ProvisionReport::new(Phase::Deployment);
        let Some(master_root) = self.find_master_root().await? else {
            return Err(LabforgeError::configuration(
                "engine.master_root_name",
                format!(
                    "Could not find Master folder '{}'; create the Masters first",
                    self.config.engine.master_root_name
                ),
            ));
        };

        info!("Converting Masters to templates");
        let converter =
            TemplateConverter::new(self.driver.clone(), self.config.engine.snapshots.clone());
        report.conversion = Some(converter.convert_tree(&master_root).await);

        let before = self.networks.created_networks().await;
        info!("Deploying environment '{}'", self.spec.metadata.name);
        self.walker()
            .generate_deploy_tree(
                &self.spec.folders,
                WalkPosition::root(self.root.clone()),
                &master_root,
                &mut report,
            )
            .await?;

        report.networks_created = self.created_since(&before).await;
        self.log_tree().await;
        info!("{}", report);
        Ok(report)
    }

    /// Destroy the Master tree and, optionally, every catalogued network
    pub async fn cleanup_masters(&self, network_cleanup: bool) -> LabforgeResult<CleanupReport> {
        let mut report = CleanupReport::default();
        let name = &self.config.engine.master_root_name;
        let master_root = self
            .find_master_root()
            .await?
            .ok_or_else(|| LabforgeError::not_found(format!("Master folder '{}'", name)))?;

        info!("Cleaning up Masters of environment '{}'", self.spec.metadata.name);
        let cleaner = TreeCleaner::new(
            self.driver.as_ref(),
            VmFilter::Prefixed(&self.config.engine.master_prefix),
        );
        cleaner.clean(&master_root, &mut report).await;
        cleaner
            .destroy_if_empty(&master_root, &format!("/{}", name), &mut report)
            .await;

        if network_cleanup {
            let declared = NetworkCategory::ALL
                .iter()
                .flat_map(|category| self.spec.networks.entries(*category).keys());
            delete_networks(
                self.driver.as_ref(),
                declared,
                &self.networks.placement().host,
                &mut report,
            )
            .await;
        }
        info!("{}", report);
        Ok(report)
    }

    /// Destroy every deployed instance, leaving the Masters in place
    pub async fn cleanup_environment(&self, network_cleanup: bool) -> LabforgeResult<CleanupReport> {
        let mut report = CleanupReport::default();
        info!("Cleaning up environment '{}'", self.spec.metadata.name);
        TreeCleaner::new(self.driver.as_ref(), VmFilter::All)
            .keeping(&self.config.engine.master_root_name)
            .clean(&self.root, &mut report)
            .await;

        if network_cleanup {
            let generic = self.spec.networks.entries(NetworkCategory::Generic);
            let derived: Vec<String> = self
                .driver
                .list_networks()
                .await?
                .into_iter()
                .filter(|candidate| {
                    generic
                        .keys()
                        .any(|name| self.networks.is_generic_instance_of(candidate, name))
                })
                .collect();
            delete_networks(
                self.driver.as_ref(),
                &derived,
                &self.networks.placement().host,
                &mut report,
            )
            .await;
        }
        info!("{}", report);
        Ok(report)
    }

    async fn created_since(&self, before: &[String]) -> Vec<String> {
        self.networks
            .created_networks()
            .await
            .into_iter()
            .filter(|name| !before.contains(name))
            .collect()
    }

    async fn log_tree(&self) {
        match format_tree(self.driver.as_ref(), &self.root).await {
            Ok(tree) => debug!("Inventory of '{}':\n{}", self.root.name, tree),
            Err(e) => warn!("Could not render inventory of '{}': {}", self.root.name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::UnresolvedDirectory;
    use crate::hypervisor::MockHypervisor;

    const SPEC: &str = r#"
metadata:
  name: Exercise
  folder-name: Labs/Exercise
services:
  web:
    template: web-tmpl
networks:
  unique-networks:
    internet:
folders:
  Team:
    services:
      web:
        service: web
        networks: [internet]
"#;

    fn config() -> LabforgeConfig {
        let mut config = LabforgeConfig::test();
        config.infrastructure.vswitch = Some("vSwitch0".to_string());
        config
    }

    #[tokio::test]
    async fn test_connect_creates_root_path() {
        let driver = Arc::new(MockHypervisor::new());
        let spec = EnvironmentSpec::from_yaml_str(SPEC).unwrap();
        let env = Environment::connect(config(), spec, driver.clone(), &UnresolvedDirectory)
            .await
            .unwrap();

        assert_eq!(env.root().name, "Exercise");
        let root = driver.root_folder().await.unwrap();
        assert!(driver
            .find_by_path(&root, "Labs/Exercise")
            .await
            .unwrap()
            .is_some());
        assert_eq!(env.networks().placement().host, "esxi-01");
    }

    #[tokio::test]
    async fn test_missing_server_root_is_fatal() {
        let driver = Arc::new(MockHypervisor::new());
        let spec = EnvironmentSpec::from_yaml_str(SPEC).unwrap();
        let mut config = config();
        config.infrastructure.server_root = Some("Nowhere".to_string());

        let err = Environment::connect(config, spec, driver, &UnresolvedDirectory)
            .await
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_vswitch_falls_back_to_first_network() {
        let driver = Arc::new(MockHypervisor::new());
        driver.add_portgroup("VM Network", 0, "vSwitch0").unwrap();
        let spec = EnvironmentSpec::from_yaml_str(SPEC).unwrap();

        let env = Environment::connect(LabforgeConfig::test(), spec, driver, &UnresolvedDirectory)
            .await
            .unwrap();
        assert_eq!(env.networks().placement().vswitch, "VM Network");
    }

    #[tokio::test]
    async fn test_missing_template_folder_is_fatal() {
        let driver = Arc::new(MockHypervisor::new());
        let spec = EnvironmentSpec::from_yaml_str(SPEC).unwrap();
        let env = Environment::connect(config(), spec, driver, &UnresolvedDirectory)
            .await
            .unwrap();

        let err = env.create_masters().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_deploy_without_masters_is_fatal() {
        let driver = Arc::new(MockHypervisor::new());
        let spec = EnvironmentSpec::from_yaml_str(SPEC).unwrap();
        let env = Environment::connect(config(), spec, driver, &UnresolvedDirectory)
            .await
            .unwrap();

        assert!(env.deploy_environment().await.unwrap_err().is_fatal());
        assert!(matches!(
            env.cleanup_masters(false).await,
            Err(LabforgeError::NotFound { .. })
        ));
    }
}
