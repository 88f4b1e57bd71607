//! Network reference resolution
//!
//! Service instances refer to networks by catalog name. Unique networks are
//! used as-is. Generic networks are realized once per folder instance under a
//! derived name (`team-lan` becomes `team-lan-GENERIC-01` for instance 1),
//! created on first use with a VLAN from the [`VlanAllocator`].
//!
//! Every network seen or created during a run is recorded in the
//! [`NetTable`]. The table and the allocator sit behind one async mutex that
//! is held across the check-then-create of a network, so concurrent walkers
//! never create the same network twice or reuse a VLAN tag.

use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{LabforgeError, LabforgeResult};
use crate::hypervisor::{HypervisorDriver, PortgroupSpec};
use crate::report::ProvisionReport;
use crate::spec::{NetworkCatalog, NetworkCategory, NetworkConfig};

pub mod vlan;

pub use vlan::VlanAllocator;

/// How a network came to be in the [`NetTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkOrigin {
    /// Already present on the host
    Existing,
    /// Created during this run
    Created,
}

/// Networks known to exist during the current run
#[derive(Debug, Clone, Default)]
pub struct NetTable {
    entries: IndexMap<String, NetworkOrigin>,
}

impl NetTable {
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Entries are never removed or overwritten
    pub fn register(&mut self, name: &str, origin: NetworkOrigin) {
        self.entries.entry(name.to_string()).or_insert(origin);
    }

    pub fn created(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, origin)| **origin == NetworkOrigin::Created)
            .map(|(name, _)| name.as_str())
    }
}

#[derive(Debug)]
struct NetState {
    table: NetTable,
    vlans: VlanAllocator,
    /// Whether the tags already used on the host have been reserved
    host_vlans_loaded: bool,
}

/// Where auto-created networks are placed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPlacement {
    pub host: String,
    /// Used when a network does not name its own vswitch
    pub vswitch: String,
}

pub struct NetworkResolver {
    catalog: NetworkCatalog,
    driver: Arc<dyn HypervisorDriver>,
    placement: NetworkPlacement,
    generic_infix: String,
    padding: usize,
    state: Mutex<NetState>,
}

impl NetworkResolver {
    pub fn new(
        catalog: NetworkCatalog,
        driver: Arc<dyn HypervisorDriver>,
        engine: &EngineConfig,
        placement: NetworkPlacement,
    ) -> Self {
        let vlans = VlanAllocator::new(engine.vlans, catalog.declared_vlans());
        Self {
            catalog,
            driver,
            placement,
            generic_infix: engine.generic_infix.clone(),
            padding: engine.instance_padding,
            state: Mutex::new(NetState {
                table: NetTable::default(),
                vlans,
                host_vlans_loaded: false,
            }),
        }
    }

    pub fn placement(&self) -> &NetworkPlacement {
        &self.placement
    }

    /// Catalog category `name` is declared in
    pub fn classify(&self, name: &str) -> LabforgeResult<NetworkCategory> {
        self.catalog.category_of(name).ok_or_else(|| {
            error!("Could not determine the type of network '{}'", name);
            LabforgeError::UnknownNetwork {
                network: name.to_string(),
            }
        })
    }

    /// Concrete name of generic network `name` for folder instance `instance`
    pub fn generic_name(&self, name: &str, instance: u64) -> String {
        format!(
            "{}{}{:0width$}",
            name,
            self.generic_infix,
            instance,
            width = self.padding
        )
    }

    /// Whether `candidate` is a derived name of the generic network `name`
    pub fn is_generic_instance_of(&self, candidate: &str, name: &str) -> bool {
        candidate
            .strip_prefix(name)
            .and_then(|rest| rest.strip_prefix(self.generic_infix.as_str()))
            .is_some_and(|index| !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()))
    }

    /// Resolve a network reference of a deployed service.
    ///
    /// Generic networks need the folder instance they are scoped to and are
    /// created on first use.
    pub async fn resolve(&self, name: &str, instance: Option<u64>) -> LabforgeResult<String> {
        match self.classify(name)? {
            NetworkCategory::Unique => Ok(name.to_string()),
            NetworkCategory::Generic => {
                let instance = instance.ok_or_else(|| {
                    error!("Generic network '{}' was referenced without an instance", name);
                    LabforgeError::MissingInstanceIndex {
                        network: name.to_string(),
                    }
                })?;
                let concrete = self.generic_name(name, instance);
                let config = self
                    .catalog
                    .get(NetworkCategory::Generic, name)
                    .cloned()
                    .unwrap_or_default();
                // Every derived network gets its own tag
                self.ensure_network(&concrete, &config, true, true).await?;
                Ok(concrete)
            }
            category => {
                error!("Network '{}' has unsupported type '{}'", name, category);
                Err(LabforgeError::UnsupportedNetworkType {
                    network: name.to_string(),
                    category: category.to_string(),
                })
            }
        }
    }

    /// Resolve a network reference of a Master VM: any catalogued network,
    /// by its declared name
    pub fn resolve_for_master(&self, name: &str) -> LabforgeResult<String> {
        self.classify(name).map(|_| name.to_string())
    }

    /// Realize every network declared in `category` on the network host.
    ///
    /// Returns the names of the networks created by this call. A network that
    /// cannot be realized is recorded in `report` as `networks.<category>.<name>`
    /// and the remaining networks are still attempted.
    pub async fn ensure_base_networks(
        &self,
        category: NetworkCategory,
        auto_create: bool,
        report: &mut ProvisionReport,
    ) -> LabforgeResult<Vec<String>> {
        let mut created = Vec::new();
        for (name, config) in self.catalog.entries(category) {
            match self.ensure_network(name, config, false, auto_create).await {
                Ok(true) => created.push(name.clone()),
                Ok(false) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("Could not create network '{}': {}", name, e);
                    report.skip(format!("networks.{}.{}", category, name), e.to_string());
                }
            }
        }
        Ok(created)
    }

    /// Make sure `name` exists, creating it if allowed. Returns whether it
    /// was created by this call.
    async fn ensure_network(
        &self,
        name: &str,
        config: &NetworkConfig,
        derived: bool,
        auto_create: bool,
    ) -> LabforgeResult<bool> {
        let mut state = self.state.lock().await;
        if state.table.contains(name) {
            return Ok(false);
        }

        if self.driver.network_exists(name).await? {
            info!("Network '{}' already exists on host '{}'", name, self.placement.host);
            state.table.register(name, NetworkOrigin::Existing);
            return Ok(false);
        }

        // Derived generic networks are always created
        if !derived && !auto_create {
            warn!(
                "Network '{}' does not exist on host '{}' and will not be created",
                name, self.placement.host
            );
            return Ok(false);
        }

        let vlan = match config.vlan {
            Some(vlan) if !derived => vlan,
            _ => self.allocate_vlan(&mut state).await?,
        };
        let spec = PortgroupSpec {
            name: name.to_string(),
            host: self.placement.host.clone(),
            promiscuous: false,
            vlan,
            vswitch: config
                .vswitch
                .clone()
                .unwrap_or_else(|| self.placement.vswitch.clone()),
        };
        self.driver.create_portgroup(&spec).await?;
        info!(
            "Created network '{}' on vswitch '{}' with VLAN {}",
            spec.name, spec.vswitch, spec.vlan
        );
        state.table.register(name, NetworkOrigin::Created);
        Ok(true)
    }

    async fn allocate_vlan(&self, state: &mut NetState) -> LabforgeResult<u16> {
        if !state.host_vlans_loaded {
            for tag in self.driver.vlans_in_use(&self.placement.host).await? {
                state.vlans.reserve(tag);
            }
            state.host_vlans_loaded = true;
        }
        state.vlans.allocate()
    }

    pub async fn created_networks(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let names: Vec<String> = state.table.created().map(str::to_string).collect();
        debug!("{} networks created so far", names.len());
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypervisor::{DriverCall, MockHypervisor};
    use crate::report::Phase;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    const CATALOG: &str = r#"
unique-networks:
  internet:
    vlan: 2001
generic-networks:
  team-lan:
    vswitch: vSwitch1
base-networks:
  mgmt:
    vlan: 99
  storage:
"#;

    fn setup() -> (Arc<MockHypervisor>, NetworkResolver) {
        let driver = Arc::new(MockHypervisor::new());
        driver.add_portgroup("internet", 2001, "vSwitch0").unwrap();
        let catalog: NetworkCatalog = serde_yaml::from_str(CATALOG).unwrap();
        let resolver = NetworkResolver::new(
            catalog,
            driver.clone(),
            &EngineConfig::default(),
            NetworkPlacement {
                host: "esxi-01".to_string(),
                vswitch: "vSwitch0".to_string(),
            },
        );
        (driver, resolver)
    }

    fn portgroups_created(driver: &MockHypervisor) -> Vec<(String, u16, String)> {
        driver
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                DriverCall::CreatePortgroup { name, vlan, vswitch } => Some((name, vlan, vswitch)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_unique_network_resolves_to_itself() {
        let (driver, resolver) = setup();
        assert_eq!(resolver.resolve("internet", Some(3)).await.unwrap(), "internet");
        assert_eq!(resolver.resolve("internet", None).await.unwrap(), "internet");
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_generic_network_created_once_per_instance() {
        let (driver, resolver) = setup();
        let first = resolver.resolve("team-lan", Some(1)).await.unwrap();
        let again = resolver.resolve("team-lan", Some(1)).await.unwrap();
        let second = resolver.resolve("team-lan", Some(2)).await.unwrap();

        assert_eq!(first, "team-lan-GENERIC-01");
        assert_eq!(again, first);
        assert_eq!(second, "team-lan-GENERIC-02");
        // 2001 is pinned by the catalog
        assert_eq!(
            portgroups_created(&driver),
            vec![
                ("team-lan-GENERIC-01".to_string(), 2000, "vSwitch1".to_string()),
                ("team-lan-GENERIC-02".to_string(), 2002, "vSwitch1".to_string()),
            ]
        );
        assert_eq!(resolver.created_networks().await, vec![first, second]);
    }

    #[tokio::test]
    async fn test_existing_generic_network_is_reused() {
        let (driver, resolver) = setup();
        driver.add_portgroup("team-lan-GENERIC-01", 3000, "vSwitch1").unwrap();

        resolver.resolve("team-lan", Some(1)).await.unwrap();
        assert!(portgroups_created(&driver).is_empty());
        assert!(resolver.state.lock().await.table.contains("team-lan-GENERIC-01"));
        assert!(resolver.created_networks().await.is_empty());
    }

    #[tokio::test]
    async fn test_tags_used_on_host_are_skipped() {
        let (driver, resolver) = setup();
        driver.add_portgroup("left-over", 2000, "vSwitch0").unwrap();

        resolver.resolve("team-lan", Some(1)).await.unwrap();
        assert_eq!(
            portgroups_created(&driver),
            vec![("team-lan-GENERIC-01".to_string(), 2002, "vSwitch1".to_string())]
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_resolution_errors() {
        let (_, resolver) = setup();
        assert!(matches!(
            resolver.resolve("team-lan", None).await,
            Err(LabforgeError::MissingInstanceIndex { .. })
        ));
        assert!(matches!(
            resolver.resolve("mgmt", Some(1)).await,
            Err(LabforgeError::UnsupportedNetworkType { .. })
        ));
        assert!(matches!(
            resolver.resolve("nowhere", Some(1)).await,
            Err(LabforgeError::UnknownNetwork { .. })
        ));
        assert!(logs_contain("Could not determine the type of network 'nowhere'"));
    }

    #[tokio::test]
    async fn test_master_resolution_accepts_every_category() {
        let (driver, resolver) = setup();
        assert_eq!(resolver.resolve_for_master("team-lan").unwrap(), "team-lan");
        assert_eq!(resolver.resolve_for_master("mgmt").unwrap(), "mgmt");
        assert!(resolver.resolve_for_master("nowhere").is_err());
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_base_networks() {
        let (driver, resolver) = setup();
        let mut report = ProvisionReport::new(Phase::Masters);
        let created = resolver
            .ensure_base_networks(NetworkCategory::Base, true, &mut report)
            .await
            .unwrap();
        assert_eq!(created, vec!["mgmt", "storage"]);
        assert_eq!(
            portgroups_created(&driver),
            vec![
                ("mgmt".to_string(), 99, "vSwitch0".to_string()),
                ("storage".to_string(), 2000, "vSwitch0".to_string()),
            ]
        );

        // Second pass finds everything in the table
        driver.clear_calls();
        let created = resolver
            .ensure_base_networks(NetworkCategory::Base, true, &mut report)
            .await
            .unwrap();
        assert!(created.is_empty());
        assert!(driver.calls().is_empty());
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_base_network_does_not_stop_the_others() {
        let (driver, resolver) = setup();
        driver.fail_on("create_portgroup", "mgmt");
        let mut report = ProvisionReport::new(Phase::Masters);

        let created = resolver
            .ensure_base_networks(NetworkCategory::Base, true, &mut report)
            .await
            .unwrap();
        assert_eq!(created, vec!["storage"]);
        assert!(report.was_skipped("networks.base-networks.mgmt"));
        assert!(logs_contain("Could not create network 'mgmt'"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_ensure_base_networks_without_auto_create() {
        let (driver, resolver) = setup();
        let mut report = ProvisionReport::new(Phase::Masters);
        let created = resolver
            .ensure_base_networks(NetworkCategory::Unique, false, &mut report)
            .await
            .unwrap();
        assert!(created.is_empty());
        assert!(logs_contain("Network 'internet' already exists"));

        resolver
            .ensure_base_networks(NetworkCategory::Base, false, &mut report)
            .await
            .unwrap();
        assert!(driver.calls().is_empty());
        assert!(logs_contain("will not be created"));
    }

    #[tokio::test]
    async fn test_concurrent_resolution_creates_once() {
        let (driver, resolver) = setup();
        let resolver = Arc::new(resolver);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve("team-lan", Some(1 + i % 2)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let created = portgroups_created(&driver);
        assert_eq!(created.len(), 2);
        assert_ne!(created[0].1, created[1].1);
    }

    #[test]
    fn test_generic_name_matching() {
        let (_, resolver) = setup();
        assert!(resolver.is_generic_instance_of("team-lan-GENERIC-07", "team-lan"));
        assert!(!resolver.is_generic_instance_of("team-lan-GENERIC-", "team-lan"));
        assert!(!resolver.is_generic_instance_of("team-lan", "team-lan"));
        assert!(!resolver.is_generic_instance_of("other-GENERIC-01", "team-lan"));
    }
}
