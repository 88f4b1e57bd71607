//! NIC reconciliation
//!
//! Brings a VM's network adapters in line with the ordered network list its
//! service instance declares: surplus adapters are removed from the top,
//! missing ones are added, and remaining slots are re-pointed where their
//! backing network differs. A VM that already matches is left untouched.

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::LabforgeResult;
use crate::hypervisor::{HypervisorDriver, NicModel, VmHandle};
use crate::network::NetworkResolver;

/// How network references are resolved for the VM being reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NicScope {
    /// A Master VM; networks keep their catalogued names
    Master,
    /// A deployed clone inside folder instance `n` (1-based)
    Instance(u64),
}

/// Changes made by one reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NicReport {
    pub added: usize,
    pub removed: usize,
    pub edited: usize,
    pub unchanged: usize,
}

impl NicReport {
    pub fn mutations(&self) -> usize {
        self.added + self.removed + self.edited
    }
}

pub struct NicReconciler {
    driver: Arc<dyn HypervisorDriver>,
    networks: Arc<NetworkResolver>,
}

impl NicReconciler {
    pub fn new(driver: Arc<dyn HypervisorDriver>, networks: Arc<NetworkResolver>) -> Self {
        Self { driver, networks }
    }

    async fn resolve(&self, network: &str, scope: NicScope) -> LabforgeResult<String> {
        match scope {
            NicScope::Master => self.networks.resolve_for_master(network),
            NicScope::Instance(instance) => self.networks.resolve(network, Some(instance)).await,
        }
    }

    /// Reconcile the NICs of `vm` against `declared`.
    ///
    /// Resolution and driver errors are returned as-is; NICs changed before
    /// the failure stay changed.
    pub async fn reconcile(
        &self,
        vm: &VmHandle,
        declared: &[String],
        scope: NicScope,
    ) -> LabforgeResult<NicReport> {
        let mut report = NicReport::default();
        let current = self.driver.list_nics(vm).await?.len();
        let target = declared.len();

        if current > target {
            for index in (target + 1..=current).rev() {
                debug!("Removing NIC {} from '{}'", index, vm.name);
                self.driver.delete_nic(vm, index).await?;
                report.removed += 1;
            }
        }

        let mut remaining: Vec<&String> = declared.iter().collect();
        if current < target {
            let model = NicModel::for_guest(self.driver.has_guest_tools(vm).await?);
            for _ in current..target {
                let Some(network) = remaining.pop() else {
                    break;
                };
                let resolved = self.resolve(network, scope).await?;
                debug!("Adding {} NIC on '{}' to '{}'", model, resolved, vm.name);
                self.driver.add_nic(vm, &resolved, model, &resolved).await?;
                report.added += 1;
            }
        }

        let nics = self.driver.list_nics(vm).await?;
        for (slot, network) in remaining.into_iter().enumerate() {
            let index = slot + 1;
            let resolved = self.resolve(network, scope).await?;
            let attached = nics
                .iter()
                .find(|nic| nic.index == index)
                .and_then(|nic| nic.network.as_deref());
            if attached == Some(resolved.as_str()) {
                report.unchanged += 1;
                continue;
            }
            debug!("Pointing NIC {} of '{}' at '{}'", index, vm.name, resolved);
            self.driver.edit_nic(vm, index, &resolved, &resolved).await?;
            report.edited += 1;
        }

        if report.mutations() > 0 {
            info!(
                "Reconciled NICs of '{}': {} added, {} removed, {} edited",
                vm.name, report.added, report.removed, report.edited
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::LabforgeError;
    use crate::hypervisor::{CloneSpec, DriverCall, MockHypervisor};
    use crate::network::NetworkPlacement;
    use crate::spec::NetworkCatalog;
    use pretty_assertions::assert_eq;

    const CATALOG: &str = r#"
unique-networks:
  internet:
  dmz:
generic-networks:
  team-lan:
"#;

    struct Fixture {
        driver: Arc<MockHypervisor>,
        reconciler: NicReconciler,
    }

    async fn fixture(template_networks: &[&str], guest_tools: bool) -> (Fixture, VmHandle) {
        let driver = Arc::new(MockHypervisor::new());
        for (i, name) in ["internet", "dmz", "team-lan"].iter().enumerate() {
            driver.add_portgroup(name, 10 + i as u16, "vSwitch0").unwrap();
        }
        let template = driver
            .add_template("Templates", "tmpl", guest_tools, template_networks)
            .unwrap();
        let root = driver.root_folder().await.unwrap();
        let vm = driver
            .clone_vm(&template, &root, "vm", &CloneSpec::default())
            .await
            .unwrap();
        driver.clear_calls();

        let catalog: NetworkCatalog = serde_yaml::from_str(CATALOG).unwrap();
        let networks = Arc::new(NetworkResolver::new(
            catalog,
            driver.clone(),
            &EngineConfig::default(),
            NetworkPlacement {
                host: "esxi-01".to_string(),
                vswitch: "vSwitch0".to_string(),
            },
        ));
        let reconciler = NicReconciler::new(driver.clone(), networks);
        (Fixture { driver, reconciler }, vm)
    }

    fn declared(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn attached(driver: &MockHypervisor, vm: &VmHandle) -> Vec<String> {
        driver
            .inventory()
            .list_nics(vm)
            .unwrap()
            .into_iter()
            .filter_map(|nic| nic.network)
            .collect()
    }

    #[tokio::test]
    async fn test_matching_vm_is_untouched() {
        let (f, vm) = fixture(&["internet", "dmz"], true).await;
        let report = f
            .reconciler
            .reconcile(&vm, &declared(&["internet", "dmz"]), NicScope::Master)
            .await
            .unwrap();
        assert_eq!(report.mutations(), 0);
        assert_eq!(report.unchanged, 2);
        assert!(f.driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_surplus_nics_removed_from_the_top() {
        let (f, vm) = fixture(&["internet", "dmz", "team-lan"], true).await;
        f.reconciler
            .reconcile(&vm, &declared(&["internet"]), NicScope::Master)
            .await
            .unwrap();

        let deletes: Vec<usize> = f
            .driver
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                DriverCall::DeleteNic { index, .. } => Some(index),
                _ => None,
            })
            .collect();
        assert_eq!(deletes, vec![3, 2]);
        assert_eq!(attached(&f.driver, &vm), vec!["internet"]);
    }

    #[tokio::test]
    async fn test_missing_nics_added_from_the_end_of_the_list() {
        let (f, vm) = fixture(&["dmz"], false).await;
        let report = f
            .reconciler
            .reconcile(&vm, &declared(&["internet", "dmz", "team-lan"]), NicScope::Master)
            .await
            .unwrap();

        assert_eq!(report.added, 2);
        // Slot 1 was on dmz and is re-pointed at the first declared network
        assert_eq!(report.edited, 1);
        assert_eq!(attached(&f.driver, &vm), vec!["internet", "team-lan", "dmz"]);
        assert!(f.driver.calls().iter().any(|call| matches!(
            call,
            DriverCall::AddNic { model: NicModel::E1000, .. }
        )));
    }

    #[tokio::test]
    async fn test_deployment_scope_uses_instance_networks() {
        let (f, vm) = fixture(&["internet", "team-lan"], true).await;
        let report = f
            .reconciler
            .reconcile(&vm, &declared(&["internet", "team-lan"]), NicScope::Instance(2))
            .await
            .unwrap();
        assert_eq!(report.edited, 1);
        assert_eq!(attached(&f.driver, &vm), vec!["internet", "team-lan-GENERIC-02"]);

        // A second pass changes nothing
        f.driver.clear_calls();
        let report = f
            .reconciler
            .reconcile(&vm, &declared(&["internet", "team-lan"]), NicScope::Instance(2))
            .await
            .unwrap();
        assert_eq!(report.mutations(), 0);
        assert!(f.driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_network_aborts_reconciliation() {
        let (f, vm) = fixture(&["internet"], true).await;
        let err = f
            .reconciler
            .reconcile(&vm, &declared(&["internet", "nowhere"]), NicScope::Master)
            .await
            .unwrap_err();
        assert!(matches!(err, LabforgeError::UnknownNetwork { .. }));
        assert!(f.driver.calls().iter().all(|call| !call.is_nic_change()));
    }
}
