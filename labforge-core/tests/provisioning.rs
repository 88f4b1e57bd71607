//! End-to-end runs of the engine against the in-memory hypervisor

use labforge_core::hypervisor::{DriverCall, HypervisorDriver, InventoryItem};
use labforge_core::nic::{NicReconciler, NicScope};
use labforge_core::test_helpers::{
    child_names, connect, connect_with, nic_networks, seeded_hypervisor, test_config,
    TEAM_EXERCISE,
};
use labforge_core::LabforgeError;
use pretty_assertions::assert_eq;
use tracing_test::traced_test;

#[tokio::test]
async fn test_team_scenario_end_to_end() {
    let driver = seeded_hypervisor();
    let env = connect(TEAM_EXERCISE, driver.clone()).await.unwrap();

    let masters = env.create_masters().await.unwrap();
    assert_eq!(masters.vms_cloned, vec!["/(MASTER) Team/(MASTER) web"]);
    assert_eq!(masters.networks_created, vec!["internet", "team-lan"]);
    assert!(masters.skipped.is_empty());
    let master_nics = nic_networks(
        driver.as_ref(),
        "Team Exercise/MASTER-FOLDERS/(MASTER) Team/(MASTER) web",
    )
    .await
    .unwrap();
    assert_eq!(master_nics.len(), 2);

    let deployed = env.deploy_environment().await.unwrap();
    let conversion = deployed.conversion.clone().unwrap();
    assert_eq!(conversion.converted, vec!["/(MASTER) Team/(MASTER) web"]);
    assert_eq!(
        deployed.folders_created,
        vec!["/T-01", "/T-02", "/T-03"]
    );
    assert_eq!(
        deployed.vms_cloned,
        vec!["/T-01/web", "/T-02/web", "/T-03/web"]
    );
    assert_eq!(
        deployed.networks_created,
        vec![
            "team-lan-GENERIC-01",
            "team-lan-GENERIC-02",
            "team-lan-GENERIC-03"
        ]
    );

    for team in 1..=3 {
        let nics = nic_networks(driver.as_ref(), &format!("Team Exercise/T-{:02}/web", team))
            .await
            .unwrap();
        assert_eq!(
            nics,
            vec!["internet".to_string(), format!("team-lan-GENERIC-{:02}", team)]
        );
    }

    // Each per-team network was created exactly once
    let created: Vec<String> = driver
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            DriverCall::CreatePortgroup { name, .. } => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(
        created,
        vec![
            "internet",
            "team-lan",
            "team-lan-GENERIC-01",
            "team-lan-GENERIC-02",
            "team-lan-GENERIC-03"
        ]
    );
    let inventory = driver.inventory();
    let vlans: Vec<u16> = created
        .iter()
        .filter_map(|name| inventory.portgroup(name).map(|pg| pg.vlan))
        .collect();
    assert_eq!(vlans, vec![2000, 2001, 2002, 2003, 2004]);
}

#[tokio::test]
async fn test_foreign_service_is_never_touched() {
    let driver = seeded_hypervisor();
    let env = connect(TEAM_EXERCISE, driver.clone()).await.unwrap();
    let masters = env.create_masters().await.unwrap();
    let deployed = env.deploy_environment().await.unwrap();

    for report in [&masters, &deployed] {
        assert!(report.vms_cloned.iter().all(|p| !p.contains("board")));
        assert!(report.skipped.iter().all(|s| !s.path.contains("board")));
    }
    assert!(driver.calls().iter().all(|call| !call.target().contains("board")));
    assert_eq!(child_names(driver.as_ref(), "Team Exercise/T-02").await, vec!["web"]);
}

#[tokio::test]
async fn test_redeploy_reconciles_nothing() {
    let driver = seeded_hypervisor();
    let env = connect(TEAM_EXERCISE, driver.clone()).await.unwrap();
    env.create_masters().await.unwrap();
    env.deploy_environment().await.unwrap();
    driver.clear_calls();

    let reconciler = NicReconciler::new(driver.clone(), env.networks().clone());
    let root = driver.root_folder().await.unwrap();
    let vm = driver
        .find_by_path(&root, "Team Exercise/T-02/web")
        .await
        .unwrap()
        .and_then(InventoryItem::into_vm)
        .unwrap();
    let declared = vec!["internet".to_string(), "team-lan".to_string()];

    let report = reconciler
        .reconcile(&vm, &declared, NicScope::Instance(2))
        .await
        .unwrap();
    assert_eq!(report.mutations(), 0);
    assert_eq!(report.unchanged, 2);
    assert!(driver.calls().is_empty());
}

#[tokio::test]
async fn test_zero_service_instances() {
    const SPEC: &str = r#"
metadata:
  name: Quiet
services:
  web:
    template: web-tmpl
networks:
  unique-networks:
    internet:
folders:
  Lab:
    services:
      web:
        service: web
        networks: [internet]
        instances: 0
"#;
    let driver = seeded_hypervisor();
    let env = connect(SPEC, driver.clone()).await.unwrap();
    env.create_masters().await.unwrap();

    let deployed = env.deploy_environment().await.unwrap();
    assert_eq!(deployed.folders_created, vec!["/Lab"]);
    assert!(deployed.vms_cloned.is_empty());
    assert!(deployed.skipped.is_empty());
    assert!(child_names(driver.as_ref(), "Quiet/Lab").await.is_empty());
}

#[tokio::test]
async fn test_nested_paths_mirror_master_paths() {
    const SPEC: &str = r#"
metadata:
  name: Nested
services:
  web:
    template: web-tmpl
  db:
    template: db-tmpl
networks:
  unique-networks:
    internet:
  generic-networks:
    lan:
folders:
  Red:
    Blue:
      instances:
        prefix: "B"
        number: 2
      Web:
        services:
          web:
            service: web
            networks: [internet, lan]
          db:
            service: db
            networks: [lan]
            instances: 2
"#;
    let driver = seeded_hypervisor();
    let env = connect(SPEC, driver.clone()).await.unwrap();

    let masters = env.create_masters().await.unwrap();
    assert_eq!(
        masters.vms_cloned,
        vec![
            "/(MASTER) Red/(MASTER) Blue/(MASTER) Web/(MASTER) web",
            "/(MASTER) Red/(MASTER) Blue/(MASTER) Web/(MASTER) db"
        ]
    );

    let deployed = env.deploy_environment().await.unwrap();
    for lookup in &deployed.master_lookups {
        assert!(masters.vms_cloned.contains(lookup), "no Master at {}", lookup);
    }
    assert_eq!(deployed.master_lookups.len(), 4);
    assert_eq!(
        deployed.vms_cloned,
        vec![
            "/Red/B01/Web/web",
            "/Red/B01/Web/db 01",
            "/Red/B01/Web/db 02",
            "/Red/B02/Web/web",
            "/Red/B02/Web/db 01",
            "/Red/B02/Web/db 02"
        ]
    );

    // Generic segments follow the instance index of the base folder itself,
    // shared by every service inside it
    let web = nic_networks(driver.as_ref(), "Nested/Red/B02/Web/web").await.unwrap();
    let db = nic_networks(driver.as_ref(), "Nested/Red/B02/Web/db 02").await.unwrap();
    assert_eq!(web, vec!["internet", "lan-GENERIC-01"]);
    assert_eq!(db, vec!["lan-GENERIC-01"]);
}

#[tokio::test]
async fn test_threshold_violation_aborts_deployment() {
    let driver = seeded_hypervisor();
    let spec = TEAM_EXERCISE.replace("number: 3", "number: 51");
    let env = connect(&spec, driver.clone()).await.unwrap();
    env.create_masters().await.unwrap();

    let err = env.deploy_environment().await.unwrap_err();
    assert!(matches!(err, LabforgeError::ThresholdExceeded { count: 51, limit: 50, .. }));
    assert!(err.is_fatal());
    assert!(child_names(driver.as_ref(), "Team Exercise")
        .await
        .iter()
        .all(|name| !name.starts_with("T-")));
}

#[tokio::test]
#[traced_test]
async fn test_failed_folder_does_not_stop_siblings() {
    let driver = seeded_hypervisor();
    let env = connect(TEAM_EXERCISE, driver.clone()).await.unwrap();
    env.create_masters().await.unwrap();
    driver.fail_on("create_folder", "T-02");

    let deployed = env.deploy_environment().await.unwrap();
    assert!(deployed.was_skipped("/T-02"));
    assert_eq!(deployed.vms_cloned, vec!["/T-01/web", "/T-03/web"]);
    assert!(logs_contain("Skipping '/T-02'"));
}

#[tokio::test]
#[traced_test]
async fn test_missing_master_skips_service() {
    let driver = seeded_hypervisor();
    let env = connect(TEAM_EXERCISE, driver.clone()).await.unwrap();
    driver.fail_on("clone_vm", "(MASTER) web");
    let masters = env.create_masters().await.unwrap();
    assert!(masters.was_skipped("/(MASTER) Team/(MASTER) web"));

    let deployed = env.deploy_environment().await.unwrap();
    assert!(deployed.vms_cloned.is_empty());
    assert_eq!(deployed.skipped.len(), 3);
    assert!(logs_contain("Could not find Master instance for service 'web'"));
}

#[tokio::test]
#[traced_test]
async fn test_failed_network_does_not_abort_masters() {
    let driver = seeded_hypervisor();
    driver.fail_on("create_portgroup", "team-lan");
    let env = connect(TEAM_EXERCISE, driver.clone()).await.unwrap();

    let masters = env.create_masters().await.unwrap();
    assert_eq!(masters.networks_created, vec!["internet"]);
    assert!(masters.was_skipped("networks.generic-networks.team-lan"));
    assert_eq!(masters.folders_created, vec!["/(MASTER) Team"]);
    assert!(logs_contain("Could not create network 'team-lan'"));
}

#[tokio::test]
#[traced_test]
async fn test_group_bindings_are_resolved() {
    let driver = seeded_hypervisor();
    let spec = format!(
        "groups:\n  Players:\n    user-list: [alice, bob]\n{}",
        TEAM_EXERCISE.replace("  Team:\n", "  Team:\n    group: Players\n    master-group: Admins\n")
    );
    let env = connect(&spec, driver.clone()).await.unwrap();

    let masters = env.create_masters().await.unwrap();
    assert_eq!(masters.group_bindings.len(), 1);
    assert_eq!(masters.group_bindings[0].master_group.as_deref(), Some("Admins"));
    assert!(logs_contain("bound to unknown group 'Admins'"));

    let deployed = env.deploy_environment().await.unwrap();
    assert_eq!(deployed.group_bindings.len(), 3);
    assert!(logs_contain("Folder '/T-01' is bound to group 'Players'"));
    assert!(!logs_contain("unknown group 'Players'"));
}

#[tokio::test]
async fn test_disabled_folder_is_left_alone() {
    let driver = seeded_hypervisor();
    let spec = TEAM_EXERCISE.replace("  Team:\n", "  Team:\n    enabled: false\n");
    let env = connect(&spec, driver.clone()).await.unwrap();

    let masters = env.create_masters().await.unwrap();
    assert!(masters.vms_cloned.is_empty());
    assert!(masters.was_skipped("/(MASTER) Team"));
    assert!(child_names(driver.as_ref(), "Team Exercise/MASTER-FOLDERS")
        .await
        .is_empty());
}

#[tokio::test]
async fn test_cleanup_environment_then_masters() {
    let driver = seeded_hypervisor();
    let env = connect(TEAM_EXERCISE, driver.clone()).await.unwrap();
    env.create_masters().await.unwrap();
    env.deploy_environment().await.unwrap();

    let cleaned = env.cleanup_environment(true).await.unwrap();
    assert_eq!(cleaned.vms_destroyed, vec!["/T-01/web", "/T-02/web", "/T-03/web"]);
    assert_eq!(cleaned.folders_destroyed, vec!["/T-01", "/T-02", "/T-03"]);
    assert_eq!(
        cleaned.networks_deleted,
        vec![
            "team-lan-GENERIC-01",
            "team-lan-GENERIC-02",
            "team-lan-GENERIC-03"
        ]
    );
    // Masters survive an environment cleanup
    assert_eq!(
        child_names(driver.as_ref(), "Team Exercise").await,
        vec!["MASTER-FOLDERS"]
    );

    let cleaned = env.cleanup_masters(true).await.unwrap();
    assert_eq!(cleaned.vms_destroyed, vec!["/(MASTER) Team/(MASTER) web"]);
    assert_eq!(
        cleaned.folders_destroyed,
        vec!["/(MASTER) Team", "/MASTER-FOLDERS"]
    );
    assert_eq!(cleaned.networks_deleted, vec!["internet", "team-lan"]);
    assert!(cleaned.failures.is_empty());
    assert!(child_names(driver.as_ref(), "Team Exercise").await.is_empty());
    assert!(driver.inventory().portgroup("internet").is_none());
}

#[tokio::test]
async fn test_existing_networks_are_reused() {
    let driver = seeded_hypervisor();
    driver.add_portgroup("internet", 10, "vSwitch0").unwrap();
    driver.add_portgroup("team-lan-GENERIC-02", 300, "vSwitch0").unwrap();
    let mut config = test_config();
    config.engine.vlans.start = 3000;
    let env = connect_with(TEAM_EXERCISE, driver.clone(), config).await.unwrap();

    let masters = env.create_masters().await.unwrap();
    assert_eq!(masters.networks_created, vec!["team-lan"]);
    let deployed = env.deploy_environment().await.unwrap();
    assert_eq!(
        deployed.networks_created,
        vec!["team-lan-GENERIC-01", "team-lan-GENERIC-03"]
    );

    let inventory = driver.inventory();
    assert_eq!(inventory.portgroup("team-lan").map(|pg| pg.vlan), Some(3000));
    assert_eq!(inventory.portgroup("team-lan-GENERIC-02").map(|pg| pg.vlan), Some(300));
    assert_eq!(inventory.portgroup("team-lan-GENERIC-03").map(|pg| pg.vlan), Some(3002));
}
