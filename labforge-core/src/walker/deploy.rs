use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, error, info, warn};

use super::{soft, FolderTreeWalker, WalkPosition};
use crate::config::ObjectKind;
use crate::error::{LabforgeError, LabforgeResult};
use crate::hypervisor::{FolderHandle, InventoryItem};
use crate::nic::NicScope;
use crate::report::ProvisionReport;
use crate::spec::{BaseFolder, FolderNode, ParentFolder};

impl FolderTreeWalker {
    /// Instantiate `node` below `at`, cloning services from the Masters found
    /// under `master_root` at the mirrored path
    pub fn generate_deploy_tree<'a>(
        &'a self,
        node: &'a ParentFolder,
        at: WalkPosition,
        master_root: &'a FolderHandle,
        report: &'a mut ProvisionReport,
    ) -> BoxFuture<'a, LabforgeResult<()>> {
        async move {
            if !node.settings.enabled {
                warn!("Skipping disabled parent folder '{}'", at.path);
                report.skip(at.path.as_str(), "folder is disabled");
                return Ok(());
            }
            self.bind_groups(&at.path, &node.settings, report);

            for (name, child) in &node.children {
                let child_path = format!("{}/{}", at.path, name);
                if !child.is_enabled() {
                    warn!("Skipping disabled {} folder '{}'", child.kind(), name);
                    report.skip(child_path, "folder is disabled");
                    continue;
                }

                let Some(instances) = soft(
                    self.instances.resolve(
                        child.settings().instances.as_ref(),
                        name,
                        ObjectKind::Folder,
                    ),
                    &child_path,
                    report,
                )?
                else {
                    continue;
                };
                if instances.count == 0 {
                    info!("Folder '{}' has zero instances", name);
                    continue;
                }

                let child_master_path = self.master_path(&at.master_path, name);
                for index in 1..=instances.count {
                    let instance_name =
                        instances.instance_name(name, index, self.engine.instance_padding);
                    let instance_path = format!("{}/{}", at.path, instance_name);

                    let Some(folder) = soft(
                        self.driver.create_folder(&instance_name, &at.folder).await,
                        &instance_path,
                        report,
                    )?
                    else {
                        continue;
                    };
                    report.folders_created.push(instance_path.clone());

                    let position = WalkPosition {
                        folder,
                        path: instance_path,
                        master_path: child_master_path.clone(),
                    };
                    match child {
                        FolderNode::Base(base) => {
                            info!("Generating services for base folder instance '{}'", instance_name);
                            self.deploy_services(base, &position, index, master_root, report)
                                .await?;
                        }
                        FolderNode::Parent(parent) => {
                            info!("Generating parent folder instance '{}'", instance_name);
                            self.generate_deploy_tree(parent, position, master_root, report)
                                .await?;
                        }
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Clone the services of one base folder instance. Generic networks are
    /// scoped to `folder_instance`, shared by every service in the folder.
    async fn deploy_services(
        &self,
        base: &BaseFolder,
        at: &WalkPosition,
        folder_instance: u64,
        master_root: &FolderHandle,
        report: &mut ProvisionReport,
    ) -> LabforgeResult<()> {
        self.bind_groups(&at.path, &base.settings, report);

        for (entry, service) in &base.services {
            if !self.spec.is_hypervisor_managed(&service.service_ref) {
                debug!("Skipping non-hypervisor service '{}'", entry);
                continue;
            }
            let service_path = format!("{}/{}", at.path, entry);
            info!("Generating service '{}' in folder '{}'", entry, at.folder.name);

            let Some(instances) = soft(
                self.instances
                    .resolve(service.instances.as_ref(), entry, ObjectKind::Service),
                &service_path,
                report,
            )?
            else {
                continue;
            };
            if instances.count == 0 {
                info!("Service '{}' has zero instances", entry);
                continue;
            }

            let lookup = self.master_path(&at.master_path, entry);
            report.master_lookups.push(lookup.clone());
            let master = match self.driver.find_by_path(master_root, &lookup).await {
                Ok(Some(InventoryItem::Vm(vm))) => vm,
                Ok(_) => {
                    error!(
                        "Could not find Master instance for service '{}' at '{}'",
                        entry, lookup
                    );
                    report.skip(
                        service_path,
                        LabforgeError::not_found(format!("Master '{}'", lookup)).to_string(),
                    );
                    continue;
                }
                Err(e) => {
                    soft::<()>(Err(e), &service_path, report)?;
                    continue;
                }
            };

            for index in 1..=instances.count {
                let vm_name =
                    instances.service_instance_name(entry, index, self.engine.instance_padding);
                let vm_path = format!("{}/{}", at.path, vm_name);

                let Some(vm) = soft(
                    self.driver
                        .clone_vm(&master, &at.folder, &vm_name, &self.clone_spec)
                        .await,
                    &vm_path,
                    report,
                )?
                else {
                    continue;
                };
                report.vms_cloned.push(vm_path.clone());

                soft(
                    self.nics
                        .reconcile(&vm, &service.networks, NicScope::Instance(folder_instance))
                        .await,
                    &vm_path,
                    report,
                )?;
            }
        }
        Ok(())
    }
}
