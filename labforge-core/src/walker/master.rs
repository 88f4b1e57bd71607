use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, error, info, warn};

use super::{soft, FolderTreeWalker, WalkPosition};
use crate::error::{LabforgeError, LabforgeResult};
use crate::hypervisor::{FolderHandle, InventoryItem, VmHandle};
use crate::nic::NicScope;
use crate::report::ProvisionReport;
use crate::spec::{BaseFolder, FolderNode, ParentFolder};

impl FolderTreeWalker {
    /// Mirror `node` below `at`, mastering every base folder found.
    ///
    /// `templates` is the folder service templates are looked up in.
    pub fn generate_master_tree<'a>(
        &'a self,
        node: &'a ParentFolder,
        at: WalkPosition,
        templates: &'a FolderHandle,
        report: &'a mut ProvisionReport,
    ) -> BoxFuture<'a, LabforgeResult<()>> {
        async move {
            if !node.settings.enabled {
                warn!("Skipping disabled parent folder '{}'", display(&at.master_path));
                report.skip(at.master_path.as_str(), "folder is disabled");
                return Ok(());
            }
            self.bind_groups(display(&at.master_path), &node.settings, report);

            for (name, child) in &node.children {
                let child_path = self.master_path(&at.master_path, name);
                if !child.is_enabled() {
                    warn!("Skipping disabled {} folder '{}'", child.kind(), name);
                    report.skip(child_path, "folder is disabled");
                    continue;
                }

                let folder_name = self.master_name(name);
                let Some(folder) = soft(
                    self.driver.create_folder(&folder_name, &at.folder).await,
                    &child_path,
                    report,
                )?
                else {
                    continue;
                };
                report.folders_created.push(child_path.clone());

                let position = WalkPosition {
                    folder,
                    path: child_path.clone(),
                    master_path: child_path,
                };
                match child {
                    FolderNode::Base(base) => {
                        info!("Generating Master base folder '{}'", name);
                        self.master_base_folder(base, &position, templates, report)
                            .await?;
                    }
                    FolderNode::Parent(parent) => {
                        info!("Generating Master parent folder '{}'", name);
                        self.generate_master_tree(parent, position, templates, report)
                            .await?;
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }

    async fn master_base_folder(
        &self,
        base: &BaseFolder,
        at: &WalkPosition,
        templates: &FolderHandle,
        report: &mut ProvisionReport,
    ) -> LabforgeResult<()> {
        self.bind_groups(&at.master_path, &base.settings, report);

        for (entry, instance) in &base.services {
            if !self.spec.is_hypervisor_managed(&instance.service_ref) {
                debug!("Skipping non-hypervisor service '{}'", entry);
                continue;
            }
            let vm_path = self.master_path(&at.master_path, entry);
            info!(
                "Creating Master instance '{}' from service '{}'",
                entry, instance.service_ref
            );

            let Some(template) = soft(
                self.find_template(&instance.service_ref, templates).await,
                &vm_path,
                report,
            )?
            else {
                continue;
            };

            let vm_name = self.master_name(entry);
            let Some(vm) = soft(
                self.driver
                    .clone_vm(&template, &at.folder, &vm_name, &self.clone_spec)
                    .await,
                &vm_path,
                report,
            )?
            else {
                error!(
                    "Failed to create Master instance '{}' in folder '{}'",
                    entry, at.folder.name
                );
                continue;
            };
            report.vms_cloned.push(vm_path.clone());

            if let Some(note) = self
                .spec
                .service(&instance.service_ref)
                .and_then(|s| s.note.as_deref())
            {
                if soft(self.driver.set_note(&vm, note).await, &vm_path, report)?.is_none() {
                    continue;
                }
            }

            if soft(
                self.nics
                    .reconcile(&vm, &instance.networks, NicScope::Master)
                    .await,
                &vm_path,
                report,
            )?
            .is_none()
            {
                continue;
            }

            let snapshots = &self.engine.snapshots;
            soft(
                self.driver
                    .create_snapshot(&vm, &snapshots.mastering, &snapshots.mastering_description)
                    .await,
                &vm_path,
                report,
            )?;
        }
        Ok(())
    }

    async fn find_template(
        &self,
        service_ref: &str,
        templates: &FolderHandle,
    ) -> LabforgeResult<VmHandle> {
        let template_ref = self
            .spec
            .service(service_ref)
            .and_then(|s| s.template_ref.as_deref())
            .ok_or_else(|| LabforgeError::not_found(format!("template of service '{}'", service_ref)))?;

        match self.driver.find_by_path(templates, template_ref).await? {
            Some(InventoryItem::Vm(vm)) => Ok(vm),
            _ => {
                error!(
                    "Could not find template '{}' for service '{}'",
                    template_ref, service_ref
                );
                Err(LabforgeError::not_found(format!(
                    "template '{}' in folder '{}'",
                    template_ref, templates.name
                )))
            }
        }
    }
}

fn display(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}
