// ABOUTME: Virtual-machine backend (virtualization B)
// ABOUTME: Virtual disks feeding a managed virtual machine object

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use sandpit_api::workloads::BLOCK_DEVICE_KIND_VIRTUAL_DISK;
use sandpit_api::{
    controller_ref, Api, ObjectMeta, RawStore, ReadyReason, Resource, Sandbox, TemplateSpec,
    VirtualDisk, VirtualMachine, VmPhase, LABEL_SANDBOX_UID,
};
use tracing::info;

use super::machine::join_condition_messages;
use super::{ReadyAssessment, Sandboxer};
use crate::error::ControllerError;
use crate::gates::{Feature, FeatureGates};
use crate::naming;
use crate::provision::{make_disks, OwnedStorage};

pub struct VirtualMachineBackend {
    machines: Api<VirtualMachine>,
    disks: OwnedStorage<VirtualDisk>,
    gates: FeatureGates,
}

impl VirtualMachineBackend {
    pub fn new(store: Arc<dyn RawStore>, gates: FeatureGates) -> Self {
        Self {
            machines: Api::new(store.clone()),
            disks: OwnedStorage::new(Api::new(store)),
            gates,
        }
    }

    fn ensure_enabled(&self) -> Result<(), ControllerError> {
        if !self.gates.enabled(Feature::VirtualMachine) {
            return Err(ControllerError::FeatureDisabled(Feature::VirtualMachine));
        }
        Ok(())
    }

    async fn get_machine(
        &self,
        sandbox: &Sandbox,
    ) -> Result<Option<VirtualMachine>, ControllerError> {
        Ok(self
            .machines
            .try_get(&sandbox.metadata.namespace, &sandbox.compute_name())
            .await?)
    }
}

#[async_trait]
impl Sandboxer for VirtualMachineBackend {
    async fn create(
        &self,
        sandbox: &Sandbox,
        template_spec: &TemplateSpec,
    ) -> Result<(), ControllerError> {
        self.ensure_enabled()?;

        let disks = make_disks(sandbox, template_spec);
        let disk_names: HashSet<String> = disks.iter().map(|d| d.metadata.name.clone()).collect();
        self.disks.create_missing(sandbox, disks).await?;

        if let Some(machine) = self.get_machine(sandbox).await? {
            if phase_reason(machine.status.phase) != ReadyReason::Failed {
                return Ok(());
            }
            info!(name = %machine.metadata.name, "Virtual machine failed, deleting for recreation");
            return self
                .machines
                .delete_tolerant(&machine.metadata.namespace, &machine.metadata.name)
                .await
                .map_err(|err| {
                    ControllerError::operation(
                        "delete",
                        VirtualMachine::KIND,
                        machine.metadata.name.clone(),
                        err,
                    )
                });
        }

        if let Some(spec) = &template_spec.virtual_machine {
            let mut machine = new_machine(sandbox, spec.clone());
            alias_block_devices(sandbox, &mut machine, &disk_names);
            let name = machine.metadata.name.clone();
            self.machines.create(&machine).await.map_err(|err| {
                ControllerError::operation("create", VirtualMachine::KIND, name, err)
            })?;
        }

        Ok(())
    }

    async fn delete(&self, sandbox: &Sandbox) -> Result<(), ControllerError> {
        self.ensure_enabled()?;

        if let Some(machine) = self.get_machine(sandbox).await? {
            self.machines
                .delete_tolerant(&machine.metadata.namespace, &machine.metadata.name)
                .await
                .map_err(|err| {
                    ControllerError::operation(
                        "delete",
                        VirtualMachine::KIND,
                        machine.metadata.name.clone(),
                        err,
                    )
                })?;
        }
        self.disks.delete_owned(sandbox).await
    }

    async fn status(&self, sandbox: &Sandbox) -> Result<ReadyAssessment, ControllerError> {
        self.ensure_enabled()?;

        let Some(machine) = self.get_machine(sandbox).await? else {
            return Ok(ReadyAssessment::pending());
        };

        let reason = phase_reason(machine.status.phase);
        let message = if reason == ReadyReason::Failed {
            join_condition_messages(&machine.status.conditions)
        } else {
            String::new()
        };
        Ok(ReadyAssessment::from_reason(reason, message))
    }
}

fn new_machine(
    sandbox: &Sandbox,
    spec: sandpit_api::workloads::VirtualMachineSpec,
) -> VirtualMachine {
    let mut meta = ObjectMeta::named(sandbox.compute_name(), sandbox.metadata.namespace.clone());
    meta.owner_references = vec![controller_ref(sandbox)];
    meta.labels
        .insert(LABEL_SANDBOX_UID.to_string(), sandbox.metadata.uid.clone());
    VirtualMachine {
        metadata: meta,
        spec,
        status: Default::default(),
    }
}

/// Rewrites virtual-disk block device references to their deterministic full
/// names. Other device kinds and unmatched names stay untouched.
fn alias_block_devices(
    sandbox: &Sandbox,
    machine: &mut VirtualMachine,
    created_disks: &HashSet<String>,
) {
    for device in &mut machine.spec.block_device_refs {
        if device.kind != BLOCK_DEVICE_KIND_VIRTUAL_DISK {
            continue;
        }
        let full = naming::disk_name(sandbox, &device.name);
        if created_disks.contains(&full) {
            device.name = full;
        }
    }
}

/// Total phase-to-reason mapping for virtual machines.
pub(crate) fn phase_reason(phase: VmPhase) -> ReadyReason {
    match phase {
        VmPhase::Pending => ReadyReason::Pending,
        VmPhase::Starting => ReadyReason::Pending,
        VmPhase::Migrating => ReadyReason::Pending,
        VmPhase::Running => ReadyReason::Ready,
        VmPhase::Paused => ReadyReason::Failed,
        VmPhase::Stopping => ReadyReason::Failed,
        VmPhase::Stopped => ReadyReason::Failed,
        VmPhase::Terminating => ReadyReason::Failed,
        VmPhase::Degraded => ReadyReason::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandpit_api::workloads::{BlockDeviceRef, VirtualMachineSpec};

    fn sandbox() -> Sandbox {
        let mut sb = Sandbox {
            metadata: ObjectMeta::named("s1", "default"),
            ..Default::default()
        };
        sb.metadata.uid = "uid-1".to_string();
        sb
    }

    #[test]
    fn test_phase_reason_table() {
        for phase in [VmPhase::Pending, VmPhase::Starting, VmPhase::Migrating] {
            assert_eq!(phase_reason(phase), ReadyReason::Pending);
        }
        assert_eq!(phase_reason(VmPhase::Running), ReadyReason::Ready);
        for phase in [
            VmPhase::Paused,
            VmPhase::Stopping,
            VmPhase::Stopped,
            VmPhase::Terminating,
            VmPhase::Degraded,
        ] {
            assert_eq!(phase_reason(phase), ReadyReason::Failed);
        }
    }

    #[test]
    fn test_aliasing_skips_other_device_kinds() {
        let sb = sandbox();
        let full = naming::disk_name(&sb, "root");
        let created: HashSet<String> = [full.clone()].into_iter().collect();

        let mut machine = new_machine(
            &sb,
            VirtualMachineSpec {
                block_device_refs: vec![
                    BlockDeviceRef {
                        kind: BLOCK_DEVICE_KIND_VIRTUAL_DISK.to_string(),
                        name: "root".to_string(),
                    },
                    BlockDeviceRef {
                        kind: "ClusterImage".to_string(),
                        name: "root".to_string(),
                    },
                ],
            },
        );

        alias_block_devices(&sb, &mut machine, &created);
        assert_eq!(machine.spec.block_device_refs[0].name, full);
        assert_eq!(machine.spec.block_device_refs[1].name, "root");

        let snapshot = machine.clone();
        alias_block_devices(&sb, &mut machine, &created);
        assert_eq!(machine, snapshot);
    }
}
