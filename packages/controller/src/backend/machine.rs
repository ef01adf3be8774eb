// ABOUTME: Machine-instance backend (virtualization A)
// ABOUTME: Import volumes plus storage claims feeding a machine instance object

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use sandpit_api::{
    controller_ref, Api, ImportVolume, MachineInstance, MachinePhase, ObjectMeta, RawStore,
    ReadyReason, Resource, Sandbox, StorageClaim, TemplateSpec, LABEL_SANDBOX_UID,
};
use tracing::info;

use super::{ReadyAssessment, Sandboxer};
use crate::error::ControllerError;
use crate::gates::{Feature, FeatureGates};
use crate::naming;
use crate::provision::{make_claims, make_imports, OwnedStorage};

pub struct MachineInstanceBackend {
    instances: Api<MachineInstance>,
    imports: OwnedStorage<ImportVolume>,
    claims: OwnedStorage<StorageClaim>,
    gates: FeatureGates,
}

impl MachineInstanceBackend {
    pub fn new(store: Arc<dyn RawStore>, gates: FeatureGates) -> Self {
        Self {
            instances: Api::new(store.clone()),
            imports: OwnedStorage::new(Api::new(store.clone())),
            claims: OwnedStorage::new(Api::new(store)),
            gates,
        }
    }

    fn ensure_enabled(&self) -> Result<(), ControllerError> {
        if !self.gates.enabled(Feature::MachineInstance) {
            return Err(ControllerError::FeatureDisabled(Feature::MachineInstance));
        }
        Ok(())
    }

    async fn get_instance(
        &self,
        sandbox: &Sandbox,
    ) -> Result<Option<MachineInstance>, ControllerError> {
        Ok(self
            .instances
            .try_get(&sandbox.metadata.namespace, &sandbox.compute_name())
            .await?)
    }
}

#[async_trait]
impl Sandboxer for MachineInstanceBackend {
    async fn create(
        &self,
        sandbox: &Sandbox,
        template_spec: &TemplateSpec,
    ) -> Result<(), ControllerError> {
        self.ensure_enabled()?;

        let imports = make_imports(sandbox, template_spec);
        let import_names: HashSet<String> =
            imports.iter().map(|v| v.metadata.name.clone()).collect();
        self.imports.create_missing(sandbox, imports).await?;

        let claims = make_claims(sandbox, template_spec);
        let claim_names: HashSet<String> =
            claims.iter().map(|c| c.metadata.name.clone()).collect();
        self.claims.create_missing(sandbox, claims).await?;

        if let Some(instance) = self.get_instance(sandbox).await? {
            if phase_reason(instance.status.phase) != ReadyReason::Failed {
                return Ok(());
            }
            info!(name = %instance.metadata.name, "Machine instance failed, deleting for recreation");
            return self
                .instances
                .delete_tolerant(&instance.metadata.namespace, &instance.metadata.name)
                .await
                .map_err(|err| {
                    ControllerError::operation(
                        "delete",
                        MachineInstance::KIND,
                        instance.metadata.name.clone(),
                        err,
                    )
                });
        }

        if let Some(spec) = &template_spec.machine_instance {
            let mut instance = new_instance(sandbox, spec.clone());
            alias_instance_volumes(sandbox, &mut instance, &import_names, &claim_names);
            let name = instance.metadata.name.clone();
            self.instances.create(&instance).await.map_err(|err| {
                ControllerError::operation("create", MachineInstance::KIND, name, err)
            })?;
        }

        Ok(())
    }

    async fn delete(&self, sandbox: &Sandbox) -> Result<(), ControllerError> {
        self.ensure_enabled()?;

        if let Some(instance) = self.get_instance(sandbox).await? {
            self.instances
                .delete_tolerant(&instance.metadata.namespace, &instance.metadata.name)
                .await
                .map_err(|err| {
                    ControllerError::operation(
                        "delete",
                        MachineInstance::KIND,
                        instance.metadata.name.clone(),
                        err,
                    )
                })?;
        }
        self.imports.delete_owned(sandbox).await?;
        self.claims.delete_owned(sandbox).await
    }

    async fn status(&self, sandbox: &Sandbox) -> Result<ReadyAssessment, ControllerError> {
        self.ensure_enabled()?;

        let Some(instance) = self.get_instance(sandbox).await? else {
            return Ok(ReadyAssessment::pending());
        };

        let reason = phase_reason(instance.status.phase);
        let message = if reason == ReadyReason::Failed {
            join_condition_messages(&instance.status.conditions)
        } else {
            String::new()
        };
        Ok(ReadyAssessment::from_reason(reason, message))
    }
}

pub(crate) fn join_condition_messages(conditions: &[sandpit_api::Condition]) -> String {
    conditions
        .iter()
        .filter(|c| !c.message.is_empty())
        .map(|c| c.message.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn new_instance(
    sandbox: &Sandbox,
    spec: sandpit_api::workloads::MachineInstanceSpec,
) -> MachineInstance {
    let mut meta = ObjectMeta::named(sandbox.compute_name(), sandbox.metadata.namespace.clone());
    meta.owner_references = vec![controller_ref(sandbox)];
    meta.labels
        .insert(LABEL_SANDBOX_UID.to_string(), sandbox.metadata.uid.clone());
    MachineInstance {
        metadata: meta,
        spec,
        status: Default::default(),
    }
}

/// Rewrites logical import and claim references to their deterministic full
/// names, at the volume level and at the disk-device level. Unmatched
/// references stay untouched.
fn alias_instance_volumes(
    sandbox: &Sandbox,
    instance: &mut MachineInstance,
    created_imports: &HashSet<String>,
    created_claims: &HashSet<String>,
) {
    for volume in &mut instance.spec.volumes {
        if let Some(import) = &volume.import_name {
            let full = naming::import_name(sandbox, import);
            if created_imports.contains(&full) {
                volume.import_name = Some(full);
            }
        }
        if let Some(claim) = &volume.claim_name {
            let full = naming::claim_name(sandbox, claim);
            if created_claims.contains(&full) {
                volume.claim_name = Some(full);
            }
        }
    }

    for disk in &mut instance.spec.disks {
        let full_import = naming::import_name(sandbox, &disk.name);
        if created_imports.contains(&full_import) {
            disk.name = full_import;
            continue;
        }
        let full_claim = naming::claim_name(sandbox, &disk.name);
        if created_claims.contains(&full_claim) {
            disk.name = full_claim;
        }
    }
}

/// Total phase-to-reason mapping for machine instances.
pub(crate) fn phase_reason(phase: MachinePhase) -> ReadyReason {
    match phase {
        MachinePhase::Unset => ReadyReason::Pending,
        MachinePhase::Pending => ReadyReason::Pending,
        MachinePhase::Scheduling => ReadyReason::Pending,
        MachinePhase::Scheduled => ReadyReason::Pending,
        MachinePhase::Running => ReadyReason::Ready,
        MachinePhase::Succeeded => ReadyReason::Failed,
        MachinePhase::Failed => ReadyReason::Failed,
        MachinePhase::Unknown => ReadyReason::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandpit_api::workloads::{DiskDevice, InstanceVolume, MachineInstanceSpec};

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
        for phase in [
            MachinePhase::Unset,
            MachinePhase::Pending,
            MachinePhase::Scheduling,
            MachinePhase::Scheduled,
        ] {
            assert_eq!(phase_reason(phase), ReadyReason::Pending);
        }
        assert_eq!(phase_reason(MachinePhase::Running), ReadyReason::Ready);
        for phase in [MachinePhase::Succeeded, MachinePhase::Failed, MachinePhase::Unknown] {
            assert_eq!(phase_reason(phase), ReadyReason::Failed);
        }
    }

    #[test]
    fn test_aliasing_rewrites_imports_and_claims() {
        let sb = sandbox();
        let full_import = naming::import_name(&sb, "root");
        let full_claim = naming::claim_name(&sb, "scratch");
        let imports: HashSet<String> = [full_import.clone()].into_iter().collect();
        let claims: HashSet<String> = [full_claim.clone()].into_iter().collect();

        let mut instance = new_instance(
            &sb,
            MachineInstanceSpec {
                volumes: vec![
                    InstanceVolume {
                        name: "root".to_string(),
                        import_name: Some("root".to_string()),
                        claim_name: None,
                    },
                    InstanceVolume {
                        name: "scratch".to_string(),
                        import_name: None,
                        claim_name: Some("scratch".to_string()),
                    },
                ],
                disks: vec![
                    DiskDevice {
                        name: "root".to_string(),
                    },
                    DiskDevice {
                        name: "scratch".to_string(),
                    },
                    DiskDevice {
                        name: "cdrom".to_string(),
                    },
                ],
            },
        );

        alias_instance_volumes(&sb, &mut instance, &imports, &claims);
        assert_eq!(instance.spec.volumes[0].import_name.as_deref(), Some(full_import.as_str()));
        assert_eq!(instance.spec.volumes[1].claim_name.as_deref(), Some(full_claim.as_str()));
        assert_eq!(instance.spec.disks[0].name, full_import);
        assert_eq!(instance.spec.disks[1].name, full_claim);
        assert_eq!(instance.spec.disks[2].name, "cdrom");

        let snapshot = instance.clone();
        alias_instance_volumes(&sb, &mut instance, &imports, &claims);
        assert_eq!(instance, snapshot);
    }

    #[test]
    fn test_join_condition_messages_skips_empty() {
        use sandpit_api::{Condition, ConditionStatus};
        let conditions = vec![
            Condition {
                r#type: "Ready".to_string(),
                status: ConditionStatus::False,
                reason: "Failed".to_string(),
                message: "disk error".to_string(),
                observed_generation: 0,
                last_transition_time: None,
            },
            Condition {
                r#type: "Synchronized".to_string(),
                status: ConditionStatus::False,
                reason: "Failed".to_string(),
                message: String::new(),
                observed_generation: 0,
                last_transition_time: None,
            },
            Condition {
                r#type: "Provisioned".to_string(),
                status: ConditionStatus::False,
                reason: "Failed".to_string(),
                message: "import stalled".to_string(),
                observed_generation: 0,
                last_transition_time: None,
            },
        ];
        assert_eq!(join_condition_messages(&conditions), "disk error\nimport stalled");
    }
}
