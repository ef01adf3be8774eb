// ABOUTME: Container backend realizing a sandbox as a plain container workload
// ABOUTME: Storage claims plus one workload object, repaired by delete-and-recreate

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use sandpit_api::{
    controller_ref, Api, ContainerPhase, ContainerWorkload, ObjectMeta, RawStore, ReadyReason,
    Resource, Sandbox, StorageClaim, TemplateSpec, LABEL_SANDBOX_UID,
};
use tracing::info;

use super::{ReadyAssessment, Sandboxer};
use crate::error::ControllerError;
use crate::naming;
use crate::provision::{make_claims, OwnedStorage};

pub struct ContainerBackend {
    workloads: Api<ContainerWorkload>,
    claims: OwnedStorage<StorageClaim>,
}

impl ContainerBackend {
    pub fn new(store: Arc<dyn RawStore>) -> Self {
        Self {
            workloads: Api::new(store.clone()),
            claims: OwnedStorage::new(Api::new(store)),
        }
    }

    async fn get_workload(
        &self,
        sandbox: &Sandbox,
    ) -> Result<Option<ContainerWorkload>, ControllerError> {
        Ok(self
            .workloads
            .try_get(&sandbox.metadata.namespace, &sandbox.compute_name())
            .await?)
    }
}

#[async_trait]
impl Sandboxer for ContainerBackend {
    async fn create(
        &self,
        sandbox: &Sandbox,
        template_spec: &TemplateSpec,
    ) -> Result<(), ControllerError> {
        let claims = make_claims(sandbox, template_spec);
        let claim_names: HashSet<String> =
            claims.iter().map(|c| c.metadata.name.clone()).collect();
        self.claims.create_missing(sandbox, claims).await?;

        if let Some(workload) = self.get_workload(sandbox).await? {
            if phase_reason(workload.status.phase) != ReadyReason::Failed {
                return Ok(());
            }
            // Repair policy is delete-and-recreate; the spec is immutable so
            // in-place mutation is unsafe.
            info!(name = %workload.metadata.name, "Workload failed, deleting for recreation");
            return self
                .workloads
                .delete_tolerant(&workload.metadata.namespace, &workload.metadata.name)
                .await
                .map_err(|err| {
                    ControllerError::operation(
                        "delete",
                        ContainerWorkload::KIND,
                        workload.metadata.name.clone(),
                        err,
                    )
                });
        }

        if let Some(spec) = &template_spec.container {
            let mut workload = new_workload(sandbox, spec.clone());
            alias_workload_volumes(sandbox, &mut workload, &claim_names);
            let name = workload.metadata.name.clone();
            self.workloads.create(&workload).await.map_err(|err| {
                ControllerError::operation("create", ContainerWorkload::KIND, name, err)
            })?;
        }

        Ok(())
    }

    async fn delete(&self, sandbox: &Sandbox) -> Result<(), ControllerError> {
        if let Some(workload) = self.get_workload(sandbox).await? {
            self.workloads
                .delete_tolerant(&workload.metadata.namespace, &workload.metadata.name)
                .await
                .map_err(|err| {
                    ControllerError::operation(
                        "delete",
                        ContainerWorkload::KIND,
                        workload.metadata.name.clone(),
                        err,
                    )
                })?;
        }
        self.claims.delete_owned(sandbox).await
    }

    async fn status(&self, sandbox: &Sandbox) -> Result<ReadyAssessment, ControllerError> {
        let Some(workload) = self.get_workload(sandbox).await? else {
            return Ok(ReadyAssessment::pending());
        };

        let reason = phase_reason(workload.status.phase);
        let message = if reason == ReadyReason::Failed {
            workload.status.message.clone()
        } else {
            String::new()
        };
        Ok(ReadyAssessment::from_reason(reason, message))
    }
}

fn new_workload(
    sandbox: &Sandbox,
    spec: sandpit_api::workloads::ContainerWorkloadSpec,
) -> ContainerWorkload {
    let mut meta = ObjectMeta::named(sandbox.compute_name(), sandbox.metadata.namespace.clone());
    meta.owner_references = vec![controller_ref(sandbox)];
    meta.labels
        .insert(LABEL_SANDBOX_UID.to_string(), sandbox.metadata.uid.clone());
    ContainerWorkload {
        metadata: meta,
        spec,
        status: Default::default(),
    }
}

/// Rewrites logical claim references to deterministic full names, at the
/// volume-list level and the mount level. References that do not resolve to a
/// claim created for this sandbox are left untouched, which also makes a
/// second pass over already-rewritten names a no-op.
fn alias_workload_volumes(
    sandbox: &Sandbox,
    workload: &mut ContainerWorkload,
    created_claims: &HashSet<String>,
) {
    for volume in &mut workload.spec.volumes {
        if let Some(claim) = &volume.claim_name {
            let full = naming::claim_name(sandbox, claim);
            if created_claims.contains(&full) {
                volume.claim_name = Some(full);
            }
        }
    }
    for process in &mut workload.spec.processes {
        for mount in &mut process.volume_mounts {
            let full = naming::claim_name(sandbox, &mount.name);
            if created_claims.contains(&full) {
                mount.name = full;
            }
        }
    }
}

/// Total phase-to-reason mapping for container workloads.
pub(crate) fn phase_reason(phase: ContainerPhase) -> ReadyReason {
    match phase {
        ContainerPhase::Pending => ReadyReason::Pending,
        ContainerPhase::Running => ReadyReason::Ready,
        ContainerPhase::Succeeded => ReadyReason::Failed,
        ContainerPhase::Failed => ReadyReason::Failed,
        ContainerPhase::Unknown => ReadyReason::Failed,
    }
}
