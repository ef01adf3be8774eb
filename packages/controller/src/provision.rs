// ABOUTME: Storage provisioner for a sandbox's declared volumes
// ABOUTME: Create-if-absent by deterministic name; delete by owner-reference scan

use std::collections::HashSet;

use sandpit_api::{
    controller_ref, is_controlled_by, Api, ImportVolume, ObjectMeta, Resource, Sandbox,
    StorageClaim, TemplateSpec, VirtualDisk, LABEL_SANDBOX_UID,
};
use tracing::debug;

use crate::error::ControllerError;
use crate::naming;

/// Idempotent create/delete of one storage resource kind owned by a sandbox.
pub(crate) struct OwnedStorage<T> {
    api: Api<T>,
}

impl<T: Resource> OwnedStorage<T> {
    pub(crate) fn new(api: Api<T>) -> Self {
        Self { api }
    }

    /// Storage objects in the sandbox's namespace owned by it. Ownership is
    /// decided by owner reference, never by name guessing.
    pub(crate) async fn list_owned(&self, sandbox: &Sandbox) -> Result<Vec<T>, ControllerError> {
        let all = self.api.list(&sandbox.metadata.namespace).await?;
        Ok(all
            .into_iter()
            .filter(|obj| is_controlled_by(obj.meta(), sandbox))
            .collect())
    }

    /// Creates every desired object whose deterministic name does not exist
    /// yet. Specs are immutable, so matching is by name only.
    pub(crate) async fn create_missing(
        &self,
        sandbox: &Sandbox,
        desired: Vec<T>,
    ) -> Result<(), ControllerError> {
        let existing: HashSet<String> = self
            .list_owned(sandbox)
            .await?
            .into_iter()
            .map(|obj| obj.meta().name.clone())
            .collect();

        for obj in desired {
            if existing.contains(&obj.meta().name) {
                debug!(kind = T::KIND, name = %obj.meta().name, "Storage object exists, skipping");
                continue;
            }
            let name = obj.meta().name.clone();
            self.api
                .create(&obj)
                .await
                .map_err(|err| ControllerError::operation("create", T::KIND, name, err))?;
        }
        Ok(())
    }

    /// Deletes every owned object, tolerating ones already gone.
    pub(crate) async fn delete_owned(&self, sandbox: &Sandbox) -> Result<(), ControllerError> {
        for obj in self.list_owned(sandbox).await? {
            let meta = obj.meta();
            self.api
                .delete_tolerant(&meta.namespace, &meta.name)
                .await
                .map_err(|err| {
                    ControllerError::operation("delete", T::KIND, meta.name.clone(), err)
                })?;
        }
        Ok(())
    }
}

fn derived_meta(sandbox: &Sandbox, name: String) -> ObjectMeta {
    let mut meta = ObjectMeta::named(name, sandbox.metadata.namespace.clone());
    meta.owner_references = vec![controller_ref(sandbox)];
    meta.labels
        .insert(LABEL_SANDBOX_UID.to_string(), sandbox.metadata.uid.clone());
    meta
}

pub(crate) fn make_claims(sandbox: &Sandbox, template_spec: &TemplateSpec) -> Vec<StorageClaim> {
    template_spec
        .volumes
        .iter()
        .filter_map(|volume| {
            volume.claim.as_ref().map(|spec| StorageClaim {
                metadata: derived_meta(sandbox, naming::claim_name(sandbox, &volume.name)),
                spec: spec.clone(),
            })
        })
        .collect()
}

pub(crate) fn make_imports(sandbox: &Sandbox, template_spec: &TemplateSpec) -> Vec<ImportVolume> {
    template_spec
        .volumes
        .iter()
        .filter_map(|volume| {
            volume.import.as_ref().map(|spec| ImportVolume {
                metadata: derived_meta(sandbox, naming::import_name(sandbox, &volume.name)),
                spec: spec.clone(),
            })
        })
        .collect()
}

pub(crate) fn make_disks(sandbox: &Sandbox, template_spec: &TemplateSpec) -> Vec<VirtualDisk> {
    template_spec
        .volumes
        .iter()
        .filter_map(|volume| {
            volume.disk.as_ref().map(|spec| VirtualDisk {
                metadata: derived_meta(sandbox, naming::disk_name(sandbox, &volume.name)),
                spec: spec.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandpit_api::{MemoryStore, StorageClaimSpec, VolumeSpec};
    use std::sync::Arc;

    fn sandbox() -> Sandbox {
        let mut sb = Sandbox {
            metadata: ObjectMeta::named("s1", "default"),
            ..Default::default()
        };
        sb.metadata.uid = "uid-1".to_string();
        sb
    }

    fn template_with_claims(names: &[&str]) -> TemplateSpec {
        TemplateSpec {
            volumes: names
                .iter()
                .map(|name| VolumeSpec {
                    name: name.to_string(),
                    claim: Some(StorageClaimSpec {
                        size_gib: 1,
                        storage_class: None,
                    }),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_missing_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let owned = OwnedStorage::new(Api::<StorageClaim>::new(store.clone()));
        let sb = sandbox();
        let spec = template_with_claims(&["data", "cache"]);

        owned.create_missing(&sb, make_claims(&sb, &spec)).await.unwrap();
        owned.create_missing(&sb, make_claims(&sb, &spec)).await.unwrap();

        let claims = owned.list_owned(&sb).await.unwrap();
        assert_eq!(claims.len(), 2);
    }

    #[tokio::test]
    async fn test_list_owned_ignores_foreign_objects() {
        let store = Arc::new(MemoryStore::new());
        let api = Api::<StorageClaim>::new(store.clone());
        let owned = OwnedStorage::new(api.clone());
        let sb = sandbox();

        // A claim in the same namespace that nobody owns.
        let stray = StorageClaim {
            metadata: ObjectMeta::named("stray", "default"),
            ..Default::default()
        };
        api.create(&stray).await.unwrap();

        owned
            .create_missing(&sb, make_claims(&sb, &template_with_claims(&["data"])))
            .await
            .unwrap();
        let claims = owned.list_owned(&sb).await.unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].metadata.name, "sandbox-claim-uid-1-data");
    }

    #[tokio::test]
    async fn test_delete_owned_tolerates_absence() {
        let store = Arc::new(MemoryStore::new());
        let owned = OwnedStorage::new(Api::<StorageClaim>::new(store));
        let sb = sandbox();
        owned.delete_owned(&sb).await.unwrap();
    }
}
