// ABOUTME: Read-only lookup surface the attach bridge resolves sandboxes through
// ABOUTME: Store-backed in production; tests swap in the in-memory store

use async_trait::async_trait;
use std::sync::Arc;

use sandpit_api::{
    Api, ContainerWorkload, MachineInstance, RawStore, Sandbox, VirtualMachine,
};

use crate::error::AttachError;

/// Read-only view of sandboxes and their compute objects.
#[async_trait]
pub trait SandboxDirectory: Send + Sync {
    async fn sandbox(&self, namespace: &str, name: &str) -> Result<Option<Sandbox>, AttachError>;
    async fn workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ContainerWorkload>, AttachError>;
    async fn machine_instance(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<MachineInstance>, AttachError>;
    async fn virtual_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachine>, AttachError>;
}

pub struct StoreDirectory {
    sandboxes: Api<Sandbox>,
    workloads: Api<ContainerWorkload>,
    instances: Api<MachineInstance>,
    machines: Api<VirtualMachine>,
}

impl StoreDirectory {
    pub fn new(store: Arc<dyn RawStore>) -> Self {
        Self {
            sandboxes: Api::new(store.clone()),
            workloads: Api::new(store.clone()),
            instances: Api::new(store.clone()),
            machines: Api::new(store),
        }
    }
}

#[async_trait]
impl SandboxDirectory for StoreDirectory {
    async fn sandbox(&self, namespace: &str, name: &str) -> Result<Option<Sandbox>, AttachError> {
        Ok(self.sandboxes.try_get(namespace, name).await?)
    }

    async fn workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ContainerWorkload>, AttachError> {
        Ok(self.workloads.try_get(namespace, name).await?)
    }

    async fn machine_instance(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<MachineInstance>, AttachError> {
        Ok(self.instances.try_get(namespace, name).await?)
    }

    async fn virtual_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachine>, AttachError> {
        Ok(self.machines.try_get(namespace, name).await?)
    }
}
