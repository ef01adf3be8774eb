// ABOUTME: The cluster-scoped SandboxTemplate resource
// ABOUTME: Immutable definition of a sandbox's compute and storage shape

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::meta::ObjectMeta;
use crate::sandbox::SandboxKind;
use crate::store::Resource;
use crate::workloads::{
    ContainerWorkloadSpec, ImportVolumeSpec, MachineInstanceSpec, StorageClaimSpec,
    VirtualDiskSpec, VirtualMachineSpec,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxTemplate {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: TemplateSpec,
    #[serde(default)]
    pub status: TemplateStatus,
}

/// Exactly one of the compute variants is set; admission enforces this and
/// the spec is immutable after creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerWorkloadSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_instance: Option<MachineInstanceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_machine: Option<VirtualMachineSpec>,
    /// Volumes to create and wire into the compute object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeSpec>,
}

/// Exactly one of the storage variants is set, named by a logical name
/// scoped to the template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<StorageClaimSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import: Option<ImportVolumeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<VirtualDiskSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SandboxKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Resource for SandboxTemplate {
    const KIND: &'static str = "SandboxTemplate";
    const NAMESPACED: bool = false;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Detects the backend kind from the populated compute variant.
pub fn detect_kind(spec: &TemplateSpec) -> Option<SandboxKind> {
    if spec.container.is_some() {
        Some(SandboxKind::Container)
    } else if spec.machine_instance.is_some() {
        Some(SandboxKind::MachineInstance)
    } else if spec.virtual_machine.is_some() {
        Some(SandboxKind::VirtualMachine)
    } else {
        None
    }
}
