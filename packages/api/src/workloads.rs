// ABOUTME: Derived compute and storage resources a sandbox is realized with
// ABOUTME: One compute object per sandbox plus zero-or-more storage objects

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::meta::ObjectMeta;
use crate::store::Resource;

macro_rules! impl_resource {
    ($ty:ty, $kind:literal) => {
        impl Resource for $ty {
            const KIND: &'static str = $kind;

            fn meta(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Container workload
// ---------------------------------------------------------------------------

/// Plain container workload, the pod-like compute object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerWorkload {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ContainerWorkloadSpec,
    #[serde(default)]
    pub status: ContainerWorkloadStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerWorkloadSpec {
    #[serde(default)]
    pub processes: Vec<ContainerProcess>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<WorkloadVolume>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerProcess {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Name of a volume in the workload's volume list.
    pub name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadVolume {
    pub name: String,
    /// Claim backing this volume, referenced by claim name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerWorkloadStatus {
    #[serde(default)]
    pub phase: ContainerPhase,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl Default for ContainerPhase {
    fn default() -> Self {
        ContainerPhase::Pending
    }
}

impl_resource!(ContainerWorkload, "ContainerWorkload");

// ---------------------------------------------------------------------------
// Machine instance (virtualization A)
// ---------------------------------------------------------------------------

/// Virtual machine instance exposing a console subresource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineInstance {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: MachineInstanceSpec,
    #[serde(default)]
    pub status: MachineInstanceStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineInstanceSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<InstanceVolume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<DiskDevice>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceVolume {
    pub name: String,
    /// Import volume backing this volume, referenced by name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_name: Option<String>,
    /// Storage claim backing this volume, referenced by claim name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_name: Option<String>,
}

/// Device-level reference to a volume by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskDevice {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineInstanceStatus {
    #[serde(default)]
    pub phase: MachinePhase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachinePhase {
    Unset,
    Pending,
    Scheduling,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl Default for MachinePhase {
    fn default() -> Self {
        MachinePhase::Unset
    }
}

impl_resource!(MachineInstance, "MachineInstance");

// ---------------------------------------------------------------------------
// Virtual machine (virtualization B)
// ---------------------------------------------------------------------------

/// Managed virtual machine whose console is reached through a reverse proxy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: VirtualMachineSpec,
    #[serde(default)]
    pub status: VirtualMachineStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachineSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block_device_refs: Vec<BlockDeviceRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockDeviceRef {
    /// Kind of the referenced device, e.g. "VirtualDisk".
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachineStatus {
    #[serde(default)]
    pub phase: VmPhase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmPhase {
    Pending,
    Starting,
    Running,
    Migrating,
    Paused,
    Stopping,
    Stopped,
    Terminating,
    Degraded,
}

impl Default for VmPhase {
    fn default() -> Self {
        VmPhase::Pending
    }
}

impl_resource!(VirtualMachine, "VirtualMachine");

// ---------------------------------------------------------------------------
// Storage resources
// ---------------------------------------------------------------------------

/// Plain storage claim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageClaim {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: StorageClaimSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageClaimSpec {
    pub size_gib: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

impl_resource!(StorageClaim, "StorageClaim");

/// Storage volume populated from an external source before first boot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportVolume {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ImportVolumeSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportVolumeSpec {
    /// URL of the image to import.
    pub source_url: String,
    pub size_gib: u64,
}

impl_resource!(ImportVolume, "ImportVolume");

/// Virtual disk attachable to a managed virtual machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualDisk {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: VirtualDiskSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualDiskSpec {
    pub size_gib: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl_resource!(VirtualDisk, "VirtualDisk");

pub const BLOCK_DEVICE_KIND_VIRTUAL_DISK: &str = "VirtualDisk";
