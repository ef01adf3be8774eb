// ABOUTME: Resource model and object store interface for Sandpit
// ABOUTME: Defines sandbox/template types, derived resources, and the RawStore abstraction

pub mod condition;
pub mod memory;
pub mod meta;
pub mod sandbox;
pub mod store;
pub mod template;
pub mod workloads;

pub use condition::{get_condition, set_condition, Condition, ConditionBuilder, ConditionStatus};
pub use memory::MemoryStore;
pub use meta::{controller_ref, is_controlled_by, ObjectMeta, OwnerReference};
pub use sandbox::{ReadyReason, Sandbox, SandboxKind, SandboxSpec, SandboxStatus, CONDITION_READY};
pub use store::{Api, RawStore, Resource, StoreError};
pub use template::{
    detect_kind, SandboxTemplate, TemplateSpec, TemplateStatus, VolumeSpec,
};
pub use workloads::{
    ContainerPhase, ContainerWorkload, ContainerWorkloadSpec, ImportVolume, ImportVolumeSpec,
    MachineInstance, MachineInstanceSpec, MachinePhase, StorageClaim, StorageClaimSpec,
    VirtualDisk, VirtualDiskSpec, VirtualMachine, VirtualMachineSpec, VmPhase,
};

/// Finalizer that marks an object as depended on by the sandbox controller.
pub const FINALIZER_PROTECT: &str = "sandpit.io/protect-by-sandbox-controller";

/// Annotation naming the process an attach session should target.
pub const ANNOTATION_DEFAULT_PROCESS: &str = "sandpit.io/default-process";

/// Label carrying the owning sandbox uid on every derived resource.
pub const LABEL_SANDBOX_UID: &str = "sandpit.io/sandbox-uid";
