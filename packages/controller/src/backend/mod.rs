// ABOUTME: Sandboxer trait and backend factory
// ABOUTME: Polymorphic create/delete/status over the three compute kinds

use async_trait::async_trait;
use std::sync::Arc;

use sandpit_api::{ConditionStatus, RawStore, ReadyReason, Sandbox, SandboxKind, TemplateSpec};

use crate::error::ControllerError;
use crate::gates::FeatureGates;

pub mod container;
pub mod machine;
pub mod vm;

pub use container::ContainerBackend;
pub use machine::MachineInstanceBackend;
pub use vm::VirtualMachineBackend;

/// Outcome of a backend status check, folded into the Ready condition.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyAssessment {
    pub status: ConditionStatus,
    pub reason: ReadyReason,
    pub message: String,
}

impl ReadyAssessment {
    pub fn pending() -> Self {
        Self {
            status: ConditionStatus::False,
            reason: ReadyReason::Pending,
            message: String::new(),
        }
    }

    pub(crate) fn from_reason(reason: ReadyReason, message: String) -> Self {
        let status = if reason == ReadyReason::Ready {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        };
        Self {
            status,
            reason,
            message,
        }
    }
}

/// A compute backend translating a template into native compute and storage
/// objects. All operations are idempotent; a disabled backend fails every
/// operation with `FeatureDisabled` instead of silently doing nothing.
#[async_trait]
pub trait Sandboxer: Send + Sync {
    /// Ensures the sandbox's storage and compute objects exist. A compute
    /// object found in a failed phase is deleted (never mutated) so the next
    /// pass recreates it.
    async fn create(
        &self,
        sandbox: &Sandbox,
        template_spec: &TemplateSpec,
    ) -> Result<(), ControllerError>;

    /// Deletes the compute object, then every storage object found via an
    /// owner-reference scan. Tolerates objects already gone.
    async fn delete(&self, sandbox: &Sandbox) -> Result<(), ControllerError>;

    /// Maps the backend-native phase to the sandbox Ready condition.
    async fn status(&self, sandbox: &Sandbox) -> Result<ReadyAssessment, ControllerError>;
}

/// Selects the backend implementation for a persisted sandbox kind. Callers
/// never inspect the concrete type afterward.
pub fn sandboxer_for(
    kind: SandboxKind,
    store: Arc<dyn RawStore>,
    gates: FeatureGates,
) -> Box<dyn Sandboxer> {
    match kind {
        SandboxKind::Container => Box::new(ContainerBackend::new(store)),
        SandboxKind::MachineInstance => Box::new(MachineInstanceBackend::new(store, gates)),
        SandboxKind::VirtualMachine => Box::new(VirtualMachineBackend::new(store, gates)),
    }
}
