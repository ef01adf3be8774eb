// ABOUTME: The user-facing Sandbox resource
// ABOUTME: Spec names a template (or inlines one) plus a TTL; status tracks kind and readiness

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::meta::ObjectMeta;
use crate::store::Resource;
use crate::template::TemplateSpec;

pub const CONDITION_READY: &str = "Ready";

/// Reasons carried by the sandbox Ready condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadyReason {
    Pending,
    Ready,
    Failed,
    Terminating,
}

impl std::fmt::Display for ReadyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReadyReason::Pending => "Pending",
            ReadyReason::Ready => "Ready",
            ReadyReason::Failed => "Failed",
            ReadyReason::Terminating => "Terminating",
        };
        f.write_str(s)
    }
}

/// Compute backend a sandbox is realized with. Detected once from the
/// template spec and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxKind {
    Container,
    MachineInstance,
    VirtualMachine,
}

impl std::fmt::Display for SandboxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SandboxKind::Container => "Container",
            SandboxKind::MachineInstance => "MachineInstance",
            SandboxKind::VirtualMachine => "VirtualMachine",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sandbox {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: SandboxSpec,
    #[serde(default)]
    pub status: SandboxStatus,
}

impl Sandbox {
    /// Deterministic name of the single compute object realizing this
    /// sandbox, shared by the reconciler and the attach bridge.
    pub fn compute_name(&self) -> String {
        format!("sandbox-{}", self.metadata.uid)
    }
}

/// Exactly one of `template` / `template_spec` is set; admission enforces
/// this before the object is ever persisted. The spec is immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxSpec {
    /// Name of the cluster-scoped template to resolve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Inline template spec; wins over `template` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_spec: Option<TemplateSpec>,
    /// Seconds until automatic deletion. Zero disables expiry.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

fn default_ttl_seconds() -> u64 {
    3600
}

impl Default for SandboxSpec {
    fn default() -> Self {
        Self {
            template: None,
            template_spec: None,
            ttl_seconds: default_ttl_seconds(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxStatus {
    /// Set once on first reconcile, never re-evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SandboxKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Resource for Sandbox {
    const KIND: &'static str = "Sandbox";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
