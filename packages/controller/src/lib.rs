// ABOUTME: Sandbox reconciliation engine for Sandpit
// ABOUTME: Drives template resolution, backend lifecycle, TTL expiry, and teardown

pub mod backend;
pub mod error;
pub mod event;
pub mod gates;
pub mod naming;
pub mod predicate;
pub mod provision;
pub mod reconciler;
pub mod template;

pub use backend::{sandboxer_for, ReadyAssessment, Sandboxer};
pub use error::ControllerError;
pub use event::{EventRecorder, EventType, TracingRecorder};
pub use gates::{Feature, FeatureGates};
pub use reconciler::{ReconcileResult, Reconciler};
pub use template::TemplateReconciler;
