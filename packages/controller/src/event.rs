// ABOUTME: Event recording seam for reconcile-time notifications
// ABOUTME: Production recorder forwards to tracing; tests swap in a capturing fake

use sandpit_api::Sandbox;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

pub trait EventRecorder: Send + Sync {
    fn event(&self, sandbox: &Sandbox, event_type: EventType, reason: &str, message: &str);
}

/// Recorder that emits events as structured log lines.
#[derive(Debug, Default)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn event(&self, sandbox: &Sandbox, event_type: EventType, reason: &str, message: &str) {
        let name = sandbox.metadata.name.as_str();
        let namespace = sandbox.metadata.namespace.as_str();
        match event_type {
            EventType::Normal => info!(name, namespace, reason, "{message}"),
            EventType::Warning => warn!(name, namespace, reason, "{message}"),
        }
    }
}
