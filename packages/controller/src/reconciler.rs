// ABOUTME: The sandbox reconciliation state machine
// ABOUTME: Template resolution, kind detection, finalizer choreography, TTL expiry

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use sandpit_api::{
    detect_kind, set_condition, Api, ConditionBuilder, ConditionStatus, RawStore, ReadyReason,
    Sandbox, SandboxTemplate, TemplateSpec, CONDITION_READY, FINALIZER_PROTECT,
};
use tracing::{error, info, warn};

use crate::backend::{sandboxer_for, Sandboxer};
use crate::error::ControllerError;
use crate::event::{EventRecorder, EventType};
use crate::gates::FeatureGates;

/// Outcome of one reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileResult {
    /// When set, the driver schedules the next pass after this delay.
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    fn none() -> Self {
        Self::default()
    }
}

enum Flow {
    /// Persist sandbox mutations, then return the result.
    Persist(ReconcileResult),
    /// The sandbox was deleted this pass; nothing left to persist.
    Deleted,
}

struct ResolvedTemplate {
    template: Option<SandboxTemplate>,
    spec: Option<TemplateSpec>,
    terminating: bool,
}

pub struct Reconciler {
    store: Arc<dyn RawStore>,
    sandboxes: Api<Sandbox>,
    templates: Api<SandboxTemplate>,
    recorder: Arc<dyn EventRecorder>,
    gates: FeatureGates,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RawStore>, recorder: Arc<dyn EventRecorder>, gates: FeatureGates) -> Self {
        Self {
            sandboxes: Api::new(store.clone()),
            templates: Api::new(store.clone()),
            store,
            recorder,
            gates,
        }
    }

    /// Runs one reconcile pass for the named sandbox and persists the
    /// resulting status/metadata mutations. The surrounding platform
    /// serializes passes per object and retries returned errors with backoff.
    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReconcileResult, ControllerError> {
        let Some(mut sandbox) = self.sandboxes.try_get(namespace, name).await? else {
            return Ok(ReconcileResult::none());
        };

        let outcome = self.reconcile_inner(&mut sandbox).await;

        // Status and metadata are persisted here and nowhere else, whether
        // the pass succeeded or not. Absence means the object finished
        // terminating in the meantime.
        let persist = !matches!(outcome, Ok(Flow::Deleted));
        if persist {
            match self.sandboxes.update(&sandbox).await {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }

        match outcome {
            Ok(Flow::Persist(result)) => Ok(result),
            Ok(Flow::Deleted) => Ok(ReconcileResult::none()),
            Err(err) => Err(err),
        }
    }

    async fn reconcile_inner(&self, sandbox: &mut Sandbox) -> Result<Flow, ControllerError> {
        let resolved = self.resolve_template(sandbox).await?;

        // Kind detection happens exactly once; the persisted value is never
        // re-evaluated even if the template changes underneath.
        if sandbox.status.kind.is_none() {
            if let Some(spec) = &resolved.spec {
                sandbox.status.kind = detect_kind(spec);
            }
        }

        let sandboxer: Option<Box<dyn Sandboxer>> = sandbox
            .status
            .kind
            .map(|kind| sandboxer_for(kind, self.store.clone(), self.gates.clone()));

        if sandbox.metadata.is_deleting() {
            self.set_ready(
                sandbox,
                ConditionStatus::False,
                ReadyReason::Terminating,
                String::new(),
            );
            self.handle_terminating(sandbox, sandboxer).await?;
            return Ok(Flow::Persist(ReconcileResult::none()));
        }

        if is_ttl_expired(sandbox, Utc::now()) {
            info!(name = %sandbox.metadata.name, "Sandbox is expired, deleting");
            self.sandboxes
                .delete_tolerant(&sandbox.metadata.namespace, &sandbox.metadata.name)
                .await?;
            // The delete marks the object; the next pass takes the
            // terminating branch and tears resources down.
            return Ok(Flow::Deleted);
        }

        // Template missing or terminating, or kind still undetected: wait for
        // the next watch-triggered pass, no timer scheduled.
        let (spec, sandboxer) = match (resolved.spec, sandboxer) {
            (Some(spec), Some(sandboxer)) if !resolved.terminating => (spec, sandboxer),
            _ => return Ok(Flow::Persist(ReconcileResult::none())),
        };

        sandbox.metadata.add_finalizer(FINALIZER_PROTECT);
        if let Some(template) = &resolved.template {
            self.protect_template(&template.metadata.name).await?;
        }

        if let Err(err) = sandboxer.create(sandbox, &spec).await {
            error!(name = %sandbox.metadata.name, error = %err, "Failed to create sandbox resources");
            self.set_ready(
                sandbox,
                ConditionStatus::False,
                ReadyReason::Failed,
                "Failed to create sandbox.".to_string(),
            );
            self.recorder.event(
                sandbox,
                EventType::Warning,
                &ReadyReason::Failed.to_string(),
                &format!("Failed to create sandbox: {err}"),
            );
            return Err(err);
        }

        let assessment = sandboxer.status(sandbox).await?;
        self.set_ready(sandbox, assessment.status, assessment.reason, assessment.message);

        Ok(Flow::Persist(ReconcileResult {
            requeue_after: next_sync(sandbox, Utc::now()),
        }))
    }

    /// Resolves the effective template spec. An inline spec always wins;
    /// otherwise the named cluster-scoped template is fetched, and its
    /// absence or termination is reflected in the Ready condition.
    async fn resolve_template(
        &self,
        sandbox: &mut Sandbox,
    ) -> Result<ResolvedTemplate, ControllerError> {
        if let Some(spec) = &sandbox.spec.template_spec {
            return Ok(ResolvedTemplate {
                template: None,
                spec: Some(spec.clone()),
                terminating: false,
            });
        }

        let Some(template_name) = sandbox.spec.template.clone() else {
            return Ok(ResolvedTemplate {
                template: None,
                spec: None,
                terminating: false,
            });
        };

        match self.templates.try_get("", &template_name).await? {
            None => {
                info!(template = %template_name, "Sandbox template not found, waiting");
                self.set_ready(
                    sandbox,
                    ConditionStatus::False,
                    ReadyReason::Pending,
                    format!("SandboxTemplate {template_name:?} not found"),
                );
                Ok(ResolvedTemplate {
                    template: None,
                    spec: None,
                    terminating: false,
                })
            }
            Some(template) if template.metadata.is_deleting() => {
                self.set_ready(
                    sandbox,
                    ConditionStatus::False,
                    ReadyReason::Terminating,
                    format!("SandboxTemplate {template_name:?} is terminating, rejected for use."),
                );
                let spec = template.spec.clone();
                Ok(ResolvedTemplate {
                    template: Some(template),
                    spec: Some(spec),
                    terminating: true,
                })
            }
            Some(template) => {
                self.set_ready(
                    sandbox,
                    ConditionStatus::False,
                    ReadyReason::Pending,
                    String::new(),
                );
                let spec = template.spec.clone();
                Ok(ResolvedTemplate {
                    template: Some(template),
                    spec: Some(spec),
                    terminating: false,
                })
            }
        }
    }

    /// Ordered teardown: backend delete, template unprotect, own finalizer.
    /// Every step is idempotent so a partial failure is retryable from any
    /// point.
    async fn handle_terminating(
        &self,
        sandbox: &mut Sandbox,
        sandboxer: Option<Box<dyn Sandboxer>>,
    ) -> Result<(), ControllerError> {
        info!(name = %sandbox.metadata.name, "Sandbox is being deleted");

        match sandboxer {
            Some(sandboxer) => sandboxer.delete(sandbox).await?,
            None => warn!(
                name = %sandbox.metadata.name,
                "Cannot detect sandbox kind, derived resources may only be deleted in background"
            ),
        }

        if let Some(template_name) = sandbox.spec.template.clone() {
            self.unprotect_template(&template_name).await?;
        }

        sandbox.metadata.remove_finalizer(FINALIZER_PROTECT);
        Ok(())
    }

    async fn protect_template(&self, name: &str) -> Result<(), ControllerError> {
        let Some(mut template) = self.templates.try_get("", name).await? else {
            return Ok(());
        };
        if template.metadata.add_finalizer(FINALIZER_PROTECT) {
            self.templates.update(&template).await?;
        }
        Ok(())
    }

    /// Safe when the finalizer is already removed or the template is gone.
    async fn unprotect_template(&self, name: &str) -> Result<(), ControllerError> {
        let Some(mut template) = self.templates.try_get("", name).await? else {
            return Ok(());
        };
        if template.metadata.remove_finalizer(FINALIZER_PROTECT) {
            match self.templates.update(&template).await {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn set_ready(
        &self,
        sandbox: &mut Sandbox,
        status: ConditionStatus,
        reason: ReadyReason,
        message: String,
    ) {
        let cond = ConditionBuilder::new(CONDITION_READY)
            .generation(sandbox.metadata.generation)
            .status(status)
            .reason(reason)
            .message(message)
            .build();
        set_condition(&mut sandbox.status.conditions, cond);
    }
}

/// True once the TTL has elapsed since creation. A TTL of zero never expires.
pub fn is_ttl_expired(sandbox: &Sandbox, now: DateTime<Utc>) -> bool {
    if sandbox.spec.ttl_seconds == 0 {
        return false;
    }
    match sandbox.metadata.creation_timestamp {
        Some(created) => now >= created + ChronoDuration::seconds(sandbox.spec.ttl_seconds as i64),
        None => false,
    }
}

/// Delay until the sandbox expires; `None` disables the scheduled wake-up.
pub fn next_sync(sandbox: &Sandbox, now: DateTime<Utc>) -> Option<Duration> {
    if sandbox.spec.ttl_seconds == 0 {
        return None;
    }
    let created = sandbox.metadata.creation_timestamp?;
    let expires = created + ChronoDuration::seconds(sandbox.spec.ttl_seconds as i64);
    let remaining = (expires - now).to_std().unwrap_or(Duration::ZERO);
    Some(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandpit_api::ObjectMeta;

    fn sandbox_with_ttl(ttl_seconds: u64, created: DateTime<Utc>) -> Sandbox {
        let mut sb = Sandbox {
            metadata: ObjectMeta::named("s1", "default"),
            ..Default::default()
        };
        sb.metadata.creation_timestamp = Some(created);
        sb.spec.ttl_seconds = ttl_seconds;
        sb
    }

    #[test]
    fn test_zero_ttl_never_expires_and_never_requeues() {
        let created = Utc::now() - ChronoDuration::days(365);
        let sb = sandbox_with_ttl(0, created);
        assert!(!is_ttl_expired(&sb, Utc::now()));
        assert_eq!(next_sync(&sb, Utc::now()), None);
    }

    #[test]
    fn test_ttl_expiry_boundary() {
        let created = Utc::now();
        let sb = sandbox_with_ttl(60, created);
        assert!(!is_ttl_expired(&sb, created + ChronoDuration::seconds(59)));
        assert!(is_ttl_expired(&sb, created + ChronoDuration::seconds(60)));
        assert!(is_ttl_expired(&sb, created + ChronoDuration::seconds(61)));
    }

    #[test]
    fn test_next_sync_is_remaining_ttl() {
        let created = Utc::now();
        let sb = sandbox_with_ttl(600, created);
        let delay = next_sync(&sb, created + ChronoDuration::seconds(100)).unwrap();
        assert!(delay <= Duration::from_secs(500));
        assert!(delay >= Duration::from_secs(499));

        // Past expiry the delay floors at zero.
        let delay = next_sync(&sb, created + ChronoDuration::seconds(700)).unwrap();
        assert_eq!(delay, Duration::ZERO);
    }
}
