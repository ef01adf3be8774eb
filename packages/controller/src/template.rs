// ABOUTME: Reconciler for the cluster-scoped SandboxTemplate resource
// ABOUTME: Publishes the detected backend kind and a Ready condition

use std::sync::Arc;

use sandpit_api::{
    detect_kind, set_condition, Api, ConditionBuilder, ConditionStatus, RawStore, SandboxTemplate,
    CONDITION_READY, FINALIZER_PROTECT,
};
use tracing::debug;

use crate::error::ControllerError;

pub struct TemplateReconciler {
    templates: Api<SandboxTemplate>,
}

impl TemplateReconciler {
    pub fn new(store: Arc<dyn RawStore>) -> Self {
        Self {
            templates: Api::new(store),
        }
    }

    pub async fn reconcile(&self, name: &str) -> Result<(), ControllerError> {
        let Some(mut template) = self.templates.try_get("", name).await? else {
            debug!(name, "Sandbox template gone, nothing to reconcile");
            return Ok(());
        };

        let before = template.status.clone();
        template.status.kind = detect_kind(&template.spec);

        let cond = if template.metadata.is_deleting() {
            let message = if template.metadata.has_finalizer(FINALIZER_PROTECT) {
                "Template is terminating; held by the sandbox controller while sandboxes still reference it."
            } else {
                "Template is terminating."
            };
            ConditionBuilder::new(CONDITION_READY)
                .status(ConditionStatus::False)
                .reason("Terminating")
                .message(message)
        } else {
            ConditionBuilder::new(CONDITION_READY)
                .status(ConditionStatus::True)
                .reason("Ready")
        };
        set_condition(
            &mut template.status.conditions,
            cond.generation(template.metadata.generation).build(),
        );

        if template.status != before {
            match self.templates.update(&template).await {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}
