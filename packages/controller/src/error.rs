// ABOUTME: Error taxonomy for the reconciliation engine
// ABOUTME: FeatureDisabled is terminal; everything else rides the platform's retry

use thiserror::Error;

use crate::gates::Feature;
use sandpit_api::StoreError;

#[derive(Error, Debug)]
pub enum ControllerError {
    /// User/config error, never retried, surfaced verbatim.
    #[error("feature gate {0} is not enabled")]
    FeatureDisabled(Feature),

    /// A backend operation against a named derived resource failed.
    #[error("failed to {op} {kind} {name:?}: {source}")]
    Operation {
        op: &'static str,
        kind: &'static str,
        name: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ControllerError {
    pub(crate) fn operation(
        op: &'static str,
        kind: &'static str,
        name: impl Into<String>,
        source: StoreError,
    ) -> Self {
        ControllerError::Operation {
            op,
            kind,
            name: name.into(),
            source,
        }
    }
}
