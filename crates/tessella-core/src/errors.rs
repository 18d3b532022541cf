//! Kernel-wide error taxonomy: the raise-and-propagate channel.
//!
//! `execute_action` is the one exception: it catches `KernelError` internally
//! and returns an `ActionOutcome::Err` instead (see `action::execute_action`).

use tessella_domain::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("type mismatch: attribute '{attribute}' expects {expected}, got {actual}")]
    TypeMismatch { attribute: String, expected: String, actual: String },

    #[error("invalid transition from '{from}' to '{to}'; valid targets: {valid_targets}")]
    InvalidTransition { from: String, to: String, valid_targets: String },

    #[error("unknown attribute '{0}' for this genus")]
    UnknownAttribute(String),

    #[error("cardinality violation for role '{role}': {reason}")]
    CardinalityViolation { role: String, reason: String },

    #[error("genus '{0}' is deprecated")]
    GenusDeprecated(String),

    #[error("taxonomy '{0}' is archived")]
    TaxonomyArchived(String),

    #[error("sentinel genus '{0}' is protected")]
    SentinelProtected(String),

    #[error("unknown branch: {0}")]
    BranchUnknown(String),

    #[error("branch '{0}' is not active")]
    BranchInactive(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<ValidationError> for KernelError {
    fn from(e: ValidationError) -> Self {
        KernelError::SchemaViolation(e.to_string())
    }
}
