//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use crate::models::{Ref, UserId};
use crate::store::StoreError;

/// Errors produced by the approval engine.
///
/// Every failure path maps to a distinct variant so callers can pick the
/// right user-facing treatment; nothing inside a transaction is ever
/// partially committed when one of these is returned.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ User-recoverable ------

    /// No active workflow definition for the requested code.
    #[error("no active workflow definition for code '{code}'")]
    DefinitionNotFound { code: String },

    /// An instance (any status) already exists for the reference.
    /// Re-submission goes through a dedicated path, not re-creation.
    #[error("a workflow instance already exists for {reference}")]
    DuplicateInstance { reference: Ref },

    /// The actor is not in the step instance's assignee set.
    #[error("user '{actor}' is not an assignee of step instance {step_instance_id}")]
    NotAuthorized { actor: UserId, step_instance_id: Uuid },

    /// The step instance is not pending (already acted on, lost a race,
    /// or does not belong to the given instance). Safe to retry after
    /// re-fetching current state.
    #[error("step instance {step_instance_id} is not awaiting a decision")]
    InvalidState { step_instance_id: Uuid },

    /// Unknown workflow instance id.
    #[error("workflow instance {0} not found")]
    InstanceNotFound(Uuid),

    /// Unknown step instance id.
    #[error("step instance {0} not found")]
    StepInstanceNotFound(Uuid),

    // ------ Configuration defects (not user-recoverable) ------

    /// The definition has no SUBMIT step.
    #[error("workflow '{code}' version {version} defines no SUBMIT step")]
    MissingSubmitStep { code: String, version: i32 },

    /// An assignment rule resolved to nobody, or could not be parsed.
    #[error("assignment rule '{rule}' did not resolve to any assignee")]
    UnresolvableAssignment { rule: String },

    // ------ Infrastructure ------

    /// Persistence error from the backing store.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}
