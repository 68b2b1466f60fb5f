//! The approval engine.
//!
//! `WorkflowEngine` is the only writer of workflow state:
//! 1. `create_instance` starts a run from the active definition,
//!    auto-approves the SUBMIT step, and opens the first approval step.
//! 2. `advance` applies one assignee decision to one pending step and
//!    either opens the next step, approves the instance, or rejects it.
//! 3. Read queries (`inbox`, `instance_detail`, `action_trail`) are
//!    forwarded to the store untouched.
//!
//! Every mutation runs inside a single store transaction; an error
//! anywhere rolls the whole operation back.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{
    ActionKind, ActionLogEntry, Decision, InstanceStatus, Ref, StepInstance, StepStatus,
    UserId, WorkflowInstance, WorkflowStep,
};
use crate::resolver::{resolve_assignees, ResolveContext};
use crate::store::{
    InboxPage, InstanceDetail, StoreError, WorkflowStore, WorkflowTx,
};

/// Comment recorded on the auto-approved SUBMIT step.
const SUBMIT_COMMENT: &str = "Submitted";

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// The step an instance is waiting on after an operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentStep {
    pub step_key: String,
    pub step_name: String,
    pub assigned_to: Vec<UserId>,
}

/// Where an instance stands after `create_instance` or `advance`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceState {
    pub instance_id: Uuid,
    pub status: InstanceStatus,
    /// `None` once the instance is terminal.
    pub current_step: Option<CurrentStep>,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Orchestrator for the approval state machine.
///
/// Cheap to clone; construct one per process and share it across
/// handlers.
#[derive(Clone)]
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    // -----------------------------------------------------------------------
    // create_instance
    // -----------------------------------------------------------------------

    /// Start a workflow run for a business object.
    ///
    /// Looks up the active definition for `workflow_code`, refuses a
    /// second instance for the same reference, records the submission,
    /// and opens the first approval step (or approves outright when the
    /// definition has no step after SUBMIT).
    ///
    /// # Errors
    /// [`EngineError::DefinitionNotFound`], [`EngineError::DuplicateInstance`],
    /// [`EngineError::MissingSubmitStep`], [`EngineError::UnresolvableAssignment`],
    /// or a wrapped store failure.
    #[instrument(skip(self), fields(code = %workflow_code, reference = %reference))]
    pub async fn create_instance(
        &self,
        workflow_code: &str,
        reference: Ref,
        submitter: &str,
    ) -> Result<InstanceState, EngineError> {
        let mut tx = self.store.begin().await?;

        let def = tx
            .active_definition(workflow_code)
            .await?
            .ok_or_else(|| EngineError::DefinitionNotFound { code: workflow_code.to_owned() })?;

        // One instance per reference, ever. Terminal instances count.
        if tx.instance_exists_for_ref(&reference).await? {
            return Err(EngineError::DuplicateInstance { reference });
        }

        let submit = def.submit_step().ok_or_else(|| EngineError::MissingSubmitStep {
            code: def.code.clone(),
            version: def.version,
        })?;

        let now = Utc::now();
        let instance = WorkflowInstance {
            id: Uuid::new_v4(),
            workflow_id: def.id,
            workflow_version: def.version,
            reference: reference.clone(),
            status: InstanceStatus::InProgress,
            current_step_id: Some(submit.id),
            created_by: submitter.to_owned(),
            created_at: now,
        };

        // The unique index backs up the existence check above; a racing
        // creation surfaces here as a duplicate key.
        if let Err(err) = tx.insert_instance(&instance).await {
            return Err(match err {
                StoreError::DuplicateKey => EngineError::DuplicateInstance { reference },
                other => other.into(),
            });
        }

        // Submission is the submitter approving their own SUBMIT step.
        tx.insert_step_instance(&StepInstance {
            id: Uuid::new_v4(),
            workflow_instance_id: instance.id,
            step_id: submit.id,
            status: StepStatus::Approved,
            assigned_to: vec![submitter.to_owned()],
            acted_by: Some(submitter.to_owned()),
            acted_at: Some(now),
            comment: Some(SUBMIT_COMMENT.to_owned()),
            created_at: now,
        })
        .await?;

        tx.append_action(&ActionLogEntry {
            id: Uuid::new_v4(),
            workflow_instance_id: instance.id,
            action: ActionKind::Submit,
            from_step_id: submit.id,
            actor_id: submitter.to_owned(),
            created_at: now,
        })
        .await?;

        let state = match def.next_step_after(submit.step_order) {
            Some(next) => {
                let current = open_step(tx.as_mut(), next, &instance, submitter).await?;
                tx.set_current_step(instance.id, Some(next.id)).await?;
                InstanceState {
                    instance_id: instance.id,
                    status: InstanceStatus::InProgress,
                    current_step: Some(current),
                }
            }
            None => {
                // Submit-only workflow: nothing left to approve.
                tx.set_instance_status(instance.id, InstanceStatus::Approved).await?;
                tx.set_current_step(instance.id, None).await?;
                InstanceState {
                    instance_id: instance.id,
                    status: InstanceStatus::Approved,
                    current_step: None,
                }
            }
        };

        tx.commit().await?;
        info!(
            instance_id = %state.instance_id,
            status = %state.status,
            "workflow instance created"
        );
        Ok(state)
    }

    // -----------------------------------------------------------------------
    // advance
    // -----------------------------------------------------------------------

    /// Apply one assignee decision to a pending step.
    ///
    /// Rejection terminates the instance immediately. Approval opens the
    /// next step of the pinned definition version, or approves the
    /// instance when the acted step was the last one.
    ///
    /// # Errors
    /// [`EngineError::InstanceNotFound`], [`EngineError::StepInstanceNotFound`],
    /// [`EngineError::InvalidState`] (wrong instance, already acted on, or
    /// a lost race), [`EngineError::NotAuthorized`], or a wrapped store
    /// failure.
    #[instrument(skip(self), fields(instance_id = %instance_id, step_instance_id = %step_instance_id, actor = %actor))]
    pub async fn advance(
        &self,
        instance_id: Uuid,
        step_instance_id: Uuid,
        actor: &str,
        decision: Decision,
        comment: Option<&str>,
    ) -> Result<InstanceState, EngineError> {
        let mut tx = self.store.begin().await?;

        let instance = tx
            .instance_by_id(instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(instance_id))?;

        let step_inst = tx
            .step_instance_by_id(step_instance_id)
            .await?
            .ok_or(EngineError::StepInstanceNotFound(step_instance_id))?;

        if step_inst.workflow_instance_id != instance.id
            || step_inst.status != StepStatus::Pending
            || instance.status.is_terminal()
        {
            return Err(EngineError::InvalidState { step_instance_id });
        }

        if !step_inst.is_assigned_to(actor) {
            warn!("decision by non-assignee refused");
            return Err(EngineError::NotAuthorized {
                actor: actor.to_owned(),
                step_instance_id,
            });
        }

        let step_status = match decision {
            Decision::Approve => StepStatus::Approved,
            Decision::Reject => StepStatus::Rejected,
        };

        // Conditional close: whoever flips PENDING first wins, every
        // other transaction sees `false` here.
        let closed = tx
            .close_step_instance(step_instance_id, step_status, actor, comment)
            .await?;
        if !closed {
            return Err(EngineError::InvalidState { step_instance_id });
        }

        tx.append_action(&ActionLogEntry {
            id: Uuid::new_v4(),
            workflow_instance_id: instance.id,
            action: match decision {
                Decision::Approve => ActionKind::Approve,
                Decision::Reject => ActionKind::Reject,
            },
            from_step_id: step_inst.step_id,
            actor_id: actor.to_owned(),
            created_at: Utc::now(),
        })
        .await?;

        let state = match decision {
            Decision::Reject => {
                tx.set_instance_status(instance.id, InstanceStatus::Rejected).await?;
                tx.set_current_step(instance.id, None).await?;
                InstanceState {
                    instance_id: instance.id,
                    status: InstanceStatus::Rejected,
                    current_step: None,
                }
            }
            Decision::Approve => {
                // Advance against the version the instance was created
                // under, not whatever is active today.
                let def = tx
                    .pinned_definition(instance.workflow_id, instance.workflow_version)
                    .await?;
                let acted = def
                    .step_by_id(step_inst.step_id)
                    .ok_or(StoreError::NotFound)?;

                match def.next_step_after(acted.step_order) {
                    Some(next) => {
                        let current = open_step(
                            tx.as_mut(),
                            next,
                            &instance,
                            &instance.created_by,
                        )
                        .await?;
                        tx.set_current_step(instance.id, Some(next.id)).await?;
                        InstanceState {
                            instance_id: instance.id,
                            status: InstanceStatus::InProgress,
                            current_step: Some(current),
                        }
                    }
                    None => {
                        tx.set_instance_status(instance.id, InstanceStatus::Approved)
                            .await?;
                        tx.set_current_step(instance.id, None).await?;
                        InstanceState {
                            instance_id: instance.id,
                            status: InstanceStatus::Approved,
                            current_step: None,
                        }
                    }
                }
            }
        };

        tx.commit().await?;
        info!(
            status = %state.status,
            "decision applied"
        );
        Ok(state)
    }

    // -----------------------------------------------------------------------
    // Read queries
    // -----------------------------------------------------------------------

    /// A user's pending approval inbox, oldest first. `page` is 1-based.
    pub async fn inbox(
        &self,
        user: &str,
        page: u32,
        page_size: u32,
    ) -> Result<InboxPage, EngineError> {
        Ok(self.store.inbox(user, page, page_size).await?)
    }

    /// Full monitoring view of one instance.
    ///
    /// # Errors
    /// [`EngineError::InstanceNotFound`] for an unknown id.
    pub async fn instance_detail(
        &self,
        instance_id: Uuid,
    ) -> Result<InstanceDetail, EngineError> {
        self.store
            .instance_detail(instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(instance_id))
    }

    /// The instance's audit trail, oldest first.
    pub async fn action_trail(
        &self,
        instance_id: Uuid,
    ) -> Result<Vec<ActionLogEntry>, EngineError> {
        Ok(self.store.action_trail(instance_id).await?)
    }
}

// ---------------------------------------------------------------------------
// Internal: open the next pending step
// ---------------------------------------------------------------------------

/// Resolve the step's assignees and insert its PENDING step instance.
/// Fails before anything is written when the rule resolves to nobody.
async fn open_step(
    tx: &mut dyn WorkflowTx,
    step: &WorkflowStep,
    instance: &WorkflowInstance,
    submitter_id: &str,
) -> Result<CurrentStep, EngineError> {
    let ctx = ResolveContext { instance, submitter_id };
    let assignees = resolve_assignees(&step.assignment_rule, &ctx)?;
    let assigned_to: Vec<UserId> = assignees.into_iter().collect();

    tx.insert_step_instance(&StepInstance {
        id: Uuid::new_v4(),
        workflow_instance_id: instance.id,
        step_id: step.id,
        status: StepStatus::Pending,
        assigned_to: assigned_to.clone(),
        acted_by: None,
        acted_at: None,
        comment: None,
        created_at: Utc::now(),
    })
    .await?;

    Ok(CurrentStep {
        step_key: step.step_key.clone(),
        step_name: step.name.clone(),
        assigned_to,
    })
}
