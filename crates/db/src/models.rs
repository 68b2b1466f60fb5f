//! Row types mapping the relational schema onto the `engine` domain
//! models.
//!
//! Statuses and assignment rules are stored as text; decoding them back
//! into their closed enum forms can fail only on corrupt data, which
//! surfaces as a backend error rather than a user-facing one.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use engine::{
    ActionLogEntry, AssignmentRule, Ref, StepInstance, StoreError, WorkflowDefinition,
    WorkflowInstance, WorkflowStep,
};

/// Decode a stored enum string, mapping corruption to a backend error.
fn decode<T: std::str::FromStr<Err = String>>(raw: &str) -> Result<T, StoreError> {
    raw.parse::<T>().map_err(|e| StoreError::Backend(anyhow!(e)))
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
pub struct DefinitionRow {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub version: i32,
    pub is_active: bool,
}

#[derive(Debug, FromRow)]
pub struct StepRow {
    pub id: Uuid,
    pub step_key: String,
    pub name: String,
    pub step_order: i32,
    pub assignment_rule: String,
}

impl StepRow {
    pub fn into_step(self) -> Result<WorkflowStep, StoreError> {
        let assignment_rule = AssignmentRule::parse(&self.assignment_rule)
            .map_err(|e| StoreError::Backend(anyhow!(e.to_string())))?;
        Ok(WorkflowStep {
            id: self.id,
            step_key: self.step_key,
            name: self.name,
            step_order: self.step_order,
            assignment_rule,
        })
    }
}

impl DefinitionRow {
    pub fn into_definition(self, steps: Vec<StepRow>) -> Result<WorkflowDefinition, StoreError> {
        Ok(WorkflowDefinition {
            id: self.id,
            code: self.code,
            name: self.name,
            version: self.version,
            is_active: self.is_active,
            steps: steps
                .into_iter()
                .map(StepRow::into_step)
                .collect::<Result<Vec<_>, _>>()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
pub struct InstanceRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_version: i32,
    pub ref_type: String,
    pub ref_id: String,
    pub status: String,
    pub current_step_id: Option<Uuid>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl InstanceRow {
    pub fn into_instance(self) -> Result<WorkflowInstance, StoreError> {
        Ok(WorkflowInstance {
            id: self.id,
            workflow_id: self.workflow_id,
            workflow_version: self.workflow_version,
            reference: Ref::new(self.ref_type, self.ref_id),
            status: decode(&self.status)?,
            current_step_id: self.current_step_id,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct StepInstanceRow {
    pub id: Uuid,
    pub workflow_instance_id: Uuid,
    pub step_id: Uuid,
    pub status: String,
    pub assigned_to: Vec<String>,
    pub acted_by: Option<String>,
    pub acted_at: Option<DateTime<Utc>>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StepInstanceRow {
    pub fn into_step_instance(self) -> Result<StepInstance, StoreError> {
        Ok(StepInstance {
            id: self.id,
            workflow_instance_id: self.workflow_instance_id,
            step_id: self.step_id,
            status: decode(&self.status)?,
            assigned_to: self.assigned_to,
            acted_by: self.acted_by,
            acted_at: self.acted_at,
            comment: self.comment,
            created_at: self.created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Action log
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
pub struct ActionLogRow {
    pub id: Uuid,
    pub workflow_instance_id: Uuid,
    pub action: String,
    pub from_step_id: Uuid,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}

impl ActionLogRow {
    pub fn into_entry(self) -> Result<ActionLogEntry, StoreError> {
        Ok(ActionLogEntry {
            id: self.id,
            workflow_instance_id: self.workflow_instance_id,
            action: decode(&self.action)?,
            from_step_id: self.from_step_id,
            actor_id: self.actor_id,
            created_at: self.created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Inbox join row
// ---------------------------------------------------------------------------

/// Flattened result of the inbox join across step instances, instances,
/// steps, and definitions.
#[derive(Debug, FromRow)]
pub struct InboxRow {
    pub step_instance_id: Uuid,
    pub workflow_instance_id: Uuid,
    pub workflow_code: String,
    pub workflow_name: String,
    pub workflow_version: i32,
    pub step_key: String,
    pub step_name: String,
    pub ref_type: String,
    pub ref_id: String,
    pub created_at: DateTime<Utc>,
}
