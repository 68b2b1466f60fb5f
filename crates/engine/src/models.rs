//! Core domain models for the approval engine.
//!
//! These types are the source of truth for what a workflow definition,
//! a running instance, and its per-step records look like in memory.
//! The `db` crate maps them onto relational rows; the API layer
//! serialises them onto the wire.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque user identifier issued by the external auth system.
pub type UserId = String;

/// Step key every definition must contain; submission starts here.
pub const SUBMIT_STEP_KEY: &str = "SUBMIT";

// ---------------------------------------------------------------------------
// Ref
// ---------------------------------------------------------------------------

/// Typed reference to the business object an instance is approving.
///
/// The engine never dereferences it; `kind` scopes the `id` so one
/// engine serves any number of business-object kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    /// Business-object kind, e.g. `"project_proposal"`.
    #[serde(rename = "refType")]
    pub kind: String,
    /// Identifier within that kind.
    #[serde(rename = "refId")]
    pub id: String,
}

impl Ref {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self { kind: kind.into(), id: id.into() }
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow instance.
///
/// `Approved` and `Rejected` are terminal; an instance in either state
/// never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    InProgress,
    Approved,
    Rejected,
}

impl InstanceStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

impl FromStr for InstanceStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(Self::InProgress),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(format!("unknown instance status: {other}")),
        }
    }
}

/// Status of a single step instance.
///
/// `Pending -> {Approved, Rejected}` happens exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

impl FromStr for StepStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(format!("unknown step status: {other}")),
        }
    }
}

/// Kind of transition recorded in the action log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Submit,
    Approve,
    Reject,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submit => write!(f, "SUBMIT"),
            Self::Approve => write!(f, "APPROVE"),
            Self::Reject => write!(f, "REJECT"),
        }
    }
}

impl FromStr for ActionKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMIT" => Ok(Self::Submit),
            "APPROVE" => Ok(Self::Approve),
            "REJECT" => Ok(Self::Reject),
            other => Err(format!("unknown action kind: {other}")),
        }
    }
}

/// Verdict an assignee passes on a pending step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Reject,
}

// ---------------------------------------------------------------------------
// WorkflowStep
// ---------------------------------------------------------------------------

/// One step of a published workflow definition. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: Uuid,
    /// Symbolic name, unique within the definition (e.g. `"SUBMIT"`).
    pub step_key: String,
    pub name: String,
    /// Position in the linear sequence; the engine advances in
    /// ascending `step_order`.
    pub step_order: i32,
    pub assignment_rule: crate::resolver::AssignmentRule,
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A published, versioned workflow template. Read-only to the engine;
/// authored and versioned by administrative tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub id: Uuid,
    /// Business key, e.g. `"PROJECT_PROPOSAL"`.
    pub code: String,
    pub name: String,
    /// Monotonically increasing per `code`.
    pub version: i32,
    pub is_active: bool,
    /// Steps in stored order, sorted by `step_order`.
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    /// The mandatory entry step, if the definition carries one.
    pub fn submit_step(&self) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.step_key == SUBMIT_STEP_KEY)
    }

    /// First step strictly after `floor` in `step_order`.
    ///
    /// Ties on `step_order` are not defined behaviour; with the steps in
    /// stored order the earliest row wins, which matches what the
    /// dashboard has always done.
    pub fn next_step_after(&self, floor: i32) -> Option<&WorkflowStep> {
        self.steps
            .iter()
            .filter(|s| s.step_order > floor)
            .min_by_key(|s| s.step_order)
    }

    pub fn step_by_id(&self, id: Uuid) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

// ---------------------------------------------------------------------------
// WorkflowInstance
// ---------------------------------------------------------------------------

/// A single run of a definition against one business object.
///
/// Pinned to the definition version current at creation time; retained
/// forever as an audit artifact, even if the referenced business object
/// disappears.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_version: i32,
    #[serde(flatten)]
    pub reference: Ref,
    pub status: InstanceStatus,
    /// Step the instance is waiting on; meaningless once terminal.
    pub current_step_id: Option<Uuid>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// StepInstance
// ---------------------------------------------------------------------------

/// Execution record of one step within one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInstance {
    pub id: Uuid,
    pub workflow_instance_id: Uuid,
    pub step_id: Uuid,
    pub status: StepStatus,
    /// Users allowed to act on this step. Never empty for a pending step.
    pub assigned_to: Vec<UserId>,
    pub acted_by: Option<UserId>,
    pub acted_at: Option<DateTime<Utc>>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StepInstance {
    pub fn is_assigned_to(&self, user: &str) -> bool {
        self.assigned_to.iter().any(|u| u == user)
    }
}

// ---------------------------------------------------------------------------
// ActionLogEntry
// ---------------------------------------------------------------------------

/// Append-only audit record of one instance transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLogEntry {
    pub id: Uuid,
    pub workflow_instance_id: Uuid,
    pub action: ActionKind,
    pub from_step_id: Uuid,
    pub actor_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::AssignmentRule;

    fn step(key: &str, order: i32) -> WorkflowStep {
        WorkflowStep {
            id: Uuid::new_v4(),
            step_key: key.into(),
            name: key.to_lowercase(),
            step_order: order,
            assignment_rule: AssignmentRule::Submitter,
        }
    }

    fn definition(steps: Vec<WorkflowStep>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::new_v4(),
            code: "WF".into(),
            name: "Test".into(),
            version: 1,
            is_active: true,
            steps,
        }
    }

    #[test]
    fn submit_step_is_found_by_key() {
        let def = definition(vec![step("SUBMIT", 1), step("REVIEW", 2)]);
        assert_eq!(def.submit_step().unwrap().step_key, "SUBMIT");
    }

    #[test]
    fn next_step_after_skips_to_smallest_greater_order() {
        let def = definition(vec![step("SUBMIT", 1), step("FINAL", 30), step("REVIEW", 2)]);
        assert_eq!(def.next_step_after(1).unwrap().step_key, "REVIEW");
        assert_eq!(def.next_step_after(2).unwrap().step_key, "FINAL");
        assert!(def.next_step_after(30).is_none());
    }

    #[test]
    fn tied_step_order_prefers_stored_order() {
        let def = definition(vec![step("SUBMIT", 1), step("A", 2), step("B", 2)]);
        assert_eq!(def.next_step_after(1).unwrap().step_key, "A");
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in ["IN_PROGRESS", "APPROVED", "REJECTED"] {
            assert_eq!(s.parse::<InstanceStatus>().unwrap().to_string(), s);
        }
        for s in ["PENDING", "APPROVED", "REJECTED"] {
            assert_eq!(s.parse::<StepStatus>().unwrap().to_string(), s);
        }
        for s in ["SUBMIT", "APPROVE", "REJECT"] {
            assert_eq!(s.parse::<ActionKind>().unwrap().to_string(), s);
        }
        assert!("WAITING".parse::<StepStatus>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!InstanceStatus::InProgress.is_terminal());
        assert!(InstanceStatus::Approved.is_terminal());
        assert!(InstanceStatus::Rejected.is_terminal());
    }
}
