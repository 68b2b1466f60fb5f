//! Core domain models, approver resolution, the storage abstraction, and
//! the approval state machine.

pub mod models;
pub mod error;
pub mod resolver;
pub mod store;
pub mod engine;

pub use models::{
    ActionKind, ActionLogEntry, Decision, InstanceStatus, Ref, StepInstance, StepStatus,
    UserId, WorkflowDefinition, WorkflowInstance, WorkflowStep, SUBMIT_STEP_KEY,
};
pub use error::EngineError;
pub use resolver::{resolve_assignees, AssignmentRule, ResolveContext};
pub use store::{
    InboxItem, InboxPage, InstanceDetail, StoreError, WorkflowStore, WorkflowTx,
};
pub use engine::{CurrentStep, InstanceState, WorkflowEngine};

#[cfg(test)]
mod engine_tests;
