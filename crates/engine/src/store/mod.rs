//! Storage abstraction the engine drives.
//!
//! The engine owns the state machine; a [`WorkflowStore`] owns
//! durability. Every engine operation runs against one [`WorkflowTx`]
//! obtained from [`WorkflowStore::begin`]; dropping a transaction
//! without committing rolls it back, so a failure mid-operation leaves
//! no partial state behind. The datastore transaction is the only
//! concurrency-control primitive in the subsystem.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    ActionLogEntry, InstanceStatus, Ref, StepInstance, StepStatus, WorkflowDefinition,
    WorkflowInstance,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row the operation depends on does not exist.
    #[error("row not found")]
    NotFound,

    /// An insert violated a uniqueness guarantee (e.g. one instance per
    /// business reference). The engine maps this to a duplicate-instance
    /// conflict.
    #[error("uniqueness violation")]
    DuplicateKey,

    /// Anything else the backend reports.
    #[error("storage backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Read-model projections
// ---------------------------------------------------------------------------

/// One pending item in a user's approval inbox.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxItem {
    pub step_instance_id: Uuid,
    pub workflow_instance_id: Uuid,
    pub workflow_code: String,
    pub workflow_name: String,
    pub workflow_version: i32,
    pub step_key: String,
    pub step_name: String,
    #[serde(flatten)]
    pub reference: Ref,
    pub created_at: DateTime<Utc>,
}

/// A page of inbox items, oldest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxPage {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub items: Vec<InboxItem>,
}

/// Monitoring projection of one instance: the instance itself, its
/// definition metadata, and every step-instance row so far.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDetail {
    pub instance: WorkflowInstance,
    pub workflow_code: String,
    pub workflow_name: String,
    /// Key of the step the instance is waiting on, if any.
    pub current_step_key: Option<String>,
    pub step_instances: Vec<StepInstance>,
}

// ---------------------------------------------------------------------------
// Store traits
// ---------------------------------------------------------------------------

/// A transactional datastore for workflow state.
///
/// The reads here back the dashboard's inbox, monitoring, and audit
/// views and need no transaction; all writes go through [`WorkflowTx`].
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Open a transaction covering one engine operation.
    async fn begin(&self) -> Result<Box<dyn WorkflowTx>, StoreError>;

    /// Pending step instances assigned to `user` whose owning instance
    /// is still in progress, oldest first. `page` is 1-based.
    async fn inbox(&self, user: &str, page: u32, page_size: u32)
        -> Result<InboxPage, StoreError>;

    /// Full monitoring projection of one instance, or `None`.
    async fn instance_detail(&self, instance_id: Uuid)
        -> Result<Option<InstanceDetail>, StoreError>;

    /// The instance's audit trail, oldest first.
    async fn action_trail(&self, instance_id: Uuid)
        -> Result<Vec<ActionLogEntry>, StoreError>;
}

/// One open transaction. All writes of a single engine operation happen
/// through one of these and become visible only at [`WorkflowTx::commit`].
#[async_trait]
pub trait WorkflowTx: Send {
    /// The active definition for `code`, steps ordered by `step_order`.
    async fn active_definition(&mut self, code: &str)
        -> Result<Option<WorkflowDefinition>, StoreError>;

    /// The definition an instance is pinned to, regardless of the
    /// active flag. Fails with [`StoreError::NotFound`] if the pinned
    /// version has vanished (data corruption, not a user error).
    async fn pinned_definition(&mut self, workflow_id: Uuid, version: i32)
        -> Result<WorkflowDefinition, StoreError>;

    /// Whether any instance, terminal or not, exists for the reference.
    async fn instance_exists_for_ref(&mut self, reference: &Ref) -> Result<bool, StoreError>;

    async fn instance_by_id(&mut self, id: Uuid)
        -> Result<Option<WorkflowInstance>, StoreError>;

    async fn step_instance_by_id(&mut self, id: Uuid)
        -> Result<Option<StepInstance>, StoreError>;

    /// Insert a new instance. Fails with [`StoreError::DuplicateKey`] if
    /// a racing creation already inserted one for the same reference.
    async fn insert_instance(&mut self, instance: &WorkflowInstance) -> Result<(), StoreError>;

    async fn insert_step_instance(&mut self, step: &StepInstance) -> Result<(), StoreError>;

    async fn append_action(&mut self, entry: &ActionLogEntry) -> Result<(), StoreError>;

    async fn set_instance_status(&mut self, instance_id: Uuid, status: InstanceStatus)
        -> Result<(), StoreError>;

    async fn set_current_step(&mut self, instance_id: Uuid, step_id: Option<Uuid>)
        -> Result<(), StoreError>;

    /// Conditionally close a pending step instance
    /// (`WHERE status = 'PENDING'`). Returns `false` when the step was
    /// not pending any more: the caller lost a race and must not
    /// advance the instance.
    async fn close_step_instance(
        &mut self,
        step_instance_id: Uuid,
        status: StepStatus,
        acted_by: &str,
        comment: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Commit all writes. Consumes the transaction.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
