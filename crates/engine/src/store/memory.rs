//! In-memory [`WorkflowStore`] used by the test-suites.
//!
//! Transactions take the store's single mutex for their whole lifetime,
//! so operations are serialized exactly like they would be by the
//! database; a transaction dropped without commit restores the snapshot
//! taken at `begin`, giving real rollback semantics. No Postgres
//! required to exercise the full state machine.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::{
    ActionLogEntry, InstanceStatus, Ref, StepInstance, StepStatus, WorkflowDefinition,
    WorkflowInstance,
};
use crate::store::{
    InboxItem, InboxPage, InstanceDetail, StoreError, WorkflowStore, WorkflowTx,
};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Everything the store holds. Rows live in insertion order, which
/// doubles as the `created_at` ordering the queries rely on.
#[derive(Debug, Default, Clone)]
struct State {
    definitions: Vec<WorkflowDefinition>,
    instances: Vec<WorkflowInstance>,
    step_instances: Vec<StepInstance>,
    log: Vec<ActionLogEntry>,
}

/// Clone a definition with its steps in `step_order` (stable, so the
/// stored order breaks ties the way the database would return them).
fn ordered(def: &WorkflowDefinition) -> WorkflowDefinition {
    let mut def = def.clone();
    def.steps.sort_by_key(|s| s.step_order);
    def
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Shared in-memory store handle.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a definition. Definitions are authored by administrative
    /// tooling outside the engine, so this is not part of the store
    /// trait.
    pub async fn publish_definition(&self, def: WorkflowDefinition) {
        self.state.lock().await.definitions.push(def);
    }

    /// Flip the active flag of a published definition.
    pub async fn set_definition_active(&self, definition_id: Uuid, is_active: bool) {
        let mut state = self.state.lock().await;
        if let Some(def) = state.definitions.iter_mut().find(|d| d.id == definition_id) {
            def.is_active = is_active;
        }
    }

    pub async fn instance_count(&self) -> usize {
        self.state.lock().await.instances.len()
    }

    pub async fn step_instance_count(&self) -> usize {
        self.state.lock().await.step_instances.len()
    }

    pub async fn action_count(&self) -> usize {
        self.state.lock().await.log.len()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn WorkflowTx>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryTx { guard, snapshot, committed: false }))
    }

    async fn inbox(
        &self,
        user: &str,
        page: u32,
        page_size: u32,
    ) -> Result<InboxPage, StoreError> {
        let state = self.state.lock().await;

        let pending: Vec<&StepInstance> = state
            .step_instances
            .iter()
            .filter(|si| si.status == StepStatus::Pending && si.is_assigned_to(user))
            .filter(|si| {
                state
                    .instances
                    .iter()
                    .any(|i| i.id == si.workflow_instance_id
                        && i.status == InstanceStatus::InProgress)
            })
            .collect();

        let total = pending.len() as u64;
        let skip = page.saturating_sub(1) as usize * page_size as usize;

        let items = pending
            .into_iter()
            .skip(skip)
            .take(page_size as usize)
            .map(|si| {
                let instance = state
                    .instances
                    .iter()
                    .find(|i| i.id == si.workflow_instance_id)
                    .ok_or(StoreError::NotFound)?;
                let def = state
                    .definitions
                    .iter()
                    .find(|d| d.id == instance.workflow_id
                        && d.version == instance.workflow_version)
                    .ok_or(StoreError::NotFound)?;
                let step = def.step_by_id(si.step_id).ok_or(StoreError::NotFound)?;

                Ok(InboxItem {
                    step_instance_id: si.id,
                    workflow_instance_id: instance.id,
                    workflow_code: def.code.clone(),
                    workflow_name: def.name.clone(),
                    workflow_version: def.version,
                    step_key: step.step_key.clone(),
                    step_name: step.name.clone(),
                    reference: instance.reference.clone(),
                    created_at: si.created_at,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(InboxPage { page, page_size, total, items })
    }

    async fn instance_detail(
        &self,
        instance_id: Uuid,
    ) -> Result<Option<InstanceDetail>, StoreError> {
        let state = self.state.lock().await;

        let Some(instance) = state.instances.iter().find(|i| i.id == instance_id) else {
            return Ok(None);
        };
        let def = state
            .definitions
            .iter()
            .find(|d| d.id == instance.workflow_id && d.version == instance.workflow_version)
            .ok_or(StoreError::NotFound)?;

        let current_step_key = instance
            .current_step_id
            .and_then(|id| def.step_by_id(id))
            .map(|s| s.step_key.clone());

        let step_instances = state
            .step_instances
            .iter()
            .filter(|si| si.workflow_instance_id == instance_id)
            .cloned()
            .collect();

        Ok(Some(InstanceDetail {
            instance: instance.clone(),
            workflow_code: def.code.clone(),
            workflow_name: def.name.clone(),
            current_step_key,
            step_instances,
        }))
    }

    async fn action_trail(&self, instance_id: Uuid) -> Result<Vec<ActionLogEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .log
            .iter()
            .filter(|e| e.workflow_instance_id == instance_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryTx
// ---------------------------------------------------------------------------

struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    snapshot: State,
    committed: bool,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.committed {
            *self.guard = std::mem::take(&mut self.snapshot);
        }
    }
}

#[async_trait]
impl WorkflowTx for MemoryTx {
    async fn active_definition(
        &mut self,
        code: &str,
    ) -> Result<Option<WorkflowDefinition>, StoreError> {
        Ok(self
            .guard
            .definitions
            .iter()
            .filter(|d| d.code == code && d.is_active)
            .max_by_key(|d| d.version)
            .map(ordered))
    }

    async fn pinned_definition(
        &mut self,
        workflow_id: Uuid,
        version: i32,
    ) -> Result<WorkflowDefinition, StoreError> {
        self.guard
            .definitions
            .iter()
            .find(|d| d.id == workflow_id && d.version == version)
            .map(ordered)
            .ok_or(StoreError::NotFound)
    }

    async fn instance_exists_for_ref(&mut self, reference: &Ref) -> Result<bool, StoreError> {
        Ok(self.guard.instances.iter().any(|i| &i.reference == reference))
    }

    async fn instance_by_id(&mut self, id: Uuid) -> Result<Option<WorkflowInstance>, StoreError> {
        Ok(self.guard.instances.iter().find(|i| i.id == id).cloned())
    }

    async fn step_instance_by_id(&mut self, id: Uuid) -> Result<Option<StepInstance>, StoreError> {
        Ok(self.guard.step_instances.iter().find(|s| s.id == id).cloned())
    }

    async fn insert_instance(&mut self, instance: &WorkflowInstance) -> Result<(), StoreError> {
        // Mirror the unique index on (ref_type, ref_id).
        if self.guard.instances.iter().any(|i| i.reference == instance.reference) {
            return Err(StoreError::DuplicateKey);
        }
        self.guard.instances.push(instance.clone());
        Ok(())
    }

    async fn insert_step_instance(&mut self, step: &StepInstance) -> Result<(), StoreError> {
        self.guard.step_instances.push(step.clone());
        Ok(())
    }

    async fn append_action(&mut self, entry: &ActionLogEntry) -> Result<(), StoreError> {
        self.guard.log.push(entry.clone());
        Ok(())
    }

    async fn set_instance_status(
        &mut self,
        instance_id: Uuid,
        status: InstanceStatus,
    ) -> Result<(), StoreError> {
        let instance = self
            .guard
            .instances
            .iter_mut()
            .find(|i| i.id == instance_id)
            .ok_or(StoreError::NotFound)?;
        instance.status = status;
        Ok(())
    }

    async fn set_current_step(
        &mut self,
        instance_id: Uuid,
        step_id: Option<Uuid>,
    ) -> Result<(), StoreError> {
        let instance = self
            .guard
            .instances
            .iter_mut()
            .find(|i| i.id == instance_id)
            .ok_or(StoreError::NotFound)?;
        instance.current_step_id = step_id;
        Ok(())
    }

    async fn close_step_instance(
        &mut self,
        step_instance_id: Uuid,
        status: StepStatus,
        acted_by: &str,
        comment: Option<&str>,
    ) -> Result<bool, StoreError> {
        let Some(step) = self
            .guard
            .step_instances
            .iter_mut()
            .find(|s| s.id == step_instance_id && s.status == StepStatus::Pending)
        else {
            return Ok(false);
        };

        step.status = status;
        step.acted_by = Some(acted_by.to_owned());
        step.acted_at = Some(Utc::now());
        step.comment = comment.map(str::to_owned);
        Ok(true)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.committed = true;
        Ok(())
    }
}
