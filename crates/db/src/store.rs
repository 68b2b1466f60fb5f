//! Postgres implementation of the engine's storage traits.
//!
//! One [`engine::WorkflowTx`] wraps one `sqlx` transaction; dropping it
//! without commit rolls back, which is exactly the contract the engine
//! relies on. Reads for the inbox and monitoring views run on the pool
//! outside any transaction.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use engine::{
    ActionLogEntry, InboxItem, InboxPage, InstanceDetail, InstanceStatus, Ref, StepInstance,
    StepStatus, StoreError, WorkflowDefinition, WorkflowInstance, WorkflowStore, WorkflowTx,
};

use crate::models::{
    ActionLogRow, DefinitionRow, InboxRow, InstanceRow, StepInstanceRow, StepRow,
};
use crate::DbPool;

/// Map a sqlx failure onto the engine's store error vocabulary.
fn db_err(err: sqlx::Error) -> StoreError {
    if let Some(db) = err.as_database_error() {
        if db.is_unique_violation() {
            return StoreError::DuplicateKey;
        }
    }
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        other => StoreError::Backend(anyhow!(other)),
    }
}

// ---------------------------------------------------------------------------
// PgWorkflowStore
// ---------------------------------------------------------------------------

/// Pool-backed store handle, cheap to clone.
#[derive(Clone)]
pub struct PgWorkflowStore {
    pool: DbPool,
}

impl PgWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn begin(&self) -> Result<Box<dyn WorkflowTx>, StoreError> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(PgWorkflowTx { tx }))
    }

    async fn inbox(
        &self,
        user: &str,
        page: u32,
        page_size: u32,
    ) -> Result<InboxPage, StoreError> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM workflow_step_instances si
            JOIN workflow_instances i ON i.id = si.workflow_instance_id
            WHERE si.status = 'PENDING'
              AND i.status = 'IN_PROGRESS'
              AND $1 = ANY(si.assigned_to)
            "#,
        )
        .bind(user)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
        let rows = sqlx::query_as::<_, InboxRow>(
            r#"
            SELECT si.id AS step_instance_id,
                   i.id AS workflow_instance_id,
                   d.code AS workflow_code,
                   d.name AS workflow_name,
                   d.version AS workflow_version,
                   s.step_key,
                   s.name AS step_name,
                   i.ref_type,
                   i.ref_id,
                   si.created_at
            FROM workflow_step_instances si
            JOIN workflow_instances i ON i.id = si.workflow_instance_id
            JOIN workflow_steps s ON s.id = si.step_id
            JOIN workflow_definitions d ON d.id = i.workflow_id
            WHERE si.status = 'PENDING'
              AND i.status = 'IN_PROGRESS'
              AND $1 = ANY(si.assigned_to)
            ORDER BY si.created_at ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user)
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let items = rows
            .into_iter()
            .map(|r| InboxItem {
                step_instance_id: r.step_instance_id,
                workflow_instance_id: r.workflow_instance_id,
                workflow_code: r.workflow_code,
                workflow_name: r.workflow_name,
                workflow_version: r.workflow_version,
                step_key: r.step_key,
                step_name: r.step_name,
                reference: Ref::new(r.ref_type, r.ref_id),
                created_at: r.created_at,
            })
            .collect();

        Ok(InboxPage { page, page_size, total: total as u64, items })
    }

    async fn instance_detail(
        &self,
        instance_id: Uuid,
    ) -> Result<Option<InstanceDetail>, StoreError> {
        let Some(row) = sqlx::query_as::<_, InstanceRow>(
            r#"
            SELECT id, workflow_id, workflow_version, ref_type, ref_id, status,
                   current_step_id, created_by, created_at
            FROM workflow_instances
            WHERE id = $1
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        else {
            return Ok(None);
        };
        let instance = row.into_instance()?;

        let (workflow_code, workflow_name): (String, String) = sqlx::query_as(
            r#"SELECT code, name FROM workflow_definitions WHERE id = $1"#,
        )
        .bind(instance.workflow_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let current_step_key = match instance.current_step_id {
            Some(step_id) => sqlx::query_scalar(
                r#"SELECT step_key FROM workflow_steps WHERE id = $1"#,
            )
            .bind(step_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?,
            None => None,
        };

        let step_instances = sqlx::query_as::<_, StepInstanceRow>(
            r#"
            SELECT id, workflow_instance_id, step_id, status, assigned_to,
                   acted_by, acted_at, comment, created_at
            FROM workflow_step_instances
            WHERE workflow_instance_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(StepInstanceRow::into_step_instance)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(InstanceDetail {
            instance,
            workflow_code,
            workflow_name,
            current_step_key,
            step_instances,
        }))
    }

    async fn action_trail(&self, instance_id: Uuid) -> Result<Vec<ActionLogEntry>, StoreError> {
        sqlx::query_as::<_, ActionLogRow>(
            r#"
            SELECT id, workflow_instance_id, action, from_step_id, actor_id, created_at
            FROM workflow_action_log
            WHERE workflow_instance_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(ActionLogRow::into_entry)
        .collect()
    }
}

// ---------------------------------------------------------------------------
// PgWorkflowTx
// ---------------------------------------------------------------------------

struct PgWorkflowTx {
    tx: Transaction<'static, Postgres>,
}

impl PgWorkflowTx {
    async fn load_steps(&mut self, workflow_id: Uuid) -> Result<Vec<StepRow>, StoreError> {
        sqlx::query_as::<_, StepRow>(
            r#"
            SELECT id, step_key, name, step_order, assignment_rule
            FROM workflow_steps
            WHERE workflow_id = $1
            ORDER BY step_order ASC, id ASC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)
    }
}

#[async_trait]
impl WorkflowTx for PgWorkflowTx {
    async fn active_definition(
        &mut self,
        code: &str,
    ) -> Result<Option<WorkflowDefinition>, StoreError> {
        let Some(def) = sqlx::query_as::<_, DefinitionRow>(
            r#"
            SELECT id, code, name, version, is_active
            FROM workflow_definitions
            WHERE code = $1 AND is_active
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?
        else {
            return Ok(None);
        };

        let steps = self.load_steps(def.id).await?;
        Ok(Some(def.into_definition(steps)?))
    }

    async fn pinned_definition(
        &mut self,
        workflow_id: Uuid,
        version: i32,
    ) -> Result<WorkflowDefinition, StoreError> {
        let def = sqlx::query_as::<_, DefinitionRow>(
            r#"
            SELECT id, code, name, version, is_active
            FROM workflow_definitions
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(workflow_id)
        .bind(version)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?
        .ok_or(StoreError::NotFound)?;

        let steps = self.load_steps(def.id).await?;
        def.into_definition(steps)
    }

    async fn instance_exists_for_ref(&mut self, reference: &Ref) -> Result<bool, StoreError> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM workflow_instances WHERE ref_type = $1 AND ref_id = $2
            )
            "#,
        )
        .bind(&reference.kind)
        .bind(&reference.id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_err)
    }

    async fn instance_by_id(&mut self, id: Uuid) -> Result<Option<WorkflowInstance>, StoreError> {
        sqlx::query_as::<_, InstanceRow>(
            r#"
            SELECT id, workflow_id, workflow_version, ref_type, ref_id, status,
                   current_step_id, created_by, created_at
            FROM workflow_instances
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?
        .map(InstanceRow::into_instance)
        .transpose()
    }

    async fn step_instance_by_id(&mut self, id: Uuid) -> Result<Option<StepInstance>, StoreError> {
        sqlx::query_as::<_, StepInstanceRow>(
            r#"
            SELECT id, workflow_instance_id, step_id, status, assigned_to,
                   acted_by, acted_at, comment, created_at
            FROM workflow_step_instances
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?
        .map(StepInstanceRow::into_step_instance)
        .transpose()
    }

    async fn insert_instance(&mut self, instance: &WorkflowInstance) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_instances
                (id, workflow_id, workflow_version, ref_type, ref_id, status,
                 current_step_id, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(instance.id)
        .bind(instance.workflow_id)
        .bind(instance.workflow_version)
        .bind(&instance.reference.kind)
        .bind(&instance.reference.id)
        .bind(instance.status.to_string())
        .bind(instance.current_step_id)
        .bind(&instance.created_by)
        .bind(instance.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_step_instance(&mut self, step: &StepInstance) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_step_instances
                (id, workflow_instance_id, step_id, status, assigned_to,
                 acted_by, acted_at, comment, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(step.id)
        .bind(step.workflow_instance_id)
        .bind(step.step_id)
        .bind(step.status.to_string())
        .bind(&step.assigned_to)
        .bind(&step.acted_by)
        .bind(step.acted_at)
        .bind(&step.comment)
        .bind(step.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn append_action(&mut self, entry: &ActionLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_action_log
                (id, workflow_instance_id, action, from_step_id, actor_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(entry.workflow_instance_id)
        .bind(entry.action.to_string())
        .bind(entry.from_step_id)
        .bind(&entry.actor_id)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_instance_status(
        &mut self,
        instance_id: Uuid,
        status: InstanceStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"UPDATE workflow_instances SET status = $2 WHERE id = $1"#,
        )
        .bind(instance_id)
        .bind(status.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_current_step(
        &mut self,
        instance_id: Uuid,
        step_id: Option<Uuid>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"UPDATE workflow_instances SET current_step_id = $2 WHERE id = $1"#,
        )
        .bind(instance_id)
        .bind(step_id)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn close_step_instance(
        &mut self,
        step_instance_id: Uuid,
        status: StepStatus,
        acted_by: &str,
        comment: Option<&str>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_step_instances
            SET status = $2, acted_by = $3, acted_at = now(), comment = $4
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(step_instance_id)
        .bind(status.to_string())
        .bind(acted_by)
        .bind(comment)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(db_err)
    }
}
