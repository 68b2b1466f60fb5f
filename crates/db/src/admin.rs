//! Administrative writes the engine itself never performs.
//!
//! Definitions are authored and versioned by operators; the engine only
//! reads them. These helpers back the CLI's `seed` command.

use tracing::info;

use engine::WorkflowDefinition;

use crate::{DbError, DbPool};

/// Publish a definition and its steps.
///
/// Idempotent on `(code, version)`: re-running a seed against a database
/// that already carries the definition is a no-op.
pub async fn publish_definition(pool: &DbPool, def: &WorkflowDefinition) -> Result<bool, DbError> {
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO workflow_definitions (id, code, name, version, is_active)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (code, version) DO NOTHING
        "#,
    )
    .bind(def.id)
    .bind(&def.code)
    .bind(&def.name)
    .bind(def.version)
    .bind(def.is_active)
    .execute(&mut *tx)
    .await?
    .rows_affected()
        == 1;

    if !inserted {
        info!("definition {} v{} already present, skipping", def.code, def.version);
        return Ok(false);
    }

    for step in &def.steps {
        sqlx::query(
            r#"
            INSERT INTO workflow_steps
                (id, workflow_id, step_key, name, step_order, assignment_rule)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(step.id)
        .bind(def.id)
        .bind(&step.step_key)
        .bind(&step.name)
        .bind(step.step_order)
        .bind(step.assignment_rule.as_str())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    info!("published definition {} v{} ({} steps)", def.code, def.version, def.steps.len());
    Ok(true)
}
