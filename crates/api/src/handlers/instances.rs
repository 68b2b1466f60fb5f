//! Workflow instance endpoints: creation, decisions, monitoring, audit.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use engine::{ActionLogEntry, Decision, InstanceDetail, InstanceState, Ref};

use super::{AppState, Principal};
use crate::error::ApiError;

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceDto {
    pub workflow_code: String,
    pub ref_type: String,
    pub ref_id: String,
}

pub async fn create(
    State(state): State<AppState>,
    Principal(user): Principal,
    Json(payload): Json<CreateInstanceDto>,
) -> Result<(StatusCode, Json<InstanceState>), ApiError> {
    let reference = Ref::new(payload.ref_type, payload.ref_id);
    let instance = state
        .engine
        .create_instance(&payload.workflow_code, reference, &user)
        .await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDto {
    pub step_instance_id: Uuid,
    pub decision: Decision,
    pub comment: Option<String>,
}

pub async fn act(
    State(state): State<AppState>,
    Principal(user): Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<ActionDto>,
) -> Result<Json<InstanceState>, ApiError> {
    let instance = state
        .engine
        .advance(
            id,
            payload.step_instance_id,
            &user,
            payload.decision,
            payload.comment.as_deref(),
        )
        .await?;
    Ok(Json(instance))
}

pub async fn detail(
    State(state): State<AppState>,
    Principal(_user): Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<InstanceDetail>, ApiError> {
    let detail = state.engine.instance_detail(id).await?;
    Ok(Json(detail))
}

pub async fn audit(
    State(state): State<AppState>,
    Principal(_user): Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ActionLogEntry>>, ApiError> {
    // Return 404 for unknown ids instead of an empty trail.
    state.engine.instance_detail(id).await?;
    let trail = state.engine.action_trail(id).await?;
    Ok(Json(trail))
}
