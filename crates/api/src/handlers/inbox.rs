//! Approval inbox endpoint.

use axum::extract::{Query, State};
use axum::Json;

use engine::InboxPage;

use super::{AppState, Principal};
use crate::error::ApiError;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

pub async fn list(
    State(state): State<AppState>,
    Principal(user): Principal,
    Query(query): Query<InboxQuery>,
) -> Result<Json<InboxPage>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let inbox = state.engine.inbox(&user, page, page_size).await?;
    Ok(Json(inbox))
}
