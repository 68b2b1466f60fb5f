//! Request handlers.

pub mod inbox;
pub mod instances;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use engine::WorkflowEngine;

/// Header the auth gateway forwards the caller's identity in.
pub const USER_HEADER: &str = "x-user-id";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: WorkflowEngine,
}

/// The authenticated caller, taken from the gateway header.
///
/// A missing or empty header is a 401; the engine itself never sees an
/// unauthenticated request.
pub struct Principal(pub String);

#[axum::async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Principal(v.to_owned()))
            .ok_or((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "missing x-user-id header" })),
            ))
    }
}
