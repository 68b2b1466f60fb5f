//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use engine::EngineError;

/// Wrapper turning an [`EngineError`] into an HTTP response.
///
/// Configuration defects and storage failures collapse to an opaque
/// 500; their detail goes to the log, not the client.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::DefinitionNotFound { .. }
            | EngineError::InstanceNotFound(_)
            | EngineError::StepInstanceNotFound(_) => StatusCode::NOT_FOUND,

            EngineError::DuplicateInstance { .. } | EngineError::InvalidState { .. } => {
                StatusCode::CONFLICT
            }

            EngineError::NotAuthorized { .. } => StatusCode::FORBIDDEN,

            EngineError::MissingSubmitStep { .. }
            | EngineError::UnresolvableAssignment { .. }
            | EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {}", self.0);
            "internal error".to_owned()
        } else {
            self.0.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
