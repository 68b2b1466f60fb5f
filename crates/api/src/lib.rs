//! HTTP REST layer over the approval engine.
//!
//! Exposes:
//!   POST /api/v1/workflow-instances
//!   POST /api/v1/workflow-instances/{id}/actions
//!   GET  /api/v1/workflow-instances/{id}
//!   GET  /api/v1/workflow-instances/{id}/audit
//!   GET  /api/v1/workflow-inbox
//!
//! Callers are identified by the `x-user-id` header an auth gateway
//! injects; requests without it are rejected with 401.

pub mod error;
pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use engine::WorkflowEngine;

pub use handlers::AppState;

/// Build the application router.
pub fn create_router(engine: WorkflowEngine) -> Router {
    let api_routes = Router::new()
        .route("/workflow-instances", post(handlers::instances::create))
        .route("/workflow-instances/:id", get(handlers::instances::detail))
        .route("/workflow-instances/:id/actions", post(handlers::instances::act))
        .route("/workflow-instances/:id/audit", get(handlers::instances::audit))
        .route("/workflow-inbox", get(handlers::inbox::list));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(AppState { engine })
}

/// Bind and serve the router until the process is stopped.
pub async fn serve(bind: &str, engine: WorkflowEngine) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("API listening on {}", bind);
    axum::serve(listener, create_router(engine)).await
}
