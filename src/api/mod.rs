//! HTTP surface: the route table.

use axum::{
    routing::{any, get},
    Router,
};
use std::sync::Arc;

use crate::handlers::AppState;

/// Routes without the transport layers (tracing, CORS, limits) `main` adds.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::handlers::health))
        .route(
            "/webhook/:route",
            any(crate::webhook_handler::brightcall_webhook),
        )
        .fallback(crate::webhook_handler::unknown_path)
        .with_state(state)
}
