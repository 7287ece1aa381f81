use axum::{http::StatusCode, Json};
use serde_json::json;
use std::sync::Arc;

use crate::config::Config;
use crate::crm::CrmClient;
use crate::recording::RecordingStore;

/// Shared application state injected into handlers.
///
/// Built once at startup; requests only read from it.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// CRM the webhook events are written to.
    pub crm: Arc<dyn CrmClient>,
    /// Source of call recordings for the telephony attach step.
    pub recordings: Arc<dyn RecordingStore>,
}

/// Health check endpoint.
///
/// Returns the service status, version, and active write policy.
pub async fn health(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "write_policy": state.config.write_policy.to_string(),
        })),
    )
}
