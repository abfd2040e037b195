use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::{error, info};

use crate::api::AppState;

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let health_status = state.health_checker.check_health().await;

    if health_status.is_healthy() {
        info!("Health check passed");
        (StatusCode::OK, Json(health_status))
    } else {
        error!(status = ?health_status.status, "Health check failed");
        (StatusCode::SERVICE_UNAVAILABLE, Json(health_status))
    }
}

/// GET /health/live
pub async fn liveness() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}
