//! Admin helpers for the gateway settings screen

use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::api::AppState;
use crate::gateway::{GatewayError, GatewaySettings, StoreId, DEFAULT_STORE_ID};

#[derive(Debug, Default, Deserialize)]
pub struct TestConnectionQuery {
    pub url: Option<String>,
    pub store: Option<String>,
}

impl TestConnectionQuery {
    /// Blank means the default store.
    pub fn store_id(&self) -> Result<StoreId, GatewayError> {
        match self.store.as_deref().map(str::trim) {
            None | Some("") => Ok(DEFAULT_STORE_ID),
            Some(raw) => raw.parse::<StoreId>().map_err(|_| {
                GatewayError::validation(format!("store '{}' is not a numeric id", raw), "store")
            }),
        }
    }
}

/// GET /api/gateway/test-connection?url=&store=
///
/// Always answers 200; failures are reported in the body.
pub async fn test_connection(State(state): State<AppState>, request: Request) -> impl IntoResponse {
    let query = Query::<TestConnectionQuery>::try_from_uri(request.uri())
        .map(|Query(q)| q)
        .unwrap_or_default();

    let store_id = match query.store_id() {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "Gateway connection test rejected");
            return Json(json!({
                "success": false,
                "error": e.to_string(),
            }));
        }
    };

    match state
        .gateway
        .test_connection(query.url.as_deref(), store_id)
        .await
    {
        Ok(report) => {
            info!(
                url = %report.url,
                response_time_ms = report.response_time_ms as u64,
                "Gateway connection test succeeded"
            );
            Json(json!({
                "success": true,
                "status": report.status,
                "url": report.url,
                "response_time_ms": report.response_time_ms,
            }))
        }
        Err(e) => {
            warn!(store_id, error = %e, "Gateway connection test failed");
            Json(json!({
                "success": false,
                "error": e.to_string(),
            }))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FieldError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl From<GatewayError> for FieldError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::ValidationError { message, field } => FieldError { field, message },
            other => FieldError {
                field: None,
                message: other.to_string(),
            },
        }
    }
}

/// POST /api/gateway/settings/validate
pub async fn validate_settings(Json(settings): Json<GatewaySettings>) -> Response {
    match settings.normalize() {
        Ok(config) => (
            StatusCode::OK,
            Json(json!({ "success": true, "config": config })),
        )
            .into_response(),
        Err(errors) => {
            let errors: Vec<FieldError> = errors.into_iter().map(FieldError::from).collect();
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "success": false, "errors": errors })),
            )
                .into_response()
        }
    }
}
