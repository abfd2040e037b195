//! Error response formatting
//!
//! Every handler answers with the same JSON envelope:
//! `{"success": bool, "message": string}` plus a machine-readable code on
//! failures.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, ReconcileError};

/// Standardized error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,

    /// Human-readable error message
    pub message: String,

    /// Machine-readable error code
    pub error: ErrorCode,

    /// Whether the caller should retry the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_reconcile_error(error: &ReconcileError) -> Self {
        Self {
            success: false,
            message: error.user_message(),
            error: error.error_code(),
            retryable: Some(error.is_retryable()),
        }
    }

    /// Create a generic internal server error response
    pub fn internal_error() -> Self {
        Self {
            success: false,
            message: "Internal server error".to_string(),
            error: ErrorCode::InternalError,
            retryable: Some(false),
        }
    }
}

/// Success envelope for handled callbacks, no-ops included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

impl SuccessResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

impl IntoResponse for SuccessResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

impl IntoResponse for ReconcileError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Full detail stays in the server log.
        if status_code.is_server_error() {
            tracing::error!(
                error = %self,
                code = %self.error_code(),
                status = %status_code.as_u16(),
                retryable = self.is_retryable(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error = %self,
                code = %self.error_code(),
                status = %status_code.as_u16(),
                "Client error occurred"
            );
        }

        let error_response = ErrorResponse::from_reconcile_error(&self);
        (status_code, Json(error_response)).into_response()
    }
}
