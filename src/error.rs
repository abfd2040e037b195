//! Error handling for the callback pipeline
//!
//! Every failure the reconciler can hit maps to an HTTP status, a
//! machine-readable code and a message that is safe to show the caller.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::orders::StoreError;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Rejected input (4xx)
    ValidationError,
    UnauthorizedOrigin,
    OrderNotFound,
    OrderMismatch,
    AmountMismatch,
    AmountMissing,
    OrderNotPayable,

    // Gateway and infrastructure (5xx)
    GatewayInactive,
    GatewayError,
    ConfigurationError,
    DatabaseError,
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::UnauthorizedOrigin => "UNAUTHORIZED_ORIGIN",
            ErrorCode::OrderNotFound => "ORDER_NOT_FOUND",
            ErrorCode::OrderMismatch => "ORDER_MISMATCH",
            ErrorCode::AmountMismatch => "AMOUNT_MISMATCH",
            ErrorCode::AmountMissing => "AMOUNT_MISSING",
            ErrorCode::OrderNotPayable => "ORDER_NOT_PAYABLE",
            ErrorCode::GatewayInactive => "GATEWAY_INACTIVE",
            ErrorCode::GatewayError => "GATEWAY_ERROR",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        f.write_str(code)
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<&'static str>,
    },

    #[error("callback from {ip} is not in the allowlist")]
    UnauthorizedOrigin { ip: String },

    #[error("order {order_id} not found")]
    OrderNotFound { order_id: String },

    #[error("gateway reported order {reported} for order {expected}")]
    OrderMismatch { expected: String, reported: String },

    #[error("order {order_id}: paid {paid} does not match total {expected}")]
    AmountMismatch {
        order_id: String,
        expected: Decimal,
        paid: Decimal,
    },

    #[error("gateway response for order {order_id} carries no amount")]
    AmountMissing { order_id: String },

    #[error("order {order_id} cannot be paid in state {state}")]
    OrderNotPayable { order_id: String, state: String },

    #[error("payment gateway is disabled for store {store_id}")]
    GatewayInactive { store_id: u32 },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    pub fn validation(message: impl Into<String>, field: &'static str) -> Self {
        ReconcileError::Validation {
            message: message.into(),
            field: Some(field),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ReconcileError::Validation { .. }
            | ReconcileError::OrderNotFound { .. }
            | ReconcileError::OrderMismatch { .. }
            | ReconcileError::AmountMismatch { .. }
            | ReconcileError::AmountMissing { .. } => 400,
            ReconcileError::UnauthorizedOrigin { .. } => 403,
            ReconcileError::OrderNotPayable { .. } => 409,
            ReconcileError::GatewayInactive { .. } => 503,
            ReconcileError::Gateway(err) => err.http_status_code(),
            ReconcileError::Store(err) => match err {
                StoreError::NotFound { .. } => 400,
                StoreError::InvalidTransition { .. } => 409,
                _ => 500,
            },
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            ReconcileError::Validation { .. } => ErrorCode::ValidationError,
            ReconcileError::UnauthorizedOrigin { .. } => ErrorCode::UnauthorizedOrigin,
            ReconcileError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
            ReconcileError::OrderMismatch { .. } => ErrorCode::OrderMismatch,
            ReconcileError::AmountMismatch { .. } => ErrorCode::AmountMismatch,
            ReconcileError::AmountMissing { .. } => ErrorCode::AmountMissing,
            ReconcileError::OrderNotPayable { .. } => ErrorCode::OrderNotPayable,
            ReconcileError::GatewayInactive { .. } => ErrorCode::GatewayInactive,
            ReconcileError::Gateway(err) => match err {
                GatewayError::ValidationError { .. } => ErrorCode::ValidationError,
                GatewayError::ConfigurationError { .. }
                | GatewayError::SecurityPolicyError { .. } => ErrorCode::ConfigurationError,
                _ => ErrorCode::GatewayError,
            },
            ReconcileError::Store(err) => match err {
                StoreError::NotFound { .. } => ErrorCode::OrderNotFound,
                StoreError::InvalidTransition { .. } => ErrorCode::OrderNotPayable,
                StoreError::Database { .. } => ErrorCode::DatabaseError,
                _ => ErrorCode::InternalError,
            },
        }
    }

    /// Message safe to return to the caller. Server errors never carry
    /// upstream detail.
    pub fn user_message(&self) -> String {
        match self {
            ReconcileError::Validation { message, .. } => message.clone(),
            ReconcileError::UnauthorizedOrigin { .. } => "Unauthorized request".to_string(),
            ReconcileError::OrderNotFound { .. } => "Order not found".to_string(),
            ReconcileError::OrderMismatch { .. } => "Order ID mismatch".to_string(),
            ReconcileError::AmountMismatch { .. } => "Payment amount mismatch".to_string(),
            ReconcileError::AmountMissing { .. } => {
                "Payment amount missing from gateway response".to_string()
            }
            ReconcileError::OrderNotPayable { .. } => {
                "Order can no longer be paid".to_string()
            }
            ReconcileError::GatewayInactive { .. } => {
                "Payment method is currently unavailable".to_string()
            }
            ReconcileError::Gateway(GatewayError::ValidationError { message, .. }) => {
                message.clone()
            }
            ReconcileError::Store(StoreError::NotFound { .. }) => "Order not found".to_string(),
            ReconcileError::Store(StoreError::InvalidTransition { .. }) => {
                "Order can no longer be paid".to_string()
            }
            ReconcileError::Gateway(_) | ReconcileError::Store(_) => {
                "Internal server error".to_string()
            }
        }
    }

    /// Upstream and transient storage failures leave the order untouched, so
    /// the gateway's next delivery can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Gateway(err) => err.is_retryable(),
            ReconcileError::Store(StoreError::Database { is_retryable, .. }) => *is_retryable,
            _ => false,
        }
    }
}
