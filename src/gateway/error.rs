use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Security policy violation: {message}")]
    SecurityPolicyError { message: String },

    #[error("Gateway unavailable: {message}")]
    GatewayUnavailable {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Invalid gateway response format: {message}")]
    ResponseFormatError { message: String },

    #[error("Malformed status response: {message}")]
    MalformedResponse { message: String },

    #[error("Gateway reported unhealthy status: {status}")]
    Unhealthy { status: String },
}

impl GatewayError {
    pub fn validation(message: impl Into<String>, field: &str) -> Self {
        GatewayError::ValidationError {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        GatewayError::ConfigurationError {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        GatewayError::MalformedResponse {
            message: message.into(),
        }
    }

    /// Upstream problems leave the order untouched; a resent callback can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::ValidationError { .. } => false,
            GatewayError::ConfigurationError { .. } => false,
            GatewayError::SecurityPolicyError { .. } => false,
            GatewayError::GatewayUnavailable { .. } => true,
            GatewayError::ResponseFormatError { .. } => true,
            GatewayError::MalformedResponse { .. } => true,
            GatewayError::Unhealthy { .. } => true,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            GatewayError::ValidationError { .. } => 400,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_errors_map_to_server_errors() {
        let err = GatewayError::GatewayUnavailable {
            message: "HTTP 502".to_string(),
            status_code: Some(502),
        };
        assert_eq!(err.http_status_code(), 500);
        assert!(err.is_retryable());

        assert_eq!(
            GatewayError::malformed("missing status").http_status_code(),
            500
        );
    }

    #[test]
    fn test_misconfiguration_is_not_retryable() {
        assert!(!GatewayError::configuration("merchant id missing").is_retryable());
        assert!(!GatewayError::SecurityPolicyError {
            message: "https required".to_string()
        }
        .is_retryable());
        assert_eq!(
            GatewayError::validation("order id required", "order_id").http_status_code(),
            400
        );
    }
}
