use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::gateway::config::{validate_gateway_url, GatewayConfig, GatewayConfigProvider, StoreId};
use crate::gateway::error::{GatewayError, GatewayResult};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub url: String,
    pub status: String,
    pub response_time_ms: u128,
}

/// Outbound operations against the remote payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Browser redirect target for an order; never called programmatically.
    fn build_payment_url(
        &self,
        order_id: &str,
        amount: Decimal,
        store_id: StoreId,
    ) -> GatewayResult<String>;

    /// Raw `/status/{payment_id}` object, to be validated by `StatusResponse::parse`.
    async fn get_payment_status(
        &self,
        payment_id: &str,
        store_id: StoreId,
    ) -> GatewayResult<Map<String, JsonValue>>;

    async fn test_connection(
        &self,
        custom_url: Option<&str>,
        store_id: StoreId,
    ) -> GatewayResult<HealthReport>;
}

/// `round(amount * 100)` with halves rounded away from zero.
pub fn amount_to_cents(amount: Decimal) -> GatewayResult<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| GatewayError::validation("amount is out of range", "amount"))
}

#[derive(Clone)]
pub struct GatewayClient {
    http: Client,
    config: Arc<dyn GatewayConfigProvider>,
    timeout: Duration,
}

impl GatewayClient {
    pub fn new(config: Arc<dyn GatewayConfigProvider>) -> GatewayResult<Self> {
        Self::with_timeout(config, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        config: Arc<dyn GatewayConfigProvider>,
        timeout: Duration,
    ) -> GatewayResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::GatewayUnavailable {
                message: format!("failed to initialize HTTP client: {}", e),
                status_code: None,
            })?;

        Ok(Self {
            http,
            config,
            timeout,
        })
    }

    fn base_url(config: &GatewayConfig) -> GatewayResult<Url> {
        let raw = config
            .gateway_url
            .as_deref()
            .ok_or_else(|| GatewayError::configuration("gateway URL is not configured"))?;
        Url::parse(raw)
            .map_err(|e| GatewayError::configuration(format!("gateway URL is not valid: {}", e)))
    }

    fn endpoint(base: &Url, segments: &[&str]) -> GatewayResult<Url> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::configuration("gateway URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json(&self, url: &Url) -> GatewayResult<JsonValue> {
        let response = self
            .http
            .get(url.as_str())
            .header(ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| GatewayError::GatewayUnavailable {
                message: if e.is_timeout() {
                    format!("request timed out after {}s", self.timeout.as_secs())
                } else {
                    format!("request failed: {}", e)
                },
                status_code: None,
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::GatewayUnavailable {
                message: format!("failed to read response body: {}", e),
                status_code: Some(status.as_u16()),
            })?;

        if status != StatusCode::OK {
            debug!(url = %url, status = %status, body = %text, "gateway returned non-200");
            return Err(GatewayError::GatewayUnavailable {
                message: format!("HTTP {}", status),
                status_code: Some(status.as_u16()),
            });
        }

        serde_json::from_str::<JsonValue>(&text).map_err(|e| GatewayError::ResponseFormatError {
            message: format!("response is not valid JSON: {}", e),
        })
    }
}

#[async_trait]
impl PaymentGateway for GatewayClient {
    fn build_payment_url(
        &self,
        order_id: &str,
        amount: Decimal,
        store_id: StoreId,
    ) -> GatewayResult<String> {
        if order_id.trim().is_empty() {
            return Err(GatewayError::validation("order ID is required", "order_id"));
        }
        if amount <= Decimal::ZERO {
            return Err(GatewayError::validation(
                "amount must be greater than zero",
                "amount",
            ));
        }

        let config = self.config.gateway_config(store_id)?;
        let base = Self::base_url(&config)?;
        let merchant_id = config
            .merchant_id
            .ok_or_else(|| GatewayError::configuration("merchant ID is not configured"))?;

        if config.should_enforce_https(self.config.environment()) && base.scheme() != "https" {
            return Err(GatewayError::SecurityPolicyError {
                message: "gateway URL must use https in production".to_string(),
            });
        }

        let cents = amount_to_cents(amount)?;
        let mut url = Self::endpoint(&base, &["pay"])?;
        url.query_pairs_mut()
            .append_pair("price", &cents.to_string())
            .append_pair("merchant", &merchant_id.to_string())
            .append_pair("order_id", order_id);

        info!(
            order_id = %order_id,
            store_id = store_id,
            price_cents = cents,
            merchant_id = merchant_id,
            "built gateway payment URL"
        );

        Ok(url.to_string())
    }

    async fn get_payment_status(
        &self,
        payment_id: &str,
        store_id: StoreId,
    ) -> GatewayResult<Map<String, JsonValue>> {
        if payment_id.trim().is_empty() {
            return Err(GatewayError::validation(
                "payment ID is required",
                "payment_id",
            ));
        }

        let config = self.config.gateway_config(store_id)?;
        let base = Self::base_url(&config)?;
        let url = Self::endpoint(&base, &["status", payment_id])?;

        let body = self.get_json(&url).await?;
        if config.debug_mode {
            info!(payment_id = %payment_id, payload = %body, "gateway status response");
        } else {
            debug!(payment_id = %payment_id, payload = %body, "gateway status response");
        }

        match body {
            JsonValue::Object(map) => Ok(map),
            other => Err(GatewayError::ResponseFormatError {
                message: format!("expected a JSON object, got {}", json_kind(&other)),
            }),
        }
    }

    async fn test_connection(
        &self,
        custom_url: Option<&str>,
        store_id: StoreId,
    ) -> GatewayResult<HealthReport> {
        let base = match custom_url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(raw) => {
                let normalized = validate_gateway_url(raw)?;
                Url::parse(&normalized).map_err(|e| {
                    GatewayError::validation(format!("gateway URL is not valid: {}", e), "url")
                })?
            }
            None => Self::base_url(&self.config.gateway_config(store_id)?)?,
        };
        let url = Self::endpoint(&base, &["health"])?;

        let start = Instant::now();
        let body = self.get_json(&url).await?;
        let response_time_ms = start.elapsed().as_millis();

        let status = match &body {
            JsonValue::Object(map) => map
                .get("status")
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string(),
            other => {
                return Err(GatewayError::ResponseFormatError {
                    message: format!("expected a JSON object, got {}", json_kind(other)),
                })
            }
        };

        if status != "healthy" {
            warn!(url = %url, status = %status, "gateway health check failed");
            return Err(GatewayError::Unhealthy { status });
        }

        Ok(HealthReport {
            url: base.as_str().trim_end_matches('/').to_string(),
            status,
            response_time_ms,
        })
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::config::{Environment, StaticConfigProvider};
    use rust_decimal_macros::dec;

    fn client(environment: Environment, config: GatewayConfig) -> GatewayClient {
        GatewayClient::new(Arc::new(StaticConfigProvider::new(environment, config))).unwrap()
    }

    fn configured(url: &str) -> GatewayConfig {
        GatewayConfig {
            gateway_url: Some(url.to_string()),
            merchant_id: Some(7),
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn test_payment_url_carries_cents_merchant_and_order() {
        let gateway = client(Environment::development(), configured("http://localhost:5000"));
        let url = gateway
            .build_payment_url("000000123", dec!(10.00), 1)
            .unwrap();
        assert_eq!(
            url,
            "http://localhost:5000/pay?price=1000&merchant=7&order_id=000000123"
        );
    }

    #[test]
    fn test_cents_round_half_away_from_zero() {
        assert_eq!(amount_to_cents(dec!(10.005)).unwrap(), 1001);
        assert_eq!(amount_to_cents(dec!(10.004)).unwrap(), 1000);
        assert_eq!(amount_to_cents(dec!(0.015)).unwrap(), 2);
    }

    #[test]
    fn test_payment_url_requires_order_and_positive_amount() {
        let gateway = client(Environment::development(), configured("http://localhost:5000"));
        assert!(matches!(
            gateway.build_payment_url(" ", dec!(1), 1),
            Err(GatewayError::ValidationError { .. })
        ));
        assert!(matches!(
            gateway.build_payment_url("100", dec!(0), 1),
            Err(GatewayError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_payment_url_requires_configuration() {
        let gateway = client(Environment::development(), GatewayConfig::default());
        assert!(matches!(
            gateway.build_payment_url("100", dec!(5), 1),
            Err(GatewayError::ConfigurationError { .. })
        ));

        let gateway = client(
            Environment::development(),
            GatewayConfig {
                gateway_url: None,
                merchant_id: Some(7),
                ..GatewayConfig::default()
            },
        );
        assert!(matches!(
            gateway.build_payment_url("100", dec!(5), 1),
            Err(GatewayError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn test_production_rejects_plain_http_for_remote_gateway() {
        let gateway = client(Environment::production(), configured("http://pay.example.com"));
        assert!(matches!(
            gateway.build_payment_url("100", dec!(5), 1),
            Err(GatewayError::SecurityPolicyError { .. })
        ));

        let gateway = client(Environment::production(), configured("https://pay.example.com"));
        assert!(gateway.build_payment_url("100", dec!(5), 1).is_ok());

        let gateway = client(Environment::production(), configured("http://127.0.0.1:5000"));
        assert!(gateway.build_payment_url("100", dec!(5), 1).is_ok());
    }

    #[tokio::test]
    async fn test_status_requires_payment_id() {
        let gateway = client(Environment::development(), configured("http://localhost:5000"));
        assert!(matches!(
            gateway.get_payment_status("", 1).await,
            Err(GatewayError::ValidationError { .. })
        ));
    }
}
