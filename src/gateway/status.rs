//! Validated view over the gateway's `/status/{payment_id}` payload.
//!
//! A `StatusResponse` only exists after `parse` accepted the payload, so every
//! accessor reads from data whose required fields were already checked.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

use crate::gateway::error::{GatewayError, GatewayResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Paid,
    Pending,
    Expired,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Expired => "EXPIRED",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PAID" => Ok(PaymentStatus::Paid),
            "PENDING" => Ok(PaymentStatus::Pending),
            "EXPIRED" => Ok(PaymentStatus::Expired),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(GatewayError::malformed(format!(
                "unknown payment status '{}'",
                other
            ))),
        }
    }
}

/// Raw input accepted by [`StatusResponse::parse`].
pub enum RawStatus<'a> {
    Text(&'a str),
    Decoded(JsonValue),
}

impl<'a> From<&'a str> for RawStatus<'a> {
    fn from(text: &'a str) -> Self {
        RawStatus::Text(text)
    }
}

impl From<JsonValue> for RawStatus<'_> {
    fn from(value: JsonValue) -> Self {
        RawStatus::Decoded(value)
    }
}

impl From<Map<String, JsonValue>> for RawStatus<'_> {
    fn from(map: Map<String, JsonValue>) -> Self {
        RawStatus::Decoded(JsonValue::Object(map))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusResponse {
    status: PaymentStatus,
    amount: Option<Decimal>,
    data: Map<String, JsonValue>,
}

impl StatusResponse {
    pub fn parse<'a>(raw: impl Into<RawStatus<'a>>) -> GatewayResult<Self> {
        let value = match raw.into() {
            RawStatus::Text(text) => serde_json::from_str::<JsonValue>(text)
                .map_err(|e| GatewayError::malformed(format!("invalid JSON: {}", e)))?,
            RawStatus::Decoded(value) => value,
        };

        let data = match value {
            JsonValue::Object(map) => map,
            _ => return Err(GatewayError::malformed("status payload is not an object")),
        };

        let status = match data.get("status") {
            Some(JsonValue::String(s)) => PaymentStatus::from_str(s)?,
            Some(_) => return Err(GatewayError::malformed("status field is not a string")),
            None => return Err(GatewayError::malformed("missing status field")),
        };

        let amount = match data.get("price") {
            None | Some(JsonValue::Null) => None,
            Some(price) => Some(cents_to_amount(price)?),
        };

        Ok(Self {
            status,
            amount,
            data,
        })
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn payment_id(&self) -> Option<String> {
        self.text_field("payment_id")
    }

    pub fn order_id(&self) -> Option<String> {
        self.text_field("order_id")
    }

    /// `price` cents divided by 100; `None` when the gateway omitted it.
    pub fn amount(&self) -> Option<Decimal> {
        self.amount
    }

    pub fn crypto_symbol(&self) -> Option<String> {
        self.text_field("crypto_symbol")
    }

    /// The gateway reports the crypto amount as `balance`.
    pub fn crypto_amount(&self) -> Option<String> {
        self.text_field("balance")
    }

    pub fn wallet_address(&self) -> Option<String> {
        self.text_field("wallet_address")
    }

    /// Fields outside the known set, kept for audit.
    pub fn extra_fields(&self) -> impl Iterator<Item = (&String, String)> {
        const KNOWN: [&str; 7] = [
            "status",
            "payment_id",
            "order_id",
            "price",
            "balance",
            "crypto_symbol",
            "wallet_address",
        ];
        self.data
            .iter()
            .filter(|(k, _)| !KNOWN.contains(&k.as_str()))
            .filter_map(|(k, v)| scalar_text(v).map(|s| (k, s)))
    }

    pub fn raw(&self) -> &Map<String, JsonValue> {
        &self.data
    }

    fn text_field(&self, key: &str) -> Option<String> {
        self.data
            .get(key)
            .and_then(scalar_text)
            .filter(|s| !s.is_empty())
    }
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn cents_to_amount(price: &JsonValue) -> GatewayResult<Decimal> {
    let cents = match price {
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Decimal::from(i)
            } else if let Some(f) = n.as_f64() {
                Decimal::from_f64(f)
                    .ok_or_else(|| GatewayError::malformed("price is not a finite number"))?
            } else {
                return Err(GatewayError::malformed("price is out of range"));
            }
        }
        JsonValue::String(s) => Decimal::from_str(s.trim())
            .map_err(|_| GatewayError::malformed(format!("price '{}' is not numeric", s)))?,
        _ => return Err(GatewayError::malformed("price must be a number of cents")),
    };

    if cents.is_sign_negative() {
        return Err(GatewayError::malformed("price cannot be negative"));
    }

    Ok(cents / Decimal::ONE_HUNDRED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parses_paid_response_and_converts_cents() {
        let response =
            StatusResponse::parse(r#"{"status":"PAID","order_id":"X","price":1050}"#).unwrap();
        assert_eq!(response.status(), PaymentStatus::Paid);
        assert_eq!(response.order_id().as_deref(), Some("X"));
        assert_eq!(response.amount(), Some(dec!(10.50)));
        assert_eq!(response.crypto_symbol(), None);
    }

    #[test]
    fn test_accepts_already_decoded_payload() {
        let response = StatusResponse::parse(json!({
            "status": "EXPIRED",
            "order_id": 123,
            "balance": 100.5,
            "crypto_symbol": "SOMI",
            "wallet_address": "0xabc"
        }))
        .unwrap();
        assert_eq!(response.status(), PaymentStatus::Expired);
        assert_eq!(response.order_id().as_deref(), Some("123"));
        assert_eq!(response.crypto_amount().as_deref(), Some("100.5"));
        assert_eq!(response.wallet_address().as_deref(), Some("0xabc"));
        assert_eq!(response.amount(), None);
    }

    #[test]
    fn test_rejects_unknown_status() {
        let err = StatusResponse::parse(r#"{"status":"BOGUS"}"#).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedResponse { .. }));

        assert!(StatusResponse::parse(r#"{"status":"paid"}"#).is_err());
    }

    #[test]
    fn test_rejects_missing_status_and_bad_json() {
        assert!(StatusResponse::parse(r#"{"order_id":"X"}"#).is_err());
        assert!(StatusResponse::parse("{not json").is_err());
        assert!(StatusResponse::parse("[1,2,3]").is_err());
        assert!(StatusResponse::parse(json!({"status": 5})).is_err());
    }

    #[test]
    fn test_rejects_unusable_price() {
        assert!(StatusResponse::parse(json!({"status": "PAID", "price": "ten"})).is_err());
        assert!(StatusResponse::parse(json!({"status": "PAID", "price": -100})).is_err());
        assert!(StatusResponse::parse(json!({"status": "PAID", "price": [1]})).is_err());
    }

    #[test]
    fn test_string_price_and_null_price_are_handled() {
        let response = StatusResponse::parse(json!({"status": "PAID", "price": "1000"})).unwrap();
        assert_eq!(response.amount(), Some(dec!(10)));

        let response = StatusResponse::parse(json!({"status": "PENDING", "price": null})).unwrap();
        assert_eq!(response.amount(), None);
    }

    #[test]
    fn test_unknown_fields_are_exposed_as_extras() {
        let response = StatusResponse::parse(json!({
            "status": "PAID",
            "price": 100,
            "network": "somnia-testnet",
            "nested": {"ignored": true}
        }))
        .unwrap();
        let extras: Vec<_> = response.extra_fields().collect();
        assert_eq!(extras.len(), 1);
        assert_eq!(extras[0].0, "network");
        assert_eq!(extras[0].1, "somnia-testnet");
    }
}
