//! Input validation for inbound callbacks
//!
//! Callback parameters are untrusted: they are sanitized first and then
//! checked against strict formats before anything else reads them.

use axum::http::HeaderMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::{IpAddr, SocketAddr};

use crate::error::{ReconcileError, ReconcileResult};

/// Longest order increment id accepted from a callback.
pub const MAX_ORDER_ID_LEN: usize = 50;

static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new("<[^>]*>").unwrap());

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap()
});

static ORDER_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9-]+$").unwrap());

/// Client IP headers, most trusted first. `x-forwarded-for` contributes its
/// first entry only.
const CLIENT_IP_HEADERS: [&str; 3] = ["cf-connecting-ip", "x-real-ip", "x-forwarded-for"];

/// Strip HTML tags, null bytes and control characters other than newline
/// and tab, then trim surrounding whitespace.
pub fn sanitize(input: &str) -> String {
    let without_tags = HTML_TAG_RE.replace_all(input, "");
    without_tags
        .chars()
        .filter(|c| *c == '\n' || *c == '\t' || !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn is_valid_payment_id(payment_id: &str) -> bool {
    UUID_RE.is_match(payment_id)
}

pub fn is_valid_order_id(order_id: &str) -> bool {
    order_id.len() <= MAX_ORDER_ID_LEN && ORDER_ID_RE.is_match(order_id)
}

/// Validated callback identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub payment_id: String,
    pub order_id: String,
}

impl CallbackParams {
    /// Require, sanitize and format-check the raw query values.
    pub fn from_raw(
        payment_id: Option<&str>,
        order_id: Option<&str>,
    ) -> ReconcileResult<Self> {
        let (Some(payment_id), Some(order_id)) = (
            payment_id.filter(|v| !v.is_empty()),
            order_id.filter(|v| !v.is_empty()),
        ) else {
            return Err(ReconcileError::Validation {
                message: "payment_id and order_id are required".to_string(),
                field: None,
            });
        };

        let payment_id = sanitize(payment_id);
        let order_id = sanitize(order_id);

        if !is_valid_payment_id(&payment_id) {
            return Err(ReconcileError::validation(
                "Invalid payment ID format",
                "payment_id",
            ));
        }
        if !is_valid_order_id(&order_id) {
            return Err(ReconcileError::validation(
                "Invalid order ID format",
                "order_id",
            ));
        }

        Ok(Self {
            payment_id,
            order_id,
        })
    }
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

/// Resolve the caller's address from proxy headers, falling back to the
/// socket peer. Unparsable header values are skipped.
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
    CLIENT_IP_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .find_map(|value| value.split(',').next().and_then(parse_ip))
        .or(peer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_payment_id_format() {
        assert!(is_valid_payment_id("12345678-1234-1234-1234-123456789abc"));
        assert!(is_valid_payment_id("12345678-1234-1234-1234-123456789ABC"));
        assert!(!is_valid_payment_id("invalid-payment-id"));
        assert!(!is_valid_payment_id("12345678-1234-1234-1234-123456789abcd"));
        assert!(!is_valid_payment_id(""));
    }

    #[test]
    fn test_order_id_format() {
        assert!(is_valid_order_id("000000123"));
        assert!(is_valid_order_id("WC-1001"));
        assert!(!is_valid_order_id("<script>alert(1)</script>"));
        assert!(!is_valid_order_id("order 1"));
        assert!(!is_valid_order_id(&"1".repeat(51)));
        assert!(is_valid_order_id(&"1".repeat(50)));
    }

    #[test]
    fn test_sanitize_strips_markup_and_control_chars() {
        assert_eq!(sanitize("<b>000000123</b>"), "000000123");
        assert_eq!(sanitize("abc\0def"), "abcdef");
        assert_eq!(sanitize("a\u{7}b\tc"), "ab\tc");
        assert_eq!(sanitize("  42 "), "42");
    }

    #[test]
    fn test_callback_params_validation() {
        let params = CallbackParams::from_raw(
            Some("12345678-1234-1234-1234-123456789abc"),
            Some("000000123"),
        )
        .unwrap();
        assert_eq!(params.order_id, "000000123");

        let missing = CallbackParams::from_raw(None, Some("000000123")).unwrap_err();
        assert_eq!(missing.status_code(), 400);

        let empty = CallbackParams::from_raw(Some(""), Some("000000123")).unwrap_err();
        assert_eq!(empty.status_code(), 400);

        let script = CallbackParams::from_raw(
            Some("12345678-1234-1234-1234-123456789abc"),
            Some("<script>alert(1)</script>"),
        )
        .unwrap_err();
        assert_eq!(script.user_message(), "Invalid order ID format");

        let bad_uuid =
            CallbackParams::from_raw(Some("invalid-payment-id"), Some("000000123")).unwrap_err();
        assert_eq!(bad_uuid.user_message(), "Invalid payment ID format");
    }

    #[test]
    fn test_client_ip_header_precedence() {
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(resolve_client_ip(&headers, Some(peer)), Some(peer));

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("10.0.0.5, 172.16.0.1"),
        );
        assert_eq!(
            resolve_client_ip(&headers, Some(peer)),
            Some("10.0.0.5".parse().unwrap())
        );

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.6"));
        assert_eq!(
            resolve_client_ip(&headers, Some(peer)),
            Some("10.0.0.6".parse().unwrap())
        );

        headers.insert("cf-connecting-ip", HeaderValue::from_static("2001:db8::1"));
        assert_eq!(
            resolve_client_ip(&headers, Some(peer)),
            Some("2001:db8::1".parse().unwrap())
        );
    }

    #[test]
    fn test_client_ip_skips_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("not-an-ip"));
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.9:4711"));
        assert_eq!(
            resolve_client_ip(&headers, None),
            Some("203.0.113.9".parse().unwrap())
        );
    }
}
