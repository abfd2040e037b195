//! Integration tests for the outbound gateway client against a mock gateway

use serde_json::json;
use somnia_pay::gateway::{
    Environment, GatewayClient, GatewayConfig, GatewayError, PaymentGateway, PaymentStatus,
    StaticConfigProvider, StatusResponse,
};
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(url: &str) -> GatewayClient {
    let config = GatewayConfig {
        gateway_url: Some(url.to_string()),
        merchant_id: Some(7),
        ..GatewayConfig::default()
    };
    GatewayClient::new(Arc::new(StaticConfigProvider::new(
        Environment::development(),
        config,
    )))
    .unwrap()
}

#[tokio::test]
async fn test_status_lookup_returns_gateway_object() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/6f1c2a4e-1b2c-4d5e-8f90-123456789abc"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "PAID",
            "order_id": "000000123",
            "price": 1000,
            "crypto_symbol": "USDT",
            "balance": "10.0"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = client_for(&server.uri());
    let body = gateway
        .get_payment_status("6f1c2a4e-1b2c-4d5e-8f90-123456789abc", 1)
        .await
        .unwrap();

    let status = StatusResponse::parse(body).unwrap();
    assert_eq!(status.status(), PaymentStatus::Paid);
    assert_eq!(status.order_id().as_deref(), Some("000000123"));
    assert_eq!(status.crypto_amount().as_deref(), Some("10.0"));
}

#[tokio::test]
async fn test_payment_id_is_encoded_as_one_path_segment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/a%2Fb"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "PENDING" })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = client_for(&server.uri());
    let body = gateway.get_payment_status("a/b", 1).await.unwrap();
    assert_eq!(body.get("status"), Some(&json!("PENDING")));
}

#[tokio::test]
async fn test_non_200_is_gateway_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let gateway = client_for(&server.uri());
    let err = gateway.get_payment_status("missing", 1).await.unwrap_err();
    match err {
        GatewayError::GatewayUnavailable { status_code, .. } => {
            assert_eq!(status_code, Some(404))
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_json_is_response_format_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let gateway = client_for(&server.uri());
    let err = gateway.get_payment_status("abc", 1).await.unwrap_err();
    assert!(matches!(err, GatewayError::ResponseFormatError { .. }));
}

#[tokio::test]
async fn test_non_object_json_is_response_format_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["PAID"])))
        .mount(&server)
        .await;

    let gateway = client_for(&server.uri());
    let err = gateway.get_payment_status("abc", 1).await.unwrap_err();
    assert!(matches!(err, GatewayError::ResponseFormatError { .. }));
}

#[tokio::test]
async fn test_unreachable_gateway_is_retryable() {
    let gateway = client_for("http://127.0.0.1:1");
    let err = gateway.get_payment_status("abc", 1).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::GatewayUnavailable {
            status_code: None,
            ..
        }
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_health_check_reports_healthy_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "healthy" })))
        .mount(&server)
        .await;

    let gateway = client_for("http://localhost:5000");
    let report = gateway
        .test_connection(Some(&format!("{}/", server.uri())), 1)
        .await
        .unwrap();

    assert_eq!(report.status, "healthy");
    assert_eq!(report.url, server.uri());
}

#[tokio::test]
async fn test_health_check_uses_configured_url_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "healthy" })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = client_for(&server.uri());
    assert!(gateway.test_connection(None, 1).await.is_ok());
}

#[tokio::test]
async fn test_health_check_rejects_unhealthy_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "degraded" })))
        .mount(&server)
        .await;

    let gateway = client_for(&server.uri());
    let err = gateway.test_connection(None, 1).await.unwrap_err();
    match err {
        GatewayError::Unhealthy { status } => assert_eq!(status, "degraded"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_health_check_rejects_invalid_custom_url() {
    let gateway = client_for("http://localhost:5000");
    let err = gateway
        .test_connection(Some("ftp://pay.example.com"), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ValidationError { .. }));
}
