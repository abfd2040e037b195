//! Gateway callback reconciliation
//!
//! Turns an untrusted callback into at most one verified order transition.
//! The callback only names a payment; its outcome always comes from the
//! gateway's own `/status` endpoint.

use rust_decimal::Decimal;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ReconcileError, ReconcileResult};
use crate::gateway::{
    GatewayConfig, GatewayConfigProvider, PaymentGateway, PaymentStatus, StatusResponse,
    DEFAULT_STORE_ID,
};
use crate::orders::{
    Order, OrderState, OrderStore, PaymentInfo, SettleOutcome, Settlement,
};
use crate::services::notification::OrderNotifier;
use crate::validation::CallbackParams;

/// Relative amount tolerance, 0.1% of the order total.
pub fn amount_tolerance() -> Decimal {
    Decimal::new(1, 3)
}

/// `|total - paid| <= total * 0.001`
pub fn is_amount_within_tolerance(total: Decimal, paid: Decimal) -> bool {
    (total - paid).abs() <= total * amount_tolerance()
}

// Per-step detail is logged at info when the store runs in debug mode.
macro_rules! step {
    ($debug:expr, $($arg:tt)+) => {
        if $debug {
            info!($($arg)+);
        } else {
            debug!($($arg)+);
        }
    };
}

/// Inbound callback as received, before validation.
#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    pub payment_id: Option<String>,
    pub order_id: Option<String>,
    pub client_ip: Option<IpAddr>,
}

/// What a handled callback did. Every variant answers `success: true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallbackOutcome {
    Settled {
        order_id: String,
        state: OrderState,
    },
    AlreadySettled {
        order_id: String,
        state: OrderState,
    },
    /// Gateway outcome contradicts the order's terminal state. Nothing is
    /// written.
    RequiresReview {
        order_id: String,
        state: OrderState,
        reported: PaymentStatus,
    },
    Pending {
        order_id: String,
    },
}

impl CallbackOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            CallbackOutcome::Settled {
                state: OrderState::Processing,
                ..
            } => "Payment confirmed",
            CallbackOutcome::Settled { .. } => "Order canceled",
            CallbackOutcome::AlreadySettled { .. } => "Callback already processed",
            CallbackOutcome::RequiresReview { .. } => "Callback acknowledged",
            CallbackOutcome::Pending { .. } => "Payment pending",
        }
    }
}

pub struct CallbackReconciler {
    orders: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    config: Arc<dyn GatewayConfigProvider>,
    notifier: Arc<dyn OrderNotifier>,
}

impl CallbackReconciler {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: Arc<dyn GatewayConfigProvider>,
        notifier: Arc<dyn OrderNotifier>,
    ) -> Self {
        Self {
            orders,
            gateway,
            config,
            notifier,
        }
    }

    pub async fn handle(&self, request: CallbackRequest) -> ReconcileResult<CallbackOutcome> {
        let params = CallbackParams::from_raw(
            request.payment_id.as_deref(),
            request.order_id.as_deref(),
        )?;

        // The order, and so its store, is unknown until after this check.
        let default_config = self.config.gateway_config(DEFAULT_STORE_ID)?;
        self.check_origin(&default_config, request.client_ip)?;

        let order = self
            .orders
            .find_by_increment_id(&params.order_id)
            .await?
            .ok_or_else(|| ReconcileError::OrderNotFound {
                order_id: params.order_id.clone(),
            })?;

        let config = self.config.gateway_config(order.store_id)?;
        if order.store_id != DEFAULT_STORE_ID {
            self.check_origin(&config, request.client_ip)?;
        }
        step!(
            config.debug_mode,
            order_id = %order.increment_id,
            payment_id = %params.payment_id,
            state = %order.state,
            "Verifying callback with gateway"
        );

        let raw = self
            .gateway
            .get_payment_status(&params.payment_id, order.store_id)
            .await?;
        let response = StatusResponse::parse(raw)?;

        self.verify_response(&order, &response, &config)?;

        let target = match response.status() {
            PaymentStatus::Paid => OrderState::Processing,
            PaymentStatus::Failed | PaymentStatus::Expired => OrderState::Canceled,
            PaymentStatus::Pending => {
                info!(
                    order_id = %order.increment_id,
                    payment_id = %params.payment_id,
                    "Payment still pending, no state change"
                );
                return Ok(CallbackOutcome::Pending {
                    order_id: order.increment_id,
                });
            }
        };

        if order.state.is_terminal() {
            return Ok(Self::settled_outcome(&order, target, response.status()));
        }

        let settlement = Self::settlement(&params.payment_id, &response, &config, target);
        match self.orders.settle(&order.increment_id, settlement).await? {
            SettleOutcome::Applied(order) => {
                info!(
                    order_id = %order.increment_id,
                    payment_id = %params.payment_id,
                    status = %response.status(),
                    state = %order.state,
                    "Order settled from gateway callback"
                );

                if order.state == OrderState::Processing {
                    self.notify(&order).await;
                }

                Ok(CallbackOutcome::Settled {
                    order_id: order.increment_id,
                    state: order.state,
                })
            }
            SettleOutcome::AlreadySettled(current) => {
                Ok(Self::settled_outcome(&current, target, response.status()))
            }
        }
    }

    fn check_origin(&self, config: &GatewayConfig, client_ip: Option<IpAddr>) -> ReconcileResult<()> {
        if config.allowed_ips.is_empty() {
            return Ok(());
        }

        match client_ip {
            Some(ip) if config.allowed_ips.allows(ip) => Ok(()),
            Some(ip) => {
                warn!(ip = %ip, "Callback from address outside the allowlist");
                Err(ReconcileError::UnauthorizedOrigin { ip: ip.to_string() })
            }
            None => {
                warn!("Callback origin could not be resolved");
                Err(ReconcileError::UnauthorizedOrigin {
                    ip: "unknown".to_string(),
                })
            }
        }
    }

    /// Identity and amount checks against the stored order.
    fn verify_response(
        &self,
        order: &Order,
        response: &StatusResponse,
        config: &GatewayConfig,
    ) -> ReconcileResult<()> {
        if let Some(reported) = response.order_id() {
            if reported != order.increment_id {
                return Err(ReconcileError::OrderMismatch {
                    expected: order.increment_id.clone(),
                    reported,
                });
            }
        }

        match response.amount() {
            Some(paid) => {
                if !is_amount_within_tolerance(order.grand_total, paid) {
                    return Err(ReconcileError::AmountMismatch {
                        order_id: order.increment_id.clone(),
                        expected: order.grand_total,
                        paid,
                    });
                }
                step!(
                    config.debug_mode,
                    order_id = %order.increment_id,
                    total = %order.grand_total,
                    paid = %paid,
                    "Amount verified"
                );
            }
            None if response.status() == PaymentStatus::Paid => {
                if config.require_amount_for_paid {
                    return Err(ReconcileError::AmountMissing {
                        order_id: order.increment_id.clone(),
                    });
                }
                warn!(
                    order_id = %order.increment_id,
                    "Gateway omitted the amount, skipping amount verification"
                );
            }
            None => {}
        }

        Ok(())
    }

    fn settlement(
        payment_id: &str,
        response: &StatusResponse,
        config: &GatewayConfig,
        target: OrderState,
    ) -> Settlement {
        let payment_info = PaymentInfo {
            payment_id: Some(payment_id.to_string()),
            payment_status: Some(response.status().to_string()),
            crypto_symbol: response.crypto_symbol(),
            crypto_amount: response.crypto_amount(),
            wallet_address: response.wallet_address(),
            gateway_url: config.gateway_url.clone(),
            merchant_id: None,
            extra: response
                .extra_fields()
                .map(|(k, v)| (k.clone(), v))
                .collect(),
        };

        Settlement {
            target,
            status_label: target.default_status().to_string(),
            comment: audit_comment(payment_id, response),
            payment_info,
        }
    }

    fn settled_outcome(order: &Order, target: OrderState, reported: PaymentStatus) -> CallbackOutcome {
        if order.state == target {
            info!(
                order_id = %order.increment_id,
                state = %order.state,
                "Order already settled, ignoring repeated callback"
            );
            CallbackOutcome::AlreadySettled {
                order_id: order.increment_id.clone(),
                state: order.state,
            }
        } else {
            warn!(
                order_id = %order.increment_id,
                state = %order.state,
                reported = %reported,
                requires_review = true,
                "Gateway status contradicts settled order, not applied"
            );
            CallbackOutcome::RequiresReview {
                order_id: order.increment_id.clone(),
                state: order.state,
                reported,
            }
        }
    }

    async fn notify(&self, order: &Order) {
        if let Err(e) = self.notifier.send_order_confirmation(order).await {
            warn!(
                order_id = %order.increment_id,
                error = %e,
                "Order confirmation failed"
            );
        }
    }
}

fn audit_comment(payment_id: &str, response: &StatusResponse) -> String {
    match response.status() {
        PaymentStatus::Paid => {
            let mut comment = format!(
                "Payment confirmed via Somnia Payment Gateway. Payment ID: {}.",
                payment_id
            );
            match (response.crypto_amount(), response.crypto_symbol()) {
                (Some(amount), Some(symbol)) => {
                    comment.push_str(&format!(" Amount: {} {}.", amount, symbol))
                }
                (Some(amount), None) => comment.push_str(&format!(" Amount: {}.", amount)),
                (None, Some(symbol)) => comment.push_str(&format!(" Token: {}.", symbol)),
                (None, None) => {}
            }
            if let Some(wallet) = response.wallet_address() {
                comment.push_str(&format!(" Wallet: {}.", wallet));
            }
            comment
        }
        status => format!(
            "Payment {} via Somnia Payment Gateway. Payment ID: {}.",
            status.as_str().to_lowercase(),
            payment_id
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{
        Environment, GatewayError, GatewayResult, HealthReport, IpAllowlist,
        StaticConfigProvider, StoreId,
    };
    use crate::orders::InMemoryOrderStore;
    use crate::services::notification::NotificationError;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use serde_json::{json, Map, Value as JsonValue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const PAYMENT_ID: &str = "12345678-1234-1234-1234-123456789abc";

    struct MockGateway {
        response: Mutex<GatewayResult<JsonValue>>,
        calls: AtomicUsize,
    }

    impl MockGateway {
        fn returning(body: JsonValue) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Ok(body)),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(error: GatewayError) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Err(error)),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PaymentGateway for MockGateway {
        fn build_payment_url(
            &self,
            order_id: &str,
            _amount: Decimal,
            _store_id: StoreId,
        ) -> GatewayResult<String> {
            Ok(format!("http://localhost:5000/pay?order_id={}", order_id))
        }

        async fn get_payment_status(
            &self,
            _payment_id: &str,
            _store_id: StoreId,
        ) -> GatewayResult<Map<String, JsonValue>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.response.lock().unwrap().clone()? {
                JsonValue::Object(map) => Ok(map),
                _ => Err(GatewayError::ResponseFormatError {
                    message: "not an object".to_string(),
                }),
            }
        }

        async fn test_connection(
            &self,
            _custom_url: Option<&str>,
            _store_id: StoreId,
        ) -> GatewayResult<HealthReport> {
            unimplemented!()
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl OrderNotifier for RecordingNotifier {
        async fn send_order_confirmation(&self, _order: &Order) -> Result<(), NotificationError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(NotificationError::Delivery("smtp down".to_string()));
            }
            Ok(())
        }
    }

    struct Harness {
        reconciler: CallbackReconciler,
        store: Arc<InMemoryOrderStore>,
        gateway: Arc<MockGateway>,
        notifier: Arc<RecordingNotifier>,
    }

    fn config() -> GatewayConfig {
        GatewayConfig {
            merchant_id: Some(7),
            ..GatewayConfig::default()
        }
    }

    async fn harness_with(
        gateway: Arc<MockGateway>,
        config: GatewayConfig,
        notifier: RecordingNotifier,
        total: Decimal,
    ) -> Harness {
        let store = Arc::new(InMemoryOrderStore::new());
        store
            .insert(
                Order::new("000000123", DEFAULT_STORE_ID, total, "USD")
                    .with_customer_email("buyer@example.com"),
            )
            .await
            .unwrap();

        let notifier = Arc::new(notifier);
        let provider = Arc::new(StaticConfigProvider::new(Environment::development(), config));
        let reconciler =
            CallbackReconciler::new(store.clone(), gateway.clone(), provider, notifier.clone());

        Harness {
            reconciler,
            store,
            gateway,
            notifier,
        }
    }

    async fn harness(body: JsonValue) -> Harness {
        harness_with(
            MockGateway::returning(body),
            config(),
            RecordingNotifier::default(),
            dec!(10.00),
        )
        .await
    }

    fn callback() -> CallbackRequest {
        CallbackRequest {
            payment_id: Some(PAYMENT_ID.to_string()),
            order_id: Some("000000123".to_string()),
            client_ip: Some("10.0.0.5".parse().unwrap()),
        }
    }

    async fn order(h: &Harness) -> Order {
        h.store
            .find_by_increment_id("000000123")
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_amount_tolerance_boundaries() {
        let total = dec!(100.00);
        assert!(is_amount_within_tolerance(total, dec!(99.90)));
        assert!(!is_amount_within_tolerance(total, dec!(99.89)));
        assert!(is_amount_within_tolerance(total, dec!(100.10)));
        assert!(!is_amount_within_tolerance(total, dec!(100.11)));
        assert!(is_amount_within_tolerance(total, total));
    }

    #[tokio::test]
    async fn test_paid_callback_moves_order_to_processing() {
        let h = harness(json!({
            "status": "PAID",
            "order_id": "000000123",
            "price": 1000,
            "balance": "100.5",
            "crypto_symbol": "SOMI",
            "wallet_address": "0xabc"
        }))
        .await;

        let outcome = h.reconciler.handle(callback()).await.unwrap();
        assert_eq!(
            outcome,
            CallbackOutcome::Settled {
                order_id: "000000123".to_string(),
                state: OrderState::Processing
            }
        );

        let order = order(&h).await;
        assert_eq!(order.state, OrderState::Processing);
        assert_eq!(order.status, "processing");
        assert_eq!(order.payment_info.crypto_symbol.as_deref(), Some("SOMI"));
        assert_eq!(order.payment_info.crypto_amount.as_deref(), Some("100.5"));
        assert_eq!(order.payment_info.payment_status.as_deref(), Some("PAID"));
        assert_eq!(order.payment_info.payment_id.as_deref(), Some(PAYMENT_ID));
        assert_eq!(
            order.payment_info.gateway_url.as_deref(),
            Some("http://localhost:5000")
        );
        assert_eq!(order.comments.len(), 1);
        assert!(order.comments[0].text.contains(PAYMENT_ID));
        assert!(order.comments[0].text.contains("100.5 SOMI"));
        assert!(order.comments[0].text.contains("0xabc"));
        assert_eq!(h.notifier.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repeated_paid_callback_is_a_no_op() {
        let h = harness(json!({"status": "PAID", "order_id": "000000123", "price": 1000})).await;

        h.reconciler.handle(callback()).await.unwrap();
        let second = h.reconciler.handle(callback()).await.unwrap();

        assert!(matches!(second, CallbackOutcome::AlreadySettled { .. }));
        let order = order(&h).await;
        assert_eq!(order.comments.len(), 1);
        assert_eq!(h.notifier.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callbacks_settle_once() {
        let h = Arc::new(
            harness(json!({"status": "PAID", "order_id": "000000123", "price": 1000})).await,
        );

        let mut handles = Vec::new();
        for _ in 0..8 {
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                h.reconciler.handle(callback()).await.unwrap()
            }));
        }
        let mut settled = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), CallbackOutcome::Settled { .. }) {
                settled += 1;
            }
        }

        assert_eq!(settled, 1);
        assert_eq!(order(&h).await.comments.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_callback_cancels_order() {
        let h = harness(json!({"status": "EXPIRED", "order_id": "000000123", "price": 1000})).await;

        let outcome = h.reconciler.handle(callback()).await.unwrap();
        assert_eq!(outcome.message(), "Order canceled");

        let order = order(&h).await;
        assert_eq!(order.state, OrderState::Canceled);
        assert_eq!(order.payment_info.payment_status.as_deref(), Some("EXPIRED"));
        assert!(order.comments[0].text.contains("expired"));
        assert_eq!(h.notifier.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_callback_without_amount_cancels_order() {
        let h = harness(json!({"status": "FAILED", "order_id": "000000123"})).await;
        h.reconciler.handle(callback()).await.unwrap();
        assert_eq!(order(&h).await.state, OrderState::Canceled);
    }

    #[tokio::test]
    async fn test_pending_leaves_order_untouched() {
        let h = harness(json!({"status": "PENDING", "order_id": "000000123", "price": 1000})).await;

        let outcome = h.reconciler.handle(callback()).await.unwrap();
        assert!(matches!(outcome, CallbackOutcome::Pending { .. }));
        assert_eq!(order(&h).await.state, OrderState::New);
    }

    #[tokio::test]
    async fn test_amount_boundaries_on_callback() {
        for (price, accepted) in [(9990, true), (9989, false), (10010, true), (10011, false)] {
            let h = harness_with(
                MockGateway::returning(
                    json!({"status": "PAID", "order_id": "000000123", "price": price}),
                ),
                config(),
                RecordingNotifier::default(),
                dec!(100.00),
            )
            .await;

            let result = h.reconciler.handle(callback()).await;
            if accepted {
                assert!(result.is_ok(), "price {} should be accepted", price);
                assert_eq!(order(&h).await.state, OrderState::Processing);
            } else {
                assert!(
                    matches!(result, Err(ReconcileError::AmountMismatch { .. })),
                    "price {} should be rejected",
                    price
                );
                assert_eq!(order(&h).await.state, OrderState::New);
            }
        }
    }

    #[tokio::test]
    async fn test_order_mismatch_is_rejected() {
        let h = harness(json!({"status": "PAID", "order_id": "000000999", "price": 1000})).await;

        let err = h.reconciler.handle(callback()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::OrderMismatch { .. }));
        assert_eq!(order(&h).await.state, OrderState::New);
    }

    #[tokio::test]
    async fn test_paid_without_amount_is_rejected_by_default() {
        let h = harness(json!({"status": "PAID", "order_id": "000000123"})).await;

        let err = h.reconciler.handle(callback()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::AmountMissing { .. }));
        assert_eq!(err.status_code(), 400);
        assert_eq!(order(&h).await.state, OrderState::New);
    }

    #[tokio::test]
    async fn test_paid_without_amount_allowed_when_not_required() {
        let h = harness_with(
            MockGateway::returning(json!({"status": "PAID", "order_id": "000000123"})),
            GatewayConfig {
                require_amount_for_paid: false,
                ..config()
            },
            RecordingNotifier::default(),
            dec!(10.00),
        )
        .await;

        h.reconciler.handle(callback()).await.unwrap();
        assert_eq!(order(&h).await.state, OrderState::Processing);
    }

    #[tokio::test]
    async fn test_paid_for_canceled_order_requires_review() {
        let h = harness(json!({"status": "PAID", "order_id": "000000123", "price": 1000})).await;
        h.store
            .settle(
                "000000123",
                Settlement {
                    target: OrderState::Canceled,
                    status_label: "canceled".to_string(),
                    payment_info: PaymentInfo::default(),
                    comment: "expired".to_string(),
                },
            )
            .await
            .unwrap();

        let outcome = h.reconciler.handle(callback()).await.unwrap();
        assert_eq!(
            outcome,
            CallbackOutcome::RequiresReview {
                order_id: "000000123".to_string(),
                state: OrderState::Canceled,
                reported: PaymentStatus::Paid,
            }
        );
        let order = order(&h).await;
        assert_eq!(order.state, OrderState::Canceled);
        assert_eq!(order.comments.len(), 1);
    }

    #[tokio::test]
    async fn test_origin_outside_allowlist_is_rejected() {
        let h = harness_with(
            MockGateway::returning(json!({"status": "PAID", "price": 1000})),
            GatewayConfig {
                allowed_ips: IpAllowlist::parse("10.0.0.0/8").unwrap(),
                ..config()
            },
            RecordingNotifier::default(),
            dec!(10.00),
        )
        .await;

        let mut request = callback();
        request.client_ip = Some("192.168.1.1".parse().unwrap());
        let err = h.reconciler.handle(request).await.unwrap_err();
        assert!(matches!(err, ReconcileError::UnauthorizedOrigin { .. }));
        assert_eq!(h.gateway.calls(), 0);

        // 10.0.0.5 is inside the range.
        h.reconciler.handle(callback()).await.unwrap();
        assert_eq!(order(&h).await.state, OrderState::Processing);
    }

    #[tokio::test]
    async fn test_store_allowlist_applies_to_its_orders() {
        let gateway = MockGateway::returning(json!({
            "status": "PAID",
            "order_id": "000000777",
            "price": 1000
        }));
        let store = Arc::new(InMemoryOrderStore::new());
        store
            .insert(Order::new("000000777", 2, dec!(10.00), "USD"))
            .await
            .unwrap();
        let provider = StaticConfigProvider::new(Environment::development(), config()).with_store(
            2,
            GatewayConfig {
                allowed_ips: IpAllowlist::parse("10.0.0.0/8").unwrap(),
                ..config()
            },
        );
        let reconciler = CallbackReconciler::new(
            store.clone(),
            gateway.clone(),
            Arc::new(provider),
            Arc::new(RecordingNotifier::default()),
        );

        let request = CallbackRequest {
            payment_id: Some(PAYMENT_ID.to_string()),
            order_id: Some("000000777".to_string()),
            client_ip: Some("192.168.1.1".parse().unwrap()),
        };
        let err = reconciler.handle(request.clone()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::UnauthorizedOrigin { .. }));
        assert_eq!(gateway.calls(), 0);
        let order = store.find_by_increment_id("000000777").await.unwrap().unwrap();
        assert_eq!(order.state, OrderState::New);

        let allowed = CallbackRequest {
            client_ip: Some("10.1.2.3".parse().unwrap()),
            ..request
        };
        reconciler.handle(allowed).await.unwrap();
        let order = store.find_by_increment_id("000000777").await.unwrap().unwrap();
        assert_eq!(order.state, OrderState::Processing);
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_gateway() {
        let h = harness(json!({"status": "PAID", "price": 1000})).await;

        let mut request = callback();
        request.order_id = Some("<script>alert(1)</script>".to_string());
        let err = h.reconciler.handle(request).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Validation { .. }));

        let mut request = callback();
        request.payment_id = None;
        assert!(h.reconciler.handle(request).await.is_err());

        assert_eq!(h.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_order_is_rejected() {
        let h = harness(json!({"status": "PAID", "price": 1000})).await;

        let mut request = callback();
        request.order_id = Some("000000999".to_string());
        let err = h.reconciler.handle(request).await.unwrap_err();
        assert!(matches!(err, ReconcileError::OrderNotFound { .. }));
        assert_eq!(h.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_order_untouched() {
        let h = harness_with(
            MockGateway::failing(GatewayError::GatewayUnavailable {
                message: "HTTP 502".to_string(),
                status_code: Some(502),
            }),
            config(),
            RecordingNotifier::default(),
            dec!(10.00),
        )
        .await;

        let err = h.reconciler.handle(callback()).await.unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert!(err.is_retryable());
        assert_eq!(order(&h).await.state, OrderState::New);
    }

    #[tokio::test]
    async fn test_malformed_status_is_rejected() {
        let h = harness(json!({"status": "BOGUS", "order_id": "000000123"})).await;

        let err = h.reconciler.handle(callback()).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Gateway(GatewayError::MalformedResponse { .. })
        ));
        assert_eq!(order(&h).await.state, OrderState::New);
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_undo_payment() {
        let h = harness_with(
            MockGateway::returning(
                json!({"status": "PAID", "order_id": "000000123", "price": 1000}),
            ),
            config(),
            RecordingNotifier {
                fail: true,
                ..RecordingNotifier::default()
            },
            dec!(10.00),
        )
        .await;

        let outcome = h.reconciler.handle(callback()).await.unwrap();
        assert!(matches!(outcome, CallbackOutcome::Settled { .. }));
        assert_eq!(h.notifier.sent.load(Ordering::SeqCst), 1);
        assert_eq!(order(&h).await.state, OrderState::Processing);
    }
}
