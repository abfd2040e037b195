pub mod callback;
pub mod checkout;
pub mod gateway_admin;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::gateway::{GatewayConfigProvider, PaymentGateway};
use crate::health::HealthChecker;
use crate::middleware::{request_logging_middleware, UuidRequestId};
use crate::orders::OrderStore;
use crate::services::{CallbackReconciler, OrderNotifier};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<CallbackReconciler>,
    pub orders: Arc<dyn OrderStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub gateway_config: Arc<dyn GatewayConfigProvider>,
    pub health_checker: HealthChecker,
}

impl AppState {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        gateway_config: Arc<dyn GatewayConfigProvider>,
        notifier: Arc<dyn OrderNotifier>,
    ) -> Self {
        let reconciler = Arc::new(CallbackReconciler::new(
            orders.clone(),
            gateway.clone(),
            gateway_config.clone(),
            notifier,
        ));
        let health_checker = HealthChecker::new(orders.clone(), gateway.clone());

        Self {
            reconciler,
            orders,
            gateway,
            gateway_config,
            health_checker,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/payment/somnia/callback", get(callback::handle_callback))
        .route(
            "/checkout/somnia/redirect/{order_id}",
            get(checkout::redirect_to_gateway),
        )
        .route(
            "/api/gateway/test-connection",
            get(gateway_admin::test_connection),
        )
        .route(
            "/api/gateway/settings/validate",
            post(gateway_admin::validate_settings),
        )
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
