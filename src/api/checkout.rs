use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::info;

use crate::api::AppState;
use crate::error::{ReconcileError, ReconcileResult};
use crate::orders::PaymentInfo;
use crate::validation::{is_valid_order_id, sanitize};

/// GET /checkout/somnia/redirect/{order_id}
///
/// Sends the buyer to the gateway's pay page and parks the order in pending
/// payment. Misconfiguration blocks checkout instead of degrading.
pub async fn redirect_to_gateway(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Response {
    match start_payment(&state, &order_id).await {
        Ok(url) => (StatusCode::FOUND, [(header::LOCATION, url)]).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn start_payment(state: &AppState, raw_order_id: &str) -> ReconcileResult<String> {
    let order_id = sanitize(raw_order_id);
    if !is_valid_order_id(&order_id) {
        return Err(ReconcileError::validation("Invalid order ID format", "order_id"));
    }

    let order = state
        .orders
        .find_by_increment_id(&order_id)
        .await?
        .ok_or_else(|| ReconcileError::OrderNotFound {
            order_id: order_id.clone(),
        })?;

    let config = state.gateway_config.gateway_config(order.store_id)?;
    if !config.active {
        return Err(ReconcileError::GatewayInactive {
            store_id: order.store_id,
        });
    }
    if order.state.is_terminal() {
        return Err(ReconcileError::OrderNotPayable {
            order_id,
            state: order.state.to_string(),
        });
    }

    let url = state
        .gateway
        .build_payment_url(&order.increment_id, order.grand_total, order.store_id)?;

    state
        .orders
        .mark_pending_payment(
            &order.increment_id,
            PaymentInfo {
                gateway_url: config.gateway_url.clone(),
                merchant_id: config.merchant_id,
                ..PaymentInfo::default()
            },
        )
        .await?;

    info!(
        order_id = %order.increment_id,
        store_id = order.store_id,
        total = %order.grand_total,
        "Redirecting buyer to payment gateway"
    );
    Ok(url)
}
