use axum::{
    extract::{ConnectInfo, Query, Request, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::net::SocketAddr;
use tracing::info;

use crate::api::AppState;
use crate::middleware::SuccessResponse;
use crate::services::CallbackRequest;
use crate::validation::resolve_client_ip;

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub payment_id: Option<String>,
    pub order_id: Option<String>,
}

/// GET /payment/somnia/callback?payment_id={uuid}&order_id={id}
pub async fn handle_callback(State(state): State<AppState>, request: Request) -> Response {
    // An unparsable query is treated like a missing one and rejected by validation.
    let query = Query::<CallbackQuery>::try_from_uri(request.uri())
        .map(|Query(q)| q)
        .unwrap_or_default();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client_ip = resolve_client_ip(request.headers(), peer);

    info!(
        order_id = query.order_id.as_deref().unwrap_or("-"),
        client_ip = ?client_ip,
        "Received gateway callback"
    );

    let callback = CallbackRequest {
        payment_id: query.payment_id,
        order_id: query.order_id,
        client_ip,
    };

    match state.reconciler.handle(callback).await {
        Ok(outcome) => SuccessResponse::new(outcome.message()).into_response(),
        Err(e) => e.into_response(),
    }
}
