use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::orders::error::StoreResult;
use crate::orders::types::{Order, PaymentInfo, SettleOutcome, Settlement};

/// Storefront order storage as used by the payment flow.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: Order) -> StoreResult<Order>;

    async fn find_by_increment_id(&self, increment_id: &str) -> StoreResult<Option<Order>>;

    /// NEW -> PENDING_PAYMENT when the buyer is sent to the gateway.
    async fn mark_pending_payment(
        &self,
        increment_id: &str,
        payment_info: PaymentInfo,
    ) -> StoreResult<Order>;

    /// Apply a terminal transition only if the order is not terminal yet.
    /// The check and the write happen atomically.
    async fn settle(&self, increment_id: &str, settlement: Settlement)
        -> StoreResult<SettleOutcome>;

    /// Orders still awaiting payment whose last update is at or before `cutoff`.
    async fn list_stale_pending(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Order>>;

    async fn health_check(&self) -> StoreResult<()>;
}
