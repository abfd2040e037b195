use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::orders::error::{StoreError, StoreResult};
use crate::orders::repository::OrderStore;
use crate::orders::types::{
    Order, OrderComment, OrderState, PaymentInfo, SettleOutcome, Settlement,
};

/// Process-local order store. Settlement runs under the write lock, which
/// makes the terminal-state check and the write a single step.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<String, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> StoreResult<Order> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.increment_id) {
            return Err(StoreError::Duplicate {
                id: order.increment_id,
            });
        }
        orders.insert(order.increment_id.clone(), order.clone());
        Ok(order)
    }

    async fn find_by_increment_id(&self, increment_id: &str) -> StoreResult<Option<Order>> {
        Ok(self.orders.read().await.get(increment_id).cloned())
    }

    async fn mark_pending_payment(
        &self,
        increment_id: &str,
        payment_info: PaymentInfo,
    ) -> StoreResult<Order> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(increment_id)
            .ok_or_else(|| StoreError::NotFound {
                id: increment_id.to_string(),
            })?;

        if order.state.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id: increment_id.to_string(),
                from: order.state,
                to: OrderState::PendingPayment,
            });
        }

        order.state = OrderState::PendingPayment;
        order.status = OrderState::PendingPayment.default_status().to_string();
        order.payment_info.merge(payment_info);
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn settle(
        &self,
        increment_id: &str,
        settlement: Settlement,
    ) -> StoreResult<SettleOutcome> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(increment_id)
            .ok_or_else(|| StoreError::NotFound {
                id: increment_id.to_string(),
            })?;

        if order.state.is_terminal() {
            return Ok(SettleOutcome::AlreadySettled(order.clone()));
        }

        let now = Utc::now();
        order.state = settlement.target;
        order.status = settlement.status_label;
        order.payment_info.merge(settlement.payment_info);
        order.comments.push(OrderComment {
            created_at: now,
            text: settlement.comment,
        });
        order.updated_at = now;
        Ok(SettleOutcome::Applied(order.clone()))
    }

    async fn list_stale_pending(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut stale: Vec<Order> = orders
            .values()
            .filter(|o| o.state == OrderState::PendingPayment && o.updated_at <= cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(stale)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
