use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::orders::Order;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationType {
    OrderConfirmed,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("order {order_id} has no customer email")]
    MissingRecipient { order_id: String },

    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Sends customer notifications after a successful payment.
///
/// Delivery is best-effort. Callers log failures and carry on; an order that
/// moved to processing stays there.
#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn send_order_confirmation(&self, order: &Order) -> Result<(), NotificationError>;
}

/// Emits notifications as structured log records.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OrderNotifier for LogNotifier {
    async fn send_order_confirmation(&self, order: &Order) -> Result<(), NotificationError> {
        let Some(email) = order.customer_email.as_deref() else {
            warn!(
                order_id = %order.increment_id,
                "Skipping order confirmation, no customer email"
            );
            return Err(NotificationError::MissingRecipient {
                order_id: order.increment_id.clone(),
            });
        };

        info!(
            notification = ?NotificationType::OrderConfirmed,
            order_id = %order.increment_id,
            store_id = order.store_id,
            recipient = %email,
            total = %order.grand_total,
            currency = %order.currency,
            payment_id = order.payment_info.payment_id.as_deref().unwrap_or("-"),
            "NOTIFICATION: Order confirmation"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_log_notifier_requires_recipient() {
        let notifier = LogNotifier::new();
        let order = Order::new("000000123", 1, dec!(10.00), "USD");
        assert!(matches!(
            notifier.send_order_confirmation(&order).await,
            Err(NotificationError::MissingRecipient { .. })
        ));

        let order = order.with_customer_email("buyer@example.com");
        assert!(notifier.send_order_confirmation(&order).await.is_ok());
    }
}
