use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::gateway::{GatewayConfigProvider, GatewayError, MIN_PAYMENT_TIMEOUT_MINUTES};
use crate::orders::{Order, OrderState, OrderStore, PaymentInfo, SettleOutcome, Settlement, StoreError};

/// Extra time past the payment window before an order is given up on.
pub const SWEEP_GRACE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("order store error: {0}")]
    Store(#[from] StoreError),

    #[error("gateway configuration error: {0}")]
    Configuration(#[from] GatewayError),
}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often the worker wakes up.
    pub interval: Duration,
    pub grace: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            grace: SWEEP_GRACE,
        }
    }
}

impl SweeperConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.interval = Duration::from_secs(
            std::env::var("ORDER_SWEEPER_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(cfg.interval.as_secs()),
        );
        cfg
    }
}

/// Cancels orders left in pending payment after their store's payment
/// window plus a grace period.
pub struct PendingOrderSweeper {
    orders: Arc<dyn OrderStore>,
    gateway_config: Arc<dyn GatewayConfigProvider>,
    config: SweeperConfig,
}

impl PendingOrderSweeper {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        gateway_config: Arc<dyn GatewayConfigProvider>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            orders,
            gateway_config,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            grace_secs = self.config.grace.as_secs(),
            "pending order sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("pending order sweeper stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.run_cycle(Utc::now()).await {
                        warn!(error = %e, "pending order sweep failed");
                    }
                }
            }
        }

        info!("pending order sweeper stopped");
    }

    /// Returns the number of orders canceled.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<usize, SweepError> {
        // Shortest possible window; each store's own timeout is applied below.
        let min_age = minutes(MIN_PAYMENT_TIMEOUT_MINUTES) + to_chrono(self.config.grace);
        let candidates = self.orders.list_stale_pending(now - min_age).await?;

        let mut canceled = 0;
        for order in candidates {
            match self.sweep_order(&order, now).await {
                Ok(true) => canceled += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    order_id = %order.increment_id,
                    error = %e,
                    "failed to cancel stale order"
                ),
            }
        }

        if canceled > 0 {
            info!(canceled, "pending order sweep completed");
        }
        Ok(canceled)
    }

    async fn sweep_order(&self, order: &Order, now: DateTime<Utc>) -> Result<bool, SweepError> {
        let config = self.gateway_config.gateway_config(order.store_id)?;
        let deadline = order.updated_at
            + minutes(config.payment_timeout_minutes)
            + to_chrono(self.config.grace);
        if deadline > now {
            debug!(order_id = %order.increment_id, deadline = %deadline, "order still within payment window");
            return Ok(false);
        }

        let settlement = Settlement {
            target: OrderState::Canceled,
            status_label: OrderState::Canceled.default_status().to_string(),
            payment_info: PaymentInfo {
                payment_status: Some("EXPIRED".to_string()),
                ..PaymentInfo::default()
            },
            comment: format!(
                "Payment window of {} minutes elapsed without a gateway confirmation. Order canceled.",
                config.payment_timeout_minutes
            ),
        };

        match self.orders.settle(&order.increment_id, settlement).await? {
            SettleOutcome::Applied(_) => {
                info!(
                    order_id = %order.increment_id,
                    timeout_minutes = config.payment_timeout_minutes,
                    "stale pending order canceled"
                );
                Ok(true)
            }
            SettleOutcome::AlreadySettled(_) => Ok(false),
        }
    }
}

fn minutes(value: u32) -> chrono::Duration {
    chrono::Duration::minutes(i64::from(value))
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}
