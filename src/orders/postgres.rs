use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::DatabaseConfig;
use crate::orders::error::{StoreError, StoreResult};
use crate::orders::repository::OrderStore;
use crate::orders::types::{
    Order, OrderComment, OrderState, PaymentInfo, SettleOutcome, Settlement,
};

const ORDER_COLUMNS: &str = "increment_id, store_id, grand_total, currency, state, status, \
                             customer_email, payment_info, created_at, updated_at";

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 5,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl From<&DatabaseConfig> for PoolConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connection_timeout: Duration::from_secs(config.connection_timeout),
            idle_timeout: Duration::from_secs(config.idle_timeout.unwrap_or(600)),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Initialize the database connection pool
pub async fn init_pool(database_url: &str, config: PoolConfig) -> StoreResult<PgPool> {
    info!(
        "Initializing database pool: max_connections={}, min_connections={}, connection_timeout={:?}",
        config.max_connections, config.min_connections, config.connection_timeout
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connection_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            StoreError::from_sqlx(e)
        })?;

    info!("Database pool initialized successfully");
    Ok(pool)
}

#[derive(Debug, Clone, FromRow)]
struct OrderRow {
    increment_id: String,
    store_id: i64,
    grand_total: Decimal,
    currency: String,
    state: String,
    status: String,
    customer_email: Option<String>,
    payment_info: Json<PaymentInfo>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct CommentRow {
    text: String,
    created_at: DateTime<Utc>,
}

impl OrderRow {
    fn state(&self) -> StoreResult<OrderState> {
        self.state
            .parse()
            .map_err(|message| StoreError::Corrupt { message })
    }

    fn into_order(self, comments: Vec<CommentRow>) -> StoreResult<Order> {
        let state = self.state()?;
        let store_id = u32::try_from(self.store_id).map_err(|_| StoreError::Corrupt {
            message: format!(
                "order {} has out of range store_id {}",
                self.increment_id, self.store_id
            ),
        })?;

        Ok(Order {
            increment_id: self.increment_id,
            store_id,
            grand_total: self.grand_total,
            currency: self.currency,
            state,
            status: self.status,
            customer_email: self.customer_email,
            payment_info: self.payment_info.0,
            comments: comments
                .into_iter()
                .map(|c| OrderComment {
                    created_at: c.created_at,
                    text: c.text,
                })
                .collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Order store backed by the `orders` and `order_comments` tables.
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database {
                message: e.to_string(),
                is_retryable: false,
            })
    }

    async fn comments<'e, E>(executor: E, increment_id: &str) -> StoreResult<Vec<CommentRow>>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, CommentRow>(
            "SELECT text, created_at FROM order_comments \
             WHERE increment_id = $1 ORDER BY id",
        )
        .bind(increment_id)
        .fetch_all(executor)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn lock_row(
        tx: &mut Transaction<'_, Postgres>,
        increment_id: &str,
    ) -> StoreResult<OrderRow> {
        sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE increment_id = $1 FOR UPDATE",
            ORDER_COLUMNS
        ))
        .bind(increment_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(StoreError::from_sqlx)?
        .ok_or_else(|| StoreError::NotFound {
            id: increment_id.to_string(),
        })
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, order: Order) -> StoreResult<Order> {
        let result = sqlx::query(
            "INSERT INTO orders \
             (increment_id, store_id, grand_total, currency, state, status, \
              customer_email, payment_info, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&order.increment_id)
        .bind(i64::from(order.store_id))
        .bind(order.grand_total)
        .bind(&order.currency)
        .bind(order.state.as_str())
        .bind(&order.status)
        .bind(&order.customer_email)
        .bind(Json(&order.payment_info))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(order),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Duplicate {
                    id: order.increment_id,
                })
            }
            Err(e) => Err(StoreError::from_sqlx(e)),
        }
    }

    async fn find_by_increment_id(&self, increment_id: &str) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE increment_id = $1",
            ORDER_COLUMNS
        ))
        .bind(increment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        match row {
            Some(row) => {
                let comments = Self::comments(&self.pool, increment_id).await?;
                Ok(Some(row.into_order(comments)?))
            }
            None => Ok(None),
        }
    }

    async fn mark_pending_payment(
        &self,
        increment_id: &str,
        payment_info: PaymentInfo,
    ) -> StoreResult<Order> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;
        let row = Self::lock_row(&mut tx, increment_id).await?;
        let from = row.state()?;
        if from.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id: increment_id.to_string(),
                from,
                to: OrderState::PendingPayment,
            });
        }

        let mut merged = row.payment_info.0;
        merged.merge(payment_info);

        let updated = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET state = $2, status = $3, payment_info = $4, updated_at = NOW() \
             WHERE increment_id = $1 RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(increment_id)
        .bind(OrderState::PendingPayment.as_str())
        .bind(OrderState::PendingPayment.default_status())
        .bind(Json(&merged))
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        let comments = Self::comments(&mut *tx, increment_id).await?;
        tx.commit().await.map_err(StoreError::from_sqlx)?;
        updated.into_order(comments)
    }

    async fn settle(
        &self,
        increment_id: &str,
        settlement: Settlement,
    ) -> StoreResult<SettleOutcome> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;
        let row = Self::lock_row(&mut tx, increment_id).await?;

        if row.state()?.is_terminal() {
            let comments = Self::comments(&mut *tx, increment_id).await?;
            tx.commit().await.map_err(StoreError::from_sqlx)?;
            return Ok(SettleOutcome::AlreadySettled(row.into_order(comments)?));
        }

        let mut merged = row.payment_info.0;
        merged.merge(settlement.payment_info);

        // The state guard keeps the update conditional even if the row lock is lost.
        let updated = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET state = $2, status = $3, payment_info = $4, updated_at = NOW() \
             WHERE increment_id = $1 AND state IN ('new', 'pending_payment') RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(increment_id)
        .bind(settlement.target.as_str())
        .bind(&settlement.status_label)
        .bind(Json(&merged))
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        let Some(updated) = updated else {
            warn!(order_id = %increment_id, "Order settled concurrently, skipping write");
            tx.rollback().await.map_err(StoreError::from_sqlx)?;
            let current = self.find_by_increment_id(increment_id).await?.ok_or_else(|| {
                StoreError::NotFound {
                    id: increment_id.to_string(),
                }
            })?;
            return Ok(SettleOutcome::AlreadySettled(current));
        };

        sqlx::query("INSERT INTO order_comments (increment_id, text) VALUES ($1, $2)")
            .bind(increment_id)
            .bind(&settlement.comment)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_sqlx)?;

        let comments = Self::comments(&mut *tx, increment_id).await?;
        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(SettleOutcome::Applied(updated.into_order(comments)?))
    }

    async fn list_stale_pending(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE state = 'pending_payment' AND updated_at <= $1 \
             ORDER BY updated_at",
            ORDER_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let comments = Self::comments(&self.pool, &row.increment_id).await?;
            orders.push(row.into_order(comments)?);
        }
        Ok(orders)
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                warn!("Health check failed: {}", e);
                StoreError::from_sqlx(e)
            })?;
        Ok(())
    }
}
