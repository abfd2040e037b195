//! Health check module
//! Provides health status for the service and the systems it depends on

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

use crate::gateway::{PaymentGateway, DEFAULT_STORE_ID};
use crate::orders::OrderStore;

const STORE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const GATEWAY_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Time a check and fold timeout and failure into a component status.
async fn probe<F, E>(name: &str, limit: Duration, check: F) -> ComponentHealth
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    match timeout(limit, check).await {
        Ok(Ok(())) => {
            let response_time = start.elapsed().as_millis();
            info!("{} health check: OK ({}ms)", name, response_time);
            ComponentHealth::up(Some(response_time))
        }
        Ok(Err(e)) => {
            error!("{} health check failed: {}", name, e);
            ComponentHealth::down(Some(e.to_string()))
        }
        Err(_) => {
            error!("{} health check timed out", name);
            ComponentHealth::down(Some("Timeout".to_string()))
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    orders: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl HealthChecker {
    pub fn new(orders: Arc<dyn OrderStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { orders, gateway }
    }

    /// The order store is required; a gateway outage only degrades the
    /// service since callbacks are resent.
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let store = probe("Order store", STORE_CHECK_TIMEOUT, self.orders.health_check()).await;
        let gateway = probe(
            "Payment gateway",
            GATEWAY_CHECK_TIMEOUT,
            async {
                self.gateway
                    .test_connection(None, DEFAULT_STORE_ID)
                    .await
                    .map(|_| ())
            },
        )
        .await;
        let gateway = match gateway.status {
            ComponentState::Down => ComponentHealth::warning(None, gateway.details),
            _ => gateway,
        };

        health_status.status = if store.status == ComponentState::Down {
            HealthState::Unhealthy
        } else if gateway.status == ComponentState::Warning {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        health_status.checks.insert("order_store".to_string(), store);
        health_status.checks.insert("gateway".to_string(), gateway);
        health_status
    }
}
