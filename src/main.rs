use somnia_pay::api::{self, AppState};
use somnia_pay::config::{AppConfig, DatabaseConfig};
use somnia_pay::gateway::{GatewayClient, GatewayConfigProvider, GatewaySettings, StaticConfigProvider};
use somnia_pay::logging::init_tracing;
use somnia_pay::orders::{InMemoryOrderStore, OrderStore};
use somnia_pay::services::LogNotifier;
use somnia_pay::workers::{PendingOrderSweeper, SweeperConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

async fn init_order_store(config: &AppConfig) -> anyhow::Result<Arc<dyn OrderStore>> {
    match &config.database {
        Some(database) => connect_postgres(database).await,
        None => {
            warn!("DATABASE_URL not set, orders are kept in memory and lost on restart");
            Ok(Arc::new(InMemoryOrderStore::new()))
        }
    }
}

#[cfg(feature = "database")]
async fn connect_postgres(database: &DatabaseConfig) -> anyhow::Result<Arc<dyn OrderStore>> {
    use somnia_pay::orders::postgres::{init_pool, PoolConfig};
    use somnia_pay::orders::PgOrderStore;

    info!("📊 Initializing database connection pool...");
    let pool = init_pool(&database.url, PoolConfig::from(database))
        .await
        .map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            e
        })?;
    info!(
        max_connections = pool.options().get_max_connections(),
        "✅ Database connection pool initialized"
    );

    let store = PgOrderStore::new(pool);
    if database.run_migrations {
        store.migrate().await?;
        info!("✅ Database migrations applied");
    }
    Ok(Arc::new(store))
}

#[cfg(not(feature = "database"))]
async fn connect_postgres(_database: &DatabaseConfig) -> anyhow::Result<Arc<dyn OrderStore>> {
    anyhow::bail!("DATABASE_URL is set but the binary was built without the `database` feature")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    let environment = config.environment();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.runtime.environment_name,
        production = environment.is_production,
        "🚀 Starting Somnia payment service"
    );

    let settings = GatewaySettings::load(Some(&config.runtime.gateway_settings_path))?;
    let provider = Arc::new(StaticConfigProvider::from_settings(&settings, environment)?);
    let gateway_config: Arc<dyn GatewayConfigProvider> = provider.clone();
    info!(
        store_overrides = provider.store_ids().len(),
        "✅ Gateway settings loaded"
    );

    let orders = init_order_store(&config).await?;
    let gateway = Arc::new(GatewayClient::new(gateway_config.clone())?);
    let state = AppState::new(
        orders.clone(),
        gateway,
        gateway_config.clone(),
        Arc::new(LogNotifier::new()),
    );

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let sweeper_handle = if config.runtime.sweeper_enabled {
        let sweeper = PendingOrderSweeper::new(
            orders.clone(),
            gateway_config.clone(),
            SweeperConfig::from_env(),
        );
        Some(tokio::spawn(sweeper.run(worker_shutdown_rx)))
    } else {
        info!("⏭️  Pending order sweeper disabled (ORDER_SWEEPER_ENABLED=false)");
        None
    };

    let app = api::router(state);

    let addr: SocketAddr = config.server.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
    .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = sweeper_handle {
        if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for sweeper shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
