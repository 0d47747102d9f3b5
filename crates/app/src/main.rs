//! Order fulfillment service entry point.

use app::{AppError, Config, Services, telemetry};
use cache::RedisCache;
use entity_store::{OrderListQuery, PostgresEntityStore};
use fulfillment::TracingNotifier;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn run(config: Config) -> Result<(), AppError> {
    telemetry::init_metrics(config.metrics_addr)?;
    tracing::info!(addr = %config.metrics_addr, "Prometheus exporter listening");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    let store = PostgresEntityStore::new(pool.clone());
    store.run_migrations().await?;
    tracing::info!("Database migrations applied");

    let cache = RedisCache::connect(config.cache_config()).await?;
    cache.ping().await?;

    let services = Services::build(&config, store, cache, TracingNotifier).await?;
    let orders = services.listing.get_orders(&OrderListQuery::new()).await?;
    tracing::info!(
        orders = orders.total_count,
        "Order fulfillment service ready"
    );

    shutdown_signal().await;

    pool.close().await;
    tracing::info!("service shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = Config::from_env().expect("invalid configuration");

    telemetry::init_tracing(&config.log_level, config.log_format);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Service failed");
        std::process::exit(1);
    }
}
