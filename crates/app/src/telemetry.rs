//! Tracing and Prometheus setup.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogFormat;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_level` when set.
pub fn init_tracing(default_level: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Installs the Prometheus recorder with a scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!("cache_hits_total", "Accessor reads served from the cache");
    metrics::describe_counter!(
        "cache_misses_total",
        "Accessor reads that fell back to the entity store"
    );
    metrics::describe_counter!("orders_created_total", "Orders committed by create");
    metrics::describe_counter!("orders_updated_total", "Orders committed by update");
    metrics::describe_counter!(
        "order_transactions_rolled_back_total",
        "Order transactions rolled back on error"
    );
    metrics::describe_histogram!(
        "order_transaction_duration_seconds",
        metrics::Unit::Seconds,
        "Duration of order operations"
    );
}
