//! Order fulfillment service bootstrap.
//!
//! Loads configuration, wires the entity store, cache mirror, repository,
//! order engine and listing together, and seeds the default rows.

pub mod config;
pub mod telemetry;

use cache::{CacheError, CacheMirror};
use entity_store::EntityStore;
use fulfillment::{OrderEngine, OrderListing, OrderNotifier};
use repository::{CachedRepository, RepositoryError};
use thiserror::Error;

pub use config::{Config, ConfigError, LogFormat};

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Seeding default rows failed: {0}")]
    Seed(#[from] RepositoryError),

    #[error("Order listing failed: {0}")]
    Listing(#[from] fulfillment::OrderError),

    #[error("Metrics exporter error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// The wired application services.
pub struct Services<S, C, N>
where
    S: EntityStore,
    C: CacheMirror,
    N: OrderNotifier,
{
    pub engine: OrderEngine<S, C, N>,
    pub listing: OrderListing<S>,
}

impl<S, C, N> Services<S, C, N>
where
    S: EntityStore + Clone,
    C: CacheMirror,
    N: OrderNotifier,
{
    /// Wires the services over `store` and `cache` and makes sure the
    /// default user and category exist.
    pub async fn build(
        config: &Config,
        store: S,
        cache: C,
        notifier: N,
    ) -> Result<Self, AppError> {
        let repository = CachedRepository::new(store.clone(), cache)
            .with_import_chunk_size(config.import_chunk_size);

        let user = repository.get_default_user().await?;
        let category = repository.get_default_category().await?;
        tracing::info!(
            user_id = %user.id,
            category_id = %category.id,
            "Default rows ready"
        );

        Ok(Self {
            engine: OrderEngine::new(repository, notifier).with_timeout(config.order_timeout),
            listing: OrderListing::new(store),
        })
    }
}
