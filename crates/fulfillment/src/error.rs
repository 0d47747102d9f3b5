//! Order error taxonomy and its mapping to stable external kinds.

use std::time::Duration;

use cache::CacheError;
use common::{EntityKind, OrderId, ProductId};
use entity_store::{AggregateDecodeError, QueryValidationError, StoreError};
use repository::RepositoryError;
use thiserror::Error;

use crate::notifier::NotificationError;

/// Errors returned by order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// A referenced row does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: EntityKind, id: i32 },

    /// A line item asks for more stock than is available.
    #[error(
        "Insufficient quantity for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientQuantity {
        product_id: ProductId,
        requested: i32,
        available: i32,
    },

    /// The cache mirror failed.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(#[from] CacheError),

    /// The order transaction committed, but publishing its rows to the cache
    /// failed. The order exists; entries it touched may be stale until the
    /// rows are written again.
    #[error("Order {order_id} committed but its cache refresh failed: {source}")]
    CommittedCacheStale {
        order_id: OrderId,
        #[source]
        source: CacheError,
    },

    /// The request was malformed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The listing query was malformed.
    #[error("Invalid order query: {0}")]
    InvalidQuery(#[from] QueryValidationError),

    /// The entity store failed.
    #[error("Persistence failed: {0}")]
    Persistence(StoreError),

    /// A grouped listing row could not be decoded.
    #[error("Persistence failed: {0}")]
    CorruptAggregate(#[from] AggregateDecodeError),

    /// The order confirmation could not be delivered.
    #[error("Notification failed: {0}")]
    Notification(#[from] NotificationError),

    /// The operation did not finish within its deadline.
    #[error("Order operation exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RowNotFound { entity, id } => OrderError::NotFound { entity, id },
            StoreError::InvalidQuery(e) => OrderError::InvalidQuery(e),
            other => OrderError::Persistence(other),
        }
    }
}

impl From<RepositoryError> for OrderError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => OrderError::NotFound { entity, id },
            RepositoryError::NameNotFound { entity, name } => {
                OrderError::Validation(format!("unknown {entity} '{name}'"))
            }
            RepositoryError::Cache(e) => OrderError::CacheUnavailable(e),
            RepositoryError::Store(e) => e.into(),
        }
    }
}

/// External error kinds that adapters map to stable codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InsufficientQuantity,
    CacheUnavailable,
    ValidationFailed,
    PersistenceFailed,
    NotificationFailed,
    DeadlineExceeded,
}

impl ErrorKind {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InsufficientQuantity => "INSUFFICIENT_QUANTITY",
            ErrorKind::CacheUnavailable => "CACHE_UNAVAILABLE",
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::PersistenceFailed => "PERSISTENCE_FAILED",
            ErrorKind::NotificationFailed => "NOTIFICATION_FAILED",
            ErrorKind::DeadlineExceeded => "DEADLINE_EXCEEDED",
        }
    }

    /// HTTP status an adapter should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::InsufficientQuantity => 409,
            ErrorKind::CacheUnavailable => 503,
            ErrorKind::ValidationFailed => 400,
            ErrorKind::PersistenceFailed => 500,
            ErrorKind::NotificationFailed => 502,
            ErrorKind::DeadlineExceeded => 504,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl OrderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::NotFound { .. } => ErrorKind::NotFound,
            OrderError::InsufficientQuantity { .. } => ErrorKind::InsufficientQuantity,
            OrderError::CacheUnavailable(_) => ErrorKind::CacheUnavailable,
            OrderError::CommittedCacheStale { .. } => ErrorKind::CacheUnavailable,
            OrderError::Validation(_) => ErrorKind::ValidationFailed,
            OrderError::InvalidQuery(_) => ErrorKind::ValidationFailed,
            OrderError::Persistence(_) => ErrorKind::PersistenceFailed,
            OrderError::CorruptAggregate(_) => ErrorKind::PersistenceFailed,
            OrderError::Notification(_) => ErrorKind::NotificationFailed,
            OrderError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
        }
    }

    /// The id of an order that was committed even though the call failed.
    pub fn committed_order(&self) -> Option<OrderId> {
        match self {
            OrderError::CommittedCacheStale { order_id, .. } => Some(*order_id),
            _ => None,
        }
    }

    /// The missing entity, for not-found errors.
    pub fn not_found_entity(&self) -> Option<EntityKind> {
        match self {
            OrderError::NotFound { entity, .. } => Some(*entity),
            _ => None,
        }
    }
}

/// Result type for order operations.
pub type Result<T> = std::result::Result<T, OrderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_not_found_kind() {
        let err: OrderError = StoreError::RowNotFound {
            entity: EntityKind::Order,
            id: 12,
        }
        .into();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.not_found_entity(), Some(EntityKind::Order));
        assert_eq!(err.to_string(), "order 12 not found");
    }

    #[test]
    fn repository_cache_error_is_cache_unavailable() {
        let err: OrderError =
            RepositoryError::Cache(CacheError::Unavailable("down".to_string())).into();
        assert_eq!(err.kind(), ErrorKind::CacheUnavailable);
        assert_eq!(err.kind().http_status(), 503);
    }

    #[test]
    fn committed_order_survives_a_cache_failure() {
        let err = OrderError::CommittedCacheStale {
            order_id: OrderId::new(31),
            source: CacheError::Timeout(Duration::from_millis(250)),
        };
        assert_eq!(err.kind(), ErrorKind::CacheUnavailable);
        assert_eq!(err.committed_order(), Some(OrderId::new(31)));
        assert!(err.to_string().starts_with("Order 31 committed"));

        let uncommitted = OrderError::CacheUnavailable(CacheError::Timeout(Duration::ZERO));
        assert_eq!(uncommitted.committed_order(), None);
    }

    #[test]
    fn other_store_errors_are_persistence_failures() {
        let err: OrderError = StoreError::CheckViolation {
            entity: EntityKind::Product,
            detail: "products_quantity_check".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::PersistenceFailed);
        assert_eq!(err.kind().code(), "PERSISTENCE_FAILED");
    }

    #[test]
    fn invalid_query_is_validation_failure() {
        let err: OrderError = StoreError::InvalidQuery(QueryValidationError::ZeroLimit).into();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert_eq!(err.kind().http_status(), 400);
    }

    #[test]
    fn insufficient_quantity_message_names_the_product() {
        let err = OrderError::InsufficientQuantity {
            product_id: ProductId::new(4),
            requested: 10,
            available: 5,
        };
        assert_eq!(err.kind(), ErrorKind::InsufficientQuantity);
        assert_eq!(
            err.to_string(),
            "Insufficient quantity for product 4: requested 10, available 5"
        );
    }
}
