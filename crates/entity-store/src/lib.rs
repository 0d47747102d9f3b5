//! Entity Store: the relational source of truth.
//!
//! Provides the row models, the [`EntityStore`] and [`StoreTransaction`]
//! traits, an in-memory implementation for tests and a PostgreSQL
//! implementation, plus the grouped order listing query and the decoding of
//! its aggregated rows.

pub mod aggregate;
pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod query;
pub mod store;

pub use aggregate::{
    AggregateDecodeError, OrderAggregateRow, OrderItemSummary, OrderRowPage, OrderWithItems,
    decode_order_rows,
};
pub use common::{CategoryId, EntityKind, OrderId, OrderItemId, ProductId, UserId};
pub use error::{Result, StoreError};
pub use memory::{InMemoryEntityStore, RowCounts};
pub use model::{
    NewCategory, NewOrder, NewOrderItem, NewProduct, NewUser, Order, OrderItem, Product,
    ProductCategory, ProductWithCategory, User,
};
pub use postgres::PostgresEntityStore;
pub use query::{
    DateRange, OrderListQuery, OrderSortColumn, Pagination, ProductFilter, QueryValidationError,
    SortDirection, SortKey,
};
pub use store::{EntityStore, EntityStream, StoreTransaction};
