use entity_store::{EntityStore, OrderListQuery, OrderWithItems, decode_order_rows};
use serde::Serialize;

use crate::error::Result;

/// One page of orders with their items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderPage {
    pub orders: Vec<OrderWithItems>,
    /// Orders matching the query filter, ignoring pagination.
    pub total_count: i64,
}

impl OrderPage {
    /// Number of pages of `limit` orders needed for `total_count`.
    pub fn page_count(&self, limit: u32) -> i64 {
        if limit == 0 {
            return 0;
        }
        let limit = i64::from(limit);
        (self.total_count + limit - 1) / limit
    }
}

/// Read-only order listing served straight from the entity store.
#[derive(Clone)]
pub struct OrderListing<S> {
    store: S,
}

impl<S: EntityStore> OrderListing<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns one page of orders, each with its nested line items.
    #[tracing::instrument(skip(self, query), fields(limit = query.pagination.limit, page = query.pagination.page))]
    pub async fn get_orders(&self, query: &OrderListQuery) -> Result<OrderPage> {
        query.validate()?;

        let page = self.store.fetch_order_page(query).await?;
        let orders = decode_order_rows(page.rows)?;

        tracing::debug!(
            returned = orders.len(),
            total = page.total_count,
            "Listed orders"
        );
        Ok(OrderPage {
            orders,
            total_count: page.total_count,
        })
    }
}
