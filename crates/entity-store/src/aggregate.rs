//! Aggregated order rows and their decoding.
//!
//! The order listing joins orders, line items, products and users and
//! groups by order, collapsing each order's items into parallel arrays
//! (`array_agg`). [`decode_order_rows`] zips those arrays back into one
//! [`OrderItemSummary`] per item and refuses rows whose arrays disagree in
//! length.

use chrono::{DateTime, Utc};
use common::{OrderId, OrderItemId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One grouped row of the order listing, as produced by the store.
///
/// `item_ids[i]`, `product_names[i]`, `item_quantities[i]` and
/// `item_prices[i]` describe the same line item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAggregateRow {
    pub order_id: OrderId,
    pub status: String,
    pub total_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub user_name: String,
    pub user_email: String,
    pub item_ids: Vec<i32>,
    pub product_names: Vec<String>,
    pub item_quantities: Vec<i32>,
    pub item_prices: Vec<Decimal>,
}

/// A page of grouped rows plus the unpaginated match count.
#[derive(Debug, Clone, Default)]
pub struct OrderRowPage {
    pub rows: Vec<OrderAggregateRow>,
    /// Orders matching the filter, ignoring pagination.
    pub total_count: i64,
}

/// A line item as shown in an order listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemSummary {
    pub id: OrderItemId,
    pub product_name: String,
    pub quantity: i32,
    pub price: Decimal,
}

/// An order with its nested line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderWithItems {
    pub id: OrderId,
    pub user_name: String,
    pub user_email: String,
    pub status: String,
    pub total_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemSummary>,
}

/// The parallel item arrays of a grouped row do not line up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Aggregate decode failed for order {order_id}: item arrays have mismatched lengths \
     (ids={ids}, names={names}, quantities={quantities}, prices={prices})"
)]
pub struct AggregateDecodeError {
    pub order_id: OrderId,
    pub ids: usize,
    pub names: usize,
    pub quantities: usize,
    pub prices: usize,
}

impl OrderAggregateRow {
    /// Zips the parallel item arrays into structured items.
    pub fn decode(self) -> Result<OrderWithItems, AggregateDecodeError> {
        let len = self.item_ids.len();
        if self.product_names.len() != len
            || self.item_quantities.len() != len
            || self.item_prices.len() != len
        {
            return Err(AggregateDecodeError {
                order_id: self.order_id,
                ids: len,
                names: self.product_names.len(),
                quantities: self.item_quantities.len(),
                prices: self.item_prices.len(),
            });
        }

        let items = self
            .item_ids
            .into_iter()
            .zip(self.product_names)
            .zip(self.item_quantities)
            .zip(self.item_prices)
            .map(|(((id, product_name), quantity), price)| OrderItemSummary {
                id: OrderItemId::new(id),
                product_name,
                quantity,
                price,
            })
            .collect();

        Ok(OrderWithItems {
            id: self.order_id,
            user_name: self.user_name,
            user_email: self.user_email,
            status: self.status,
            total_price: self.total_price,
            created_at: self.created_at,
            items,
        })
    }
}

/// Decodes every row of a page, failing on the first corrupt row.
pub fn decode_order_rows(
    rows: Vec<OrderAggregateRow>,
) -> Result<Vec<OrderWithItems>, AggregateDecodeError> {
    rows.into_iter().map(OrderAggregateRow::decode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(order_id: i32) -> OrderAggregateRow {
        OrderAggregateRow {
            order_id: OrderId::new(order_id),
            status: "Created".to_string(),
            total_price: Some(Decimal::from(1300)),
            created_at: Utc::now(),
            user_name: "Ada".to_string(),
            user_email: "ada@example.com".to_string(),
            item_ids: vec![10, 11],
            product_names: vec!["Lamp".to_string(), "Desk, oak".to_string()],
            item_quantities: vec![2, 1],
            item_prices: vec![Decimal::from(1000), Decimal::from(300)],
        }
    }

    #[test]
    fn decode_preserves_index_correspondence() {
        let order = row(1).decode().unwrap();

        assert_eq!(order.items.len(), 2);
        assert_eq!(order.items[0].id, OrderItemId::new(10));
        assert_eq!(order.items[0].product_name, "Lamp");
        assert_eq!(order.items[0].quantity, 2);
        assert_eq!(order.items[0].price, Decimal::from(1000));
        assert_eq!(order.items[1].product_name, "Desk, oak");
        assert_eq!(order.items[1].price, Decimal::from(300));
    }

    #[test]
    fn decode_rejects_mismatched_arrays() {
        let mut corrupt = row(7);
        corrupt.item_prices.pop();

        let err = corrupt.decode().unwrap_err();
        assert_eq!(err.order_id, OrderId::new(7));
        assert_eq!(err.ids, 2);
        assert_eq!(err.prices, 1);
    }

    #[test]
    fn decode_rows_fails_loudly_instead_of_truncating() {
        let mut corrupt = row(2);
        corrupt.product_names.push("Ghost".to_string());

        let result = decode_order_rows(vec![row(1), corrupt]);
        assert!(result.is_err());
    }
}
