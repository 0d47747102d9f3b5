//! Row models for the entity tables.
//!
//! Each table has a full row type, as read back from the store with its
//! generated id and timestamps, and a `New*` input type for inserts.
//!
//! Every update moves a row's `updated_at` strictly forward, by at least one
//! microsecond, so it orders the committed versions of that row.

use chrono::{DateTime, Utc};
use common::{CategoryId, OrderId, OrderItemId, ProductId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A user. Referenced by orders (as buyer) and products (as author).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    /// Fixed id for sentinel rows; `None` lets the store assign one.
    pub id: Option<UserId>,
    pub name: String,
    pub email: String,
    pub role: String,
    pub status: String,
}

/// A product with its stock on hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    /// Unit price.
    pub price: Decimal,
    /// Stock on hand; never negative.
    pub quantity: i32,
    pub category_id: CategoryId,
    pub author_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting (or bulk upserting) a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub quantity: i32,
    pub category_id: CategoryId,
    pub author_id: UserId,
}

/// A product listed together with the name of its category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductWithCategory {
    pub product: Product,
    pub category_name: String,
}

/// A product category. Names are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCategory {
    pub id: CategoryId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting a product category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCategory {
    /// Fixed id for sentinel rows; `None` lets the store assign one.
    pub id: Option<CategoryId>,
    pub name: String,
    pub description: String,
}

/// An order header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    /// Free-form label such as `"Created"` or `"Updated"`.
    pub status: String,
    /// Sum of the order's line item prices; `None` until first priced.
    pub total_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting an order header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: UserId,
    pub status: String,
    pub total_price: Option<Decimal>,
}

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i32,
    /// Line price (`unit price * quantity`) captured at purchase time.
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting a line item into an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub quantity: i32,
    pub price: Decimal,
}
