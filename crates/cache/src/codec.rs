//! Field encodings of the cached row types.
//!
//! Integers and strings are stored verbatim, decimals in their canonical
//! string form (scale preserved), timestamps as RFC 3339 and an absent
//! nullable decimal as the empty string.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::EntityKind;
use entity_store::{Order, OrderItem, Product, ProductCategory, User};
use rust_decimal::Decimal;

use crate::{CacheError, FieldMap, Result};

/// A row type that can live in the cache mirror.
pub trait CacheRecord: Sized + Send + Sync {
    /// Entity name used in the cache key.
    const ENTITY: EntityKind;

    /// The id used in the cache key.
    fn cache_id(&self) -> i32;

    /// When this version of the row was written.
    fn updated_at(&self) -> DateTime<Utc>;

    /// Orders the versions of one row: a later write has a greater version.
    fn version(&self) -> i64 {
        self.updated_at().timestamp_micros()
    }

    /// Encodes every column as a string field.
    fn to_fields(&self) -> Vec<(String, String)>;

    /// Decodes a row from the fields stored under `key`.
    fn from_fields(key: &str, fields: &FieldMap) -> Result<Self>;
}

struct FieldReader<'a> {
    key: &'a str,
    fields: &'a FieldMap,
}

impl<'a> FieldReader<'a> {
    fn new(key: &'a str, fields: &'a FieldMap) -> Self {
        Self { key, fields }
    }

    fn error(&self, field: &str) -> CacheError {
        CacheError::Decode {
            key: self.key.to_string(),
            field: field.to_string(),
        }
    }

    fn raw(&self, field: &str) -> Result<&'a str> {
        self.fields
            .get(field)
            .map(String::as_str)
            .ok_or_else(|| self.error(field))
    }

    fn string(&self, field: &str) -> Result<String> {
        self.raw(field).map(str::to_string)
    }

    fn parse<T: FromStr>(&self, field: &str) -> Result<T> {
        self.raw(field)?.parse().map_err(|_| self.error(field))
    }

    fn optional_decimal(&self, field: &str) -> Result<Option<Decimal>> {
        match self.raw(field)? {
            "" => Ok(None),
            raw => raw.parse().map(Some).map_err(|_| self.error(field)),
        }
    }

    fn timestamp(&self, field: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.raw(field)?)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|_| self.error(field))
    }
}

fn field(name: &str, value: impl ToString) -> (String, String) {
    (name.to_string(), value.to_string())
}

fn timestamp_field(name: &str, value: &DateTime<Utc>) -> (String, String) {
    (name.to_string(), value.to_rfc3339())
}

impl CacheRecord for User {
    const ENTITY: EntityKind = EntityKind::User;

    fn cache_id(&self) -> i32 {
        self.id.as_i32()
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            field("id", self.id),
            field("name", &self.name),
            field("email", &self.email),
            field("role", &self.role),
            field("status", &self.status),
            timestamp_field("created_at", &self.created_at),
            timestamp_field("updated_at", &self.updated_at),
        ]
    }

    fn from_fields(key: &str, fields: &FieldMap) -> Result<Self> {
        let r = FieldReader::new(key, fields);
        Ok(User {
            id: r.parse("id")?,
            name: r.string("name")?,
            email: r.string("email")?,
            role: r.string("role")?,
            status: r.string("status")?,
            created_at: r.timestamp("created_at")?,
            updated_at: r.timestamp("updated_at")?,
        })
    }
}

impl CacheRecord for Product {
    const ENTITY: EntityKind = EntityKind::Product;

    fn cache_id(&self) -> i32 {
        self.id.as_i32()
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            field("id", self.id),
            field("name", &self.name),
            field("description", &self.description),
            field("price", self.price),
            field("quantity", self.quantity),
            field("category_id", self.category_id),
            field("author_id", self.author_id),
            timestamp_field("created_at", &self.created_at),
            timestamp_field("updated_at", &self.updated_at),
        ]
    }

    fn from_fields(key: &str, fields: &FieldMap) -> Result<Self> {
        let r = FieldReader::new(key, fields);
        Ok(Product {
            id: r.parse("id")?,
            name: r.string("name")?,
            description: r.string("description")?,
            price: r.parse("price")?,
            quantity: r.parse("quantity")?,
            category_id: r.parse("category_id")?,
            author_id: r.parse("author_id")?,
            created_at: r.timestamp("created_at")?,
            updated_at: r.timestamp("updated_at")?,
        })
    }
}

impl CacheRecord for ProductCategory {
    const ENTITY: EntityKind = EntityKind::ProductCategory;

    fn cache_id(&self) -> i32 {
        self.id.as_i32()
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            field("id", self.id),
            field("name", &self.name),
            field("description", &self.description),
            timestamp_field("created_at", &self.created_at),
            timestamp_field("updated_at", &self.updated_at),
        ]
    }

    fn from_fields(key: &str, fields: &FieldMap) -> Result<Self> {
        let r = FieldReader::new(key, fields);
        Ok(ProductCategory {
            id: r.parse("id")?,
            name: r.string("name")?,
            description: r.string("description")?,
            created_at: r.timestamp("created_at")?,
            updated_at: r.timestamp("updated_at")?,
        })
    }
}

impl CacheRecord for Order {
    const ENTITY: EntityKind = EntityKind::Order;

    fn cache_id(&self) -> i32 {
        self.id.as_i32()
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            field("id", self.id),
            field("user_id", self.user_id),
            field("status", &self.status),
            field(
                "total_price",
                self.total_price.map(|p| p.to_string()).unwrap_or_default(),
            ),
            timestamp_field("created_at", &self.created_at),
            timestamp_field("updated_at", &self.updated_at),
        ]
    }

    fn from_fields(key: &str, fields: &FieldMap) -> Result<Self> {
        let r = FieldReader::new(key, fields);
        Ok(Order {
            id: r.parse("id")?,
            user_id: r.parse("user_id")?,
            status: r.string("status")?,
            total_price: r.optional_decimal("total_price")?,
            created_at: r.timestamp("created_at")?,
            updated_at: r.timestamp("updated_at")?,
        })
    }
}

impl CacheRecord for OrderItem {
    const ENTITY: EntityKind = EntityKind::OrderItem;

    fn cache_id(&self) -> i32 {
        self.id.as_i32()
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            field("id", self.id),
            field("order_id", self.order_id),
            field("product_id", self.product_id),
            field("quantity", self.quantity),
            field("price", self.price),
            timestamp_field("created_at", &self.created_at),
            timestamp_field("updated_at", &self.updated_at),
        ]
    }

    fn from_fields(key: &str, fields: &FieldMap) -> Result<Self> {
        let r = FieldReader::new(key, fields);
        Ok(OrderItem {
            id: r.parse("id")?,
            order_id: r.parse("order_id")?,
            product_id: r.parse("product_id")?,
            quantity: r.parse("quantity")?,
            price: r.parse("price")?,
            created_at: r.timestamp("created_at")?,
            updated_at: r.timestamp("updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CategoryId, OrderId, ProductId, UserId};

    fn product() -> Product {
        Product {
            id: ProductId::new(3),
            name: "Desk, oak".to_string(),
            description: "Solid: 120cm".to_string(),
            price: Decimal::new(129_950, 2),
            quantity: 20,
            category_id: CategoryId::new(1),
            author_id: UserId::new(1),
            created_at: "2024-05-01T10:20:30.123456Z".parse().unwrap(),
            updated_at: "2024-05-02T08:00:00Z".parse().unwrap(),
        }
    }

    fn as_map(fields: Vec<(String, String)>) -> FieldMap {
        fields.into_iter().collect()
    }

    #[test]
    fn product_fields_decode_to_the_same_row() {
        let original = product();
        let fields = as_map(original.to_fields());

        assert_eq!(fields["price"], "1299.50");
        assert_eq!(fields["quantity"], "20");

        let decoded = Product::from_fields("product:3", &fields).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn version_follows_updated_at() {
        let older = product();
        let mut newer = product();
        newer.updated_at = "2024-05-02T08:00:00.000001Z".parse().unwrap();

        assert!(newer.version() > older.version());
        assert_eq!(older.version(), older.updated_at.timestamp_micros());
    }

    #[test]
    fn absent_order_total_is_an_empty_field() {
        let order = Order {
            id: OrderId::new(9),
            user_id: UserId::new(1),
            status: "Created".to_string(),
            total_price: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let fields = as_map(order.to_fields());
        assert_eq!(fields["total_price"], "");

        let decoded = Order::from_fields("order:9", &fields).unwrap();
        assert_eq!(decoded.total_price, None);
    }

    #[test]
    fn malformed_field_names_key_and_field() {
        let mut fields = as_map(product().to_fields());
        fields.insert("quantity".to_string(), "many".to_string());

        let err = Product::from_fields("product:3", &fields).unwrap_err();
        match err {
            CacheError::Decode { key, field } => {
                assert_eq!(key, "product:3");
                assert_eq!(field, "quantity");
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn missing_field_is_a_decode_error() {
        let mut fields = as_map(product().to_fields());
        fields.remove("created_at");

        assert!(matches!(
            Product::from_fields("product:3", &fields),
            Err(CacheError::Decode { .. })
        ));
    }
}
