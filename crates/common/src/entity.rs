use serde::{Deserialize, Serialize};

/// The entity tables known to the backend.
///
/// Used to tag not-found errors and to build cache keys, so every variant
/// has a stable lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Product,
    ProductCategory,
    Order,
    OrderItem,
}

impl EntityKind {
    /// Returns the stable snake_case name of the entity.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Product => "product",
            EntityKind::ProductCategory => "product_category",
            EntityKind::Order => "order",
            EntityKind::OrderItem => "order_item",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
