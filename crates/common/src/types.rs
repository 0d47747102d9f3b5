use serde::{Deserialize, Serialize};

/// Declares a typed wrapper around a serial `INTEGER` primary key.
///
/// The wrappers keep a product id from being passed where an order id is
/// expected, while staying `Copy` and binding to SQL as a plain `i32`.
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i32);

        impl $name {
            /// Wraps a raw database id.
            pub const fn new(id: i32) -> Self {
                Self(id)
            }

            /// Returns the raw database id.
            pub const fn as_i32(&self) -> i32 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }

        impl From<i32> for $name {
            fn from(id: i32) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i32 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

entity_id!(
    /// Identifier of a user row.
    UserId
);

entity_id!(
    /// Identifier of a product row.
    ProductId
);

entity_id!(
    /// Identifier of a product category row.
    CategoryId
);

entity_id!(
    /// Identifier of an order row.
    OrderId
);

entity_id!(
    /// Identifier of an order line item row.
    OrderItemId
);
