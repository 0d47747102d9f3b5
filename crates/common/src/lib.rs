//! Identifier types shared by every crate in the workspace.

pub mod entity;
pub mod types;

pub use entity::EntityKind;
pub use types::{CategoryId, OrderId, OrderItemId, ProductId, UserId};
