//! Order fulfillment: inventory-aware order transactions and the order
//! listing service.
//!
//! [`OrderEngine`] creates and updates orders atomically against shared
//! product stock. [`OrderListing`] serves pages of orders with their items
//! from one grouped query.

pub mod engine;
pub mod error;
pub mod listing;
pub mod notifier;

pub use engine::{DEFAULT_ORDER_TIMEOUT, OrderEngine, OrderLine, OrderLineUpdate, OrderReceipt};
pub use error::{ErrorKind, OrderError, Result};
pub use listing::{OrderListing, OrderPage};
pub use notifier::{
    ConfirmationLine, NotificationError, OrderConfirmation, OrderNotifier, RecordingNotifier,
    TracingNotifier,
};
