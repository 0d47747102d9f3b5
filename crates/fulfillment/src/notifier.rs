//! Order confirmation notifier trait and implementations.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::OrderId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One line of an order confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationLine {
    pub product_name: String,
    pub quantity: i32,
    /// Captured line price.
    pub price: Decimal,
}

/// The confirmation sent once an order is fully written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order_id: OrderId,
    pub status: String,
    pub user_name: String,
    pub user_email: String,
    pub items: Vec<ConfirmationLine>,
    pub total_price: Decimal,
}

/// The notifier could not deliver a confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct NotificationError(pub String);

/// Trait for delivering order confirmations.
#[async_trait]
pub trait OrderNotifier: Send + Sync {
    /// Delivers the confirmation of a newly created order.
    ///
    /// Called before the order transaction commits; an error rolls the
    /// order back.
    async fn order_created(
        &self,
        confirmation: &OrderConfirmation,
    ) -> Result<(), NotificationError>;
}

#[derive(Debug, Default)]
struct RecordingState {
    sent: Vec<OrderConfirmation>,
    fail_on_send: bool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    state: Arc<RwLock<RecordingState>>,
}

impl RecordingNotifier {
    /// Creates a new recording notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the notifier to fail every delivery.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_send = fail;
    }

    /// Returns every confirmation delivered so far.
    pub fn sent(&self) -> Vec<OrderConfirmation> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .clone()
    }
}

#[async_trait]
impl OrderNotifier for RecordingNotifier {
    async fn order_created(
        &self,
        confirmation: &OrderConfirmation,
    ) -> Result<(), NotificationError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.fail_on_send {
            return Err(NotificationError("Mail server rejected message".to_string()));
        }

        state.sent.push(confirmation.clone());
        Ok(())
    }
}

/// Notifier that writes each confirmation to the log as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl OrderNotifier for TracingNotifier {
    async fn order_created(
        &self,
        confirmation: &OrderConfirmation,
    ) -> Result<(), NotificationError> {
        let body = serde_json::to_string(confirmation)
            .map_err(|e| NotificationError(format!("Cannot encode confirmation: {e}")))?;
        tracing::info!(
            order_id = %confirmation.order_id,
            user_email = %confirmation.user_email,
            confirmation = %body,
            "Order confirmation"
        );
        Ok(())
    }
}
