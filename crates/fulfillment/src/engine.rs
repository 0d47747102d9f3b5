//! Inventory-aware order transactions.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::{Duration, Instant};

use cache::CacheMirror;
use common::{EntityKind, OrderId, OrderItemId, ProductId, UserId};
use entity_store::{
    EntityStore, NewOrder, NewOrderItem, Order, OrderItem, Product, StoreTransaction, User,
};
use repository::CachedRepository;
use rust_decimal::Decimal;

use crate::error::{OrderError, Result};
use crate::notifier::{ConfirmationLine, OrderConfirmation, OrderNotifier};

/// Deadline applied to each order operation unless overridden.
pub const DEFAULT_ORDER_TIMEOUT: Duration = Duration::from_secs(5);

/// A requested line of a new order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: i32,
}

impl OrderLine {
    pub fn new(product_id: ProductId, quantity: i32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// A requested line of an order update.
///
/// `item_id` names an existing line of the same order to rewrite; a line
/// without one, or whose id does not resolve, is added as a new item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLineUpdate {
    pub item_id: Option<OrderItemId>,
    pub product_id: ProductId,
    pub quantity: i32,
}

/// The committed state of an order after a successful operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderReceipt {
    pub order: Order,
    /// Every line item of the order, ordered by id.
    pub items: Vec<OrderItem>,
}

impl OrderReceipt {
    /// Sum of the captured line prices.
    pub fn items_total(&self) -> Decimal {
        self.items.iter().map(|item| item.price).sum()
    }
}

/// Rows written by a transaction, published to the cache after commit.
struct StagedOrder {
    order: Order,
    items: Vec<OrderItem>,
    products: BTreeMap<ProductId, Product>,
}

/// Creates and updates orders atomically against product stock.
///
/// Each operation resolves its user and every distinct product through the
/// cache-aside repository before the store transaction opens, so the
/// transaction never waits on a second connection. Inside it, stock is
/// checked and decremented on the locked row. Any error after the
/// transaction opens rolls it back; cache entries are refreshed only after
/// a successful commit.
pub struct OrderEngine<S, C, N>
where
    S: EntityStore,
    C: CacheMirror,
    N: OrderNotifier,
{
    repository: CachedRepository<S, C>,
    notifier: N,
    timeout: Duration,
}

impl<S, C, N> OrderEngine<S, C, N>
where
    S: EntityStore,
    C: CacheMirror,
    N: OrderNotifier,
{
    /// Creates a new order engine.
    pub fn new(repository: CachedRepository<S, C>, notifier: N) -> Self {
        Self {
            repository,
            notifier,
            timeout: DEFAULT_ORDER_TIMEOUT,
        }
    }

    /// Sets the deadline of each operation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn repository(&self) -> &CachedRepository<S, C> {
        &self.repository
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Creates an order for `user_id` with the given lines.
    ///
    /// The confirmation is sent before commit; if it fails the order and
    /// every stock decrement are rolled back.
    ///
    /// A cache failure after commit returns [`OrderError::CommittedCacheStale`]
    /// carrying the id of the order, which stays committed.
    #[tracing::instrument(skip(self, lines), fields(user_id = %user_id, lines = lines.len()))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        status: &str,
        lines: Vec<OrderLine>,
    ) -> Result<OrderReceipt> {
        if lines.is_empty() {
            return Err(OrderError::Validation(
                "an order needs at least one item".to_string(),
            ));
        }
        validate_quantities(lines.iter().map(|line| line.quantity))?;

        let receipt = self
            .with_deadline(self.run_create(user_id, status, lines))
            .await?;

        tracing::info!(
            order_id = %receipt.order.id,
            total = %receipt.items_total(),
            "Order created"
        );
        Ok(receipt)
    }

    /// Updates an order's user, status and lines.
    ///
    /// The order total is recomputed from all of its line items. As with
    /// [`create_order`](Self::create_order), a cache failure after commit is
    /// reported as [`OrderError::CommittedCacheStale`].
    #[tracing::instrument(skip(self, lines), fields(order_id = %order_id, user_id = %user_id, lines = lines.len()))]
    pub async fn update_order(
        &self,
        order_id: OrderId,
        user_id: UserId,
        status: &str,
        lines: Vec<OrderLineUpdate>,
    ) -> Result<OrderReceipt> {
        validate_quantities(lines.iter().map(|line| line.quantity))?;

        let receipt = self
            .with_deadline(self.run_update(order_id, user_id, status, lines))
            .await?;

        tracing::info!(order_id = %receipt.order.id, "Order updated");
        Ok(receipt)
    }

    /// Runs `operation` under the engine deadline. Expiry drops the
    /// operation, and with it any open transaction.
    async fn with_deadline<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "Order operation deadline exceeded");
                Err(OrderError::DeadlineExceeded(self.timeout))
            }
        };
        metrics::histogram!("order_transaction_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn run_create(
        &self,
        user_id: UserId,
        status: &str,
        lines: Vec<OrderLine>,
    ) -> Result<OrderReceipt> {
        let user = self.repository.get_user(user_id).await?;
        self.resolve_products(lines.iter().map(|line| line.product_id)).await?;

        let mut tx = self.repository.store().begin().await?;

        let staged = match self.stage_create(tx.as_mut(), &user, status, &lines).await {
            Ok(staged) => staged,
            Err(e) => return Err(self.abort(tx, e).await),
        };

        let confirmation = confirmation(&user, &staged);
        if let Err(e) = self.notifier.order_created(&confirmation).await {
            return Err(self.abort(tx, e.into()).await);
        }

        tx.commit().await?;
        metrics::counter!("orders_created_total").increment(1);
        self.publish(&staged).await?;

        Ok(OrderReceipt {
            order: staged.order,
            items: staged.items,
        })
    }

    async fn run_update(
        &self,
        order_id: OrderId,
        user_id: UserId,
        status: &str,
        lines: Vec<OrderLineUpdate>,
    ) -> Result<OrderReceipt> {
        let user = self.repository.get_user(user_id).await?;
        self.resolve_products(lines.iter().map(|line| line.product_id)).await?;

        let mut tx = self.repository.store().begin().await?;

        let staged = match self
            .stage_update(tx.as_mut(), order_id, &user, status, &lines)
            .await
        {
            Ok(staged) => staged,
            Err(e) => return Err(self.abort(tx, e).await),
        };

        tx.commit().await?;
        metrics::counter!("orders_updated_total").increment(1);
        self.publish(&staged).await?;

        Ok(OrderReceipt {
            order: staged.order,
            items: staged.items,
        })
    }

    /// Resolves each distinct product through the repository, so an unknown
    /// product fails with not-found before any connection is held.
    async fn resolve_products(&self, ids: impl Iterator<Item = ProductId>) -> Result<()> {
        for id in ids.collect::<BTreeSet<_>>() {
            self.repository.get_product(id).await?;
        }
        Ok(())
    }

    async fn stage_create(
        &self,
        tx: &mut dyn StoreTransaction,
        user: &User,
        status: &str,
        lines: &[OrderLine],
    ) -> Result<StagedOrder> {
        let order = tx
            .insert_order(NewOrder {
                user_id: user.id,
                status: status.to_string(),
                total_price: Some(Decimal::ZERO),
            })
            .await?;

        let mut products = BTreeMap::new();
        let mut new_items = Vec::with_capacity(lines.len());
        let mut total = Decimal::ZERO;

        for line in lines {
            let product = self.take_stock(tx, line.product_id, line.quantity).await?;
            let price = product.price * Decimal::from(line.quantity);
            total += price;
            new_items.push(NewOrderItem {
                product_id: product.id,
                quantity: line.quantity,
                price,
            });
            products.insert(product.id, product);
        }

        let items = tx.insert_order_items(order.id, new_items).await?;
        let order = tx
            .update_order(&Order {
                total_price: Some(total),
                ..order
            })
            .await?;

        Ok(StagedOrder {
            order,
            items,
            products,
        })
    }

    async fn stage_update(
        &self,
        tx: &mut dyn StoreTransaction,
        order_id: OrderId,
        user: &User,
        status: &str,
        lines: &[OrderLineUpdate],
    ) -> Result<StagedOrder> {
        let mut order = tx
            .lock_order(order_id)
            .await?
            .ok_or(OrderError::NotFound {
                entity: EntityKind::Order,
                id: order_id.as_i32(),
            })?;

        let mut products = BTreeMap::new();
        let mut new_items = Vec::new();

        for line in lines {
            let product = self.take_stock(tx, line.product_id, line.quantity).await?;
            let price = product.price * Decimal::from(line.quantity);

            let existing = match line.item_id {
                Some(item_id) => match tx.find_order_item(item_id).await? {
                    Some(item) if item.order_id == order.id => Some(item),
                    _ => {
                        tracing::warn!(
                            item_id = %item_id,
                            order_id = %order.id,
                            "Order item not found on order, adding as new line"
                        );
                        None
                    }
                },
                None => None,
            };

            match existing {
                Some(item) => {
                    tx.update_order_item(&OrderItem {
                        product_id: product.id,
                        quantity: line.quantity,
                        price,
                        ..item
                    })
                    .await?;
                }
                None => new_items.push(NewOrderItem {
                    product_id: product.id,
                    quantity: line.quantity,
                    price,
                }),
            }
            products.insert(product.id, product);
        }

        tx.insert_order_items(order.id, new_items).await?;

        let items = tx.list_order_items(order.id).await?;
        order.user_id = user.id;
        order.status = status.to_string();
        order.total_price = Some(items.iter().map(|item| item.price).sum());
        let order = tx.update_order(&order).await?;

        Ok(StagedOrder {
            order,
            items,
            products,
        })
    }

    /// Checks and decrements the stock of one product inside `tx`.
    ///
    /// Only `tx` is touched here. The check runs on the locked row, which
    /// also reflects earlier lines of this order.
    async fn take_stock(
        &self,
        tx: &mut dyn StoreTransaction,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<Product> {
        let mut product = tx
            .lock_product(product_id)
            .await?
            .ok_or(OrderError::NotFound {
                entity: EntityKind::Product,
                id: product_id.as_i32(),
            })?;

        if quantity > product.quantity {
            return Err(OrderError::InsufficientQuantity {
                product_id,
                requested: quantity,
                available: product.quantity,
            });
        }

        product.quantity -= quantity;
        Ok(tx.update_product(&product).await?)
    }

    /// Rolls `tx` back and returns the error that caused it. A failed
    /// rollback is logged and never replaces the original error.
    async fn abort(&self, tx: Box<dyn StoreTransaction>, cause: OrderError) -> OrderError {
        metrics::counter!("order_transactions_rolled_back_total").increment(1);
        if let Err(rollback_error) = tx.rollback().await {
            tracing::warn!(
                error = %rollback_error,
                cause = %cause,
                "Rollback failed; transaction discarded on drop"
            );
        }
        tracing::debug!(error = %cause, kind = %cause.kind(), "Order transaction rolled back");
        cause
    }

    /// Refreshes the cache entries of every committed row. Each write is
    /// versioned, so a slower refresh of an earlier order cannot replace the
    /// entry a later order already published.
    async fn publish(&self, staged: &StagedOrder) -> Result<()> {
        let refreshed = async {
            for product in staged.products.values() {
                self.repository.refresh(product).await?;
            }
            for item in &staged.items {
                self.repository.refresh(item).await?;
            }
            self.repository.refresh(&staged.order).await
        }
        .await;

        if let Err(source) = refreshed {
            tracing::error!(
                order_id = %staged.order.id,
                error = %source,
                "Order committed but cache refresh failed"
            );
            return Err(OrderError::CommittedCacheStale {
                order_id: staged.order.id,
                source,
            });
        }
        Ok(())
    }
}

fn validate_quantities(quantities: impl IntoIterator<Item = i32>) -> Result<()> {
    if let Some(bad) = quantities.into_iter().find(|q| *q <= 0) {
        return Err(OrderError::Validation(format!(
            "item quantity must be positive, got {bad}"
        )));
    }
    Ok(())
}

fn confirmation(user: &User, staged: &StagedOrder) -> OrderConfirmation {
    OrderConfirmation {
        order_id: staged.order.id,
        status: staged.order.status.clone(),
        user_name: user.name.clone(),
        user_email: user.email.clone(),
        items: staged
            .items
            .iter()
            .map(|item| ConfirmationLine {
                product_name: staged
                    .products
                    .get(&item.product_id)
                    .map(|p| p.name.clone())
                    .unwrap_or_default(),
                quantity: item.quantity,
                price: item.price,
            })
            .collect(),
        total_price: staged.order.total_price.unwrap_or_default(),
    }
}
