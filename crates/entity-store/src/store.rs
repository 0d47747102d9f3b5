use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{
    CategoryId, NewCategory, NewOrder, NewOrderItem, NewProduct, NewUser, Order, OrderId,
    OrderItem, OrderItemId, OrderListQuery, OrderRowPage, Product, ProductCategory,
    ProductFilter, ProductId, ProductWithCategory, Result, User, UserId,
};

/// A stream of rows.
pub type EntityStream<T> = Pin<Box<dyn Stream<Item = Result<T>> + Send>>;

/// Core trait for entity store implementations.
///
/// Methods on this trait run against committed state, each as its own
/// statement. Multi-row writes that must succeed or fail together go
/// through [`EntityStore::begin`].
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Opens a transaction.
    ///
    /// The store must give transactions serializable behaviour for the rows
    /// they lock: two transactions locking the same product never both see
    /// the same pre-decrement stock.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>>;

    async fn insert_user(&self, user: NewUser) -> Result<User>;

    /// Writes every mutable column of `user` and returns the stored row.
    async fn update_user(&self, user: &User) -> Result<User>;

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>>;

    async fn insert_product(&self, product: NewProduct) -> Result<Product>;

    async fn update_product(&self, product: &Product) -> Result<Product>;

    /// Deletes a product. Returns false if no row existed.
    async fn delete_product(&self, id: ProductId) -> Result<bool>;

    /// Inserts or updates products keyed on their unique name, atomically.
    async fn upsert_products(&self, products: Vec<NewProduct>) -> Result<Vec<Product>>;

    /// Lists products with their category names, ordered by id.
    async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<ProductWithCategory>>;

    /// Streams every product in id order.
    async fn stream_products(&self) -> Result<EntityStream<Product>>;

    async fn find_category(&self, id: CategoryId) -> Result<Option<ProductCategory>>;

    async fn find_category_by_name(&self, name: &str) -> Result<Option<ProductCategory>>;

    async fn insert_category(&self, category: NewCategory) -> Result<ProductCategory>;

    async fn update_category(&self, category: &ProductCategory) -> Result<ProductCategory>;

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>>;

    async fn update_order(&self, order: &Order) -> Result<Order>;

    async fn find_order_item(&self, id: OrderItemId) -> Result<Option<OrderItem>>;

    async fn update_order_item(&self, item: &OrderItem) -> Result<OrderItem>;

    /// Fetches one page of grouped order rows and the total match count.
    ///
    /// The count applies exactly the joins and predicate of the page query.
    async fn fetch_order_page(&self, query: &OrderListQuery) -> Result<OrderRowPage>;
}

/// An open transaction against the entity store.
///
/// Dropping a transaction without calling [`StoreTransaction::commit`]
/// discards every write made through it.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order>;

    /// Reads an order and locks it until the transaction ends.
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>>;

    async fn update_order(&mut self, order: &Order) -> Result<Order>;

    /// Reads a product and locks it until the transaction ends.
    ///
    /// Reflects writes already made in this transaction.
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>>;

    async fn update_product(&mut self, product: &Product) -> Result<Product>;

    async fn find_order_item(&mut self, id: OrderItemId) -> Result<Option<OrderItem>>;

    /// Inserts line items for `order_id` in one batch.
    async fn insert_order_items(
        &mut self,
        order_id: OrderId,
        items: Vec<NewOrderItem>,
    ) -> Result<Vec<OrderItem>>;

    async fn update_order_item(&mut self, item: &OrderItem) -> Result<OrderItem>;

    /// Lists the line items of an order, ordered by id.
    async fn list_order_items(&mut self, order_id: OrderId) -> Result<Vec<OrderItem>>;

    /// Makes every write of this transaction durable.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards every write of this transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
