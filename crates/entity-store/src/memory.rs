use std::cmp;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    CategoryId, EntityKind, NewCategory, NewOrder, NewOrderItem, NewProduct, NewUser, Order,
    OrderAggregateRow, OrderId, OrderItem, OrderItemId, OrderListQuery, OrderRowPage,
    OrderSortColumn, Product, ProductCategory, ProductFilter, ProductId, ProductWithCategory,
    Result, SortDirection, SortKey, StoreError, User, UserId,
    store::{EntityStore, EntityStream, StoreTransaction},
};

/// Last id handed out per table, mimicking serial sequences.
#[derive(Debug, Clone, Default)]
struct Sequences {
    user: i32,
    category: i32,
    product: i32,
    order: i32,
    order_item: i32,
}

fn next_id(seq: &mut i32) -> i32 {
    *seq += 1;
    *seq
}

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    categories: BTreeMap<CategoryId, ProductCategory>,
    products: BTreeMap<ProductId, Product>,
    orders: BTreeMap<OrderId, Order>,
    order_items: BTreeMap<OrderItemId, OrderItem>,
    sequences: Sequences,
}

impl Tables {
    fn insert_user(&mut self, user: NewUser) -> Result<User> {
        let id = match user.id {
            Some(id) => {
                if self.users.contains_key(&id) {
                    return Err(unique(EntityKind::User, "users_pkey"));
                }
                self.sequences.user = self.sequences.user.max(id.as_i32());
                id
            }
            None => UserId::new(next_id(&mut self.sequences.user)),
        };
        let now = Utc::now();
        let row = User {
            id,
            name: user.name,
            email: user.email,
            role: user.role,
            status: user.status,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(id, row.clone());
        Ok(row)
    }

    fn update_user(&mut self, user: &User) -> Result<User> {
        let existing = self
            .users
            .get_mut(&user.id)
            .ok_or_else(|| not_found(EntityKind::User, user.id.as_i32()))?;
        existing.name = user.name.clone();
        existing.email = user.email.clone();
        existing.role = user.role.clone();
        existing.status = user.status.clone();
        existing.updated_at = next_updated_at(existing.updated_at);
        Ok(existing.clone())
    }

    fn insert_category(&mut self, category: NewCategory) -> Result<ProductCategory> {
        if self.categories.values().any(|c| c.name == category.name) {
            return Err(unique(
                EntityKind::ProductCategory,
                "product_categories_name_key",
            ));
        }
        let id = match category.id {
            Some(id) => {
                if self.categories.contains_key(&id) {
                    return Err(unique(EntityKind::ProductCategory, "product_categories_pkey"));
                }
                self.sequences.category = self.sequences.category.max(id.as_i32());
                id
            }
            None => CategoryId::new(next_id(&mut self.sequences.category)),
        };
        let now = Utc::now();
        let row = ProductCategory {
            id,
            name: category.name,
            description: category.description,
            created_at: now,
            updated_at: now,
        };
        self.categories.insert(id, row.clone());
        Ok(row)
    }

    fn update_category(&mut self, category: &ProductCategory) -> Result<ProductCategory> {
        if self
            .categories
            .values()
            .any(|c| c.name == category.name && c.id != category.id)
        {
            return Err(unique(
                EntityKind::ProductCategory,
                "product_categories_name_key",
            ));
        }
        let existing = self
            .categories
            .get_mut(&category.id)
            .ok_or_else(|| not_found(EntityKind::ProductCategory, category.id.as_i32()))?;
        existing.name = category.name.clone();
        existing.description = category.description.clone();
        existing.updated_at = next_updated_at(existing.updated_at);
        Ok(existing.clone())
    }

    fn check_product(&self, id: Option<ProductId>, product: &NewProduct) -> Result<()> {
        if product.quantity < 0 {
            return Err(StoreError::CheckViolation {
                entity: EntityKind::Product,
                detail: "products_quantity_check".to_string(),
            });
        }
        if self
            .products
            .values()
            .any(|p| p.name == product.name && Some(p.id) != id)
        {
            return Err(unique(EntityKind::Product, "products_name_key"));
        }
        if !self.categories.contains_key(&product.category_id) {
            return Err(foreign_key(EntityKind::Product, "products_category_id_fkey"));
        }
        if !self.users.contains_key(&product.author_id) {
            return Err(foreign_key(EntityKind::Product, "products_author_id_fkey"));
        }
        Ok(())
    }

    fn insert_product(&mut self, product: NewProduct) -> Result<Product> {
        self.check_product(None, &product)?;
        let id = ProductId::new(next_id(&mut self.sequences.product));
        let now = Utc::now();
        let row = Product {
            id,
            name: product.name,
            description: product.description,
            price: product.price,
            quantity: product.quantity,
            category_id: product.category_id,
            author_id: product.author_id,
            created_at: now,
            updated_at: now,
        };
        self.products.insert(id, row.clone());
        Ok(row)
    }

    fn update_product(&mut self, product: &Product) -> Result<Product> {
        if !self.products.contains_key(&product.id) {
            return Err(not_found(EntityKind::Product, product.id.as_i32()));
        }
        self.check_product(Some(product.id), &to_new_product(product))?;
        let existing = self
            .products
            .get_mut(&product.id)
            .ok_or_else(|| not_found(EntityKind::Product, product.id.as_i32()))?;
        existing.name = product.name.clone();
        existing.description = product.description.clone();
        existing.price = product.price;
        existing.quantity = product.quantity;
        existing.category_id = product.category_id;
        existing.author_id = product.author_id;
        existing.updated_at = next_updated_at(existing.updated_at);
        Ok(existing.clone())
    }

    fn upsert_product(&mut self, product: NewProduct) -> Result<Product> {
        let existing = self
            .products
            .values()
            .find(|p| p.name == product.name)
            .cloned();
        match existing {
            Some(mut row) => {
                row.description = product.description;
                row.price = product.price;
                row.quantity = product.quantity;
                row.category_id = product.category_id;
                row.author_id = product.author_id;
                self.update_product(&row)
            }
            None => self.insert_product(product),
        }
    }

    fn delete_product(&mut self, id: ProductId) -> Result<bool> {
        if self.order_items.values().any(|i| i.product_id == id) {
            return Err(foreign_key(
                EntityKind::Product,
                "order_items_product_id_fkey",
            ));
        }
        Ok(self.products.remove(&id).is_some())
    }

    fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        if !self.users.contains_key(&order.user_id) {
            return Err(foreign_key(EntityKind::Order, "orders_user_id_fkey"));
        }
        let id = OrderId::new(next_id(&mut self.sequences.order));
        let now = Utc::now();
        let row = Order {
            id,
            user_id: order.user_id,
            status: order.status,
            total_price: order.total_price,
            created_at: now,
            updated_at: now,
        };
        self.orders.insert(id, row.clone());
        Ok(row)
    }

    fn update_order(&mut self, order: &Order) -> Result<Order> {
        if !self.users.contains_key(&order.user_id) {
            return Err(foreign_key(EntityKind::Order, "orders_user_id_fkey"));
        }
        let existing = self
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| not_found(EntityKind::Order, order.id.as_i32()))?;
        existing.user_id = order.user_id;
        existing.status = order.status.clone();
        existing.total_price = order.total_price;
        existing.updated_at = next_updated_at(existing.updated_at);
        Ok(existing.clone())
    }

    fn check_order_item(&self, order_id: OrderId, item: &NewOrderItem) -> Result<()> {
        if item.quantity <= 0 {
            return Err(StoreError::CheckViolation {
                entity: EntityKind::OrderItem,
                detail: "order_items_quantity_check".to_string(),
            });
        }
        if !self.orders.contains_key(&order_id) {
            return Err(foreign_key(
                EntityKind::OrderItem,
                "order_items_order_id_fkey",
            ));
        }
        if !self.products.contains_key(&item.product_id) {
            return Err(foreign_key(
                EntityKind::OrderItem,
                "order_items_product_id_fkey",
            ));
        }
        Ok(())
    }

    fn insert_order_item(&mut self, order_id: OrderId, item: NewOrderItem) -> Result<OrderItem> {
        self.check_order_item(order_id, &item)?;
        let id = OrderItemId::new(next_id(&mut self.sequences.order_item));
        let now = Utc::now();
        let row = OrderItem {
            id,
            order_id,
            product_id: item.product_id,
            quantity: item.quantity,
            price: item.price,
            created_at: now,
            updated_at: now,
        };
        self.order_items.insert(id, row.clone());
        Ok(row)
    }

    fn update_order_item(&mut self, item: &OrderItem) -> Result<OrderItem> {
        if !self.order_items.contains_key(&item.id) {
            return Err(not_found(EntityKind::OrderItem, item.id.as_i32()));
        }
        self.check_order_item(
            item.order_id,
            &NewOrderItem {
                product_id: item.product_id,
                quantity: item.quantity,
                price: item.price,
            },
        )?;
        let existing = self
            .order_items
            .get_mut(&item.id)
            .ok_or_else(|| not_found(EntityKind::OrderItem, item.id.as_i32()))?;
        existing.order_id = item.order_id;
        existing.product_id = item.product_id;
        existing.quantity = item.quantity;
        existing.price = item.price;
        existing.updated_at = next_updated_at(existing.updated_at);
        Ok(existing.clone())
    }

    fn order_items_of(&self, order_id: OrderId) -> Vec<OrderItem> {
        self.order_items
            .values()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect()
    }

    fn products_matching(&self, filter: &ProductFilter) -> Vec<ProductWithCategory> {
        let needle = filter.name.as_ref().map(|n| n.to_uppercase());
        self.products
            .values()
            .filter(|p| {
                let name_matches = needle
                    .as_ref()
                    .is_none_or(|needle| p.name.to_uppercase().contains(needle.as_str()));
                let day_matches = filter
                    .created_on
                    .is_none_or(|day| p.created_at.date_naive() == day);
                name_matches && day_matches
            })
            .filter_map(|p| {
                let category = self.categories.get(&p.category_id)?;
                Some(ProductWithCategory {
                    product: p.clone(),
                    category_name: category.name.clone(),
                })
            })
            .collect()
    }

    /// Evaluates the grouped order listing: the inner joins drop orders
    /// without items, users or products, and the count sees the same rows.
    fn order_page(&self, query: &OrderListQuery) -> OrderRowPage {
        let mut matching: Vec<(&Order, &User, Vec<(&OrderItem, &Product)>)> = self
            .orders
            .values()
            .filter_map(|order| {
                if !query
                    .date_range
                    .is_none_or(|range| range.contains(order.created_at))
                {
                    return None;
                }
                let user = self.users.get(&order.user_id)?;
                let items: Vec<_> = self
                    .order_items
                    .values()
                    .filter(|i| i.order_id == order.id)
                    .filter_map(|i| self.products.get(&i.product_id).map(|p| (i, p)))
                    .collect();
                if items.is_empty() {
                    return None;
                }
                Some((order, user, items))
            })
            .collect();

        let total_count = matching.len() as i64;
        matching.sort_by(|a, b| compare_orders(a.0, b.0, &query.sort));

        let offset = usize::try_from(query.pagination.offset()).unwrap_or(usize::MAX);
        let rows = matching
            .into_iter()
            .skip(offset)
            .take(query.pagination.limit as usize)
            .map(|(order, user, items)| OrderAggregateRow {
                order_id: order.id,
                status: order.status.clone(),
                total_price: order.total_price,
                created_at: order.created_at,
                user_name: user.name.clone(),
                user_email: user.email.clone(),
                item_ids: items.iter().map(|(i, _)| i.id.as_i32()).collect(),
                product_names: items.iter().map(|(_, p)| p.name.clone()).collect(),
                item_quantities: items.iter().map(|(i, _)| i.quantity).collect(),
                item_prices: items.iter().map(|(i, _)| i.price).collect(),
            })
            .collect();

        OrderRowPage { rows, total_count }
    }
}

fn compare_orders(a: &Order, b: &Order, keys: &[SortKey]) -> cmp::Ordering {
    keys.iter().fold(cmp::Ordering::Equal, |acc, key| {
        acc.then_with(|| {
            let ord = match key.column {
                OrderSortColumn::Id => a.id.cmp(&b.id),
                OrderSortColumn::UserId => a.user_id.cmp(&b.user_id),
                OrderSortColumn::Status => a.status.cmp(&b.status),
                OrderSortColumn::TotalPrice => a.total_price.cmp(&b.total_price),
                OrderSortColumn::CreatedAt => a.created_at.cmp(&b.created_at),
                OrderSortColumn::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            };
            match key.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        })
    })
}

/// The `updated_at` of a row's next version: the current time, or one
/// microsecond past the previous version when the clock has not moved on.
fn next_updated_at(previous: DateTime<Utc>) -> DateTime<Utc> {
    cmp::max(Utc::now(), previous + TimeDelta::microseconds(1))
}

fn to_new_product(product: &Product) -> NewProduct {
    NewProduct {
        name: product.name.clone(),
        description: product.description.clone(),
        price: product.price,
        quantity: product.quantity,
        category_id: product.category_id,
        author_id: product.author_id,
    }
}

fn not_found(entity: EntityKind, id: i32) -> StoreError {
    StoreError::RowNotFound { entity, id }
}

fn unique(entity: EntityKind, constraint: &str) -> StoreError {
    StoreError::UniqueViolation {
        entity,
        detail: constraint.to_string(),
    }
}

fn foreign_key(entity: EntityKind, constraint: &str) -> StoreError {
    StoreError::ForeignKeyViolation {
        entity,
        detail: constraint.to_string(),
    }
}

/// Row counts per table, for assertions in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowCounts {
    pub users: usize,
    pub categories: usize,
    pub products: usize,
    pub orders: usize,
    pub order_items: usize,
}

/// In-memory entity store implementation for testing.
///
/// Transactions are serialized by a single writer lock and stage their
/// writes on a private copy of the tables, which replaces the committed
/// tables on commit. Reads outside a transaction see only committed data.
#[derive(Clone, Default)]
pub struct InMemoryEntityStore {
    committed: Arc<RwLock<Tables>>,
    writer: Arc<Mutex<()>>,
    reads: Arc<AtomicUsize>,
}

impl InMemoryEntityStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of point lookups served from committed state.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Returns the number of rows in each table.
    pub async fn row_counts(&self) -> RowCounts {
        let tables = self.committed.read().await;
        RowCounts {
            users: tables.users.len(),
            categories: tables.categories.len(),
            products: tables.products.len(),
            orders: tables.orders.len(),
            order_items: tables.order_items.len(),
        }
    }

    /// Lists the committed line items of an order.
    pub async fn order_items_of(&self, order_id: OrderId) -> Vec<OrderItem> {
        self.committed.read().await.order_items_of(order_id)
    }

    /// Overrides an order's creation time, for date-range tests.
    pub async fn set_order_created_at(
        &self,
        order_id: OrderId,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.write(|tables| {
            let order = tables
                .orders
                .get_mut(&order_id)
                .ok_or_else(|| not_found(EntityKind::Order, order_id.as_i32()))?;
            order.created_at = created_at;
            Ok(())
        })
        .await
    }

    /// Clears all tables.
    pub async fn clear(&self) {
        let _writer = self.writer.lock().await;
        *self.committed.write().await = Tables::default();
    }

    /// Applies a write outside any transaction. The closure runs on a copy
    /// so a failed multi-row write leaves committed state untouched.
    async fn write<T: Send>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<T> + Send,
    ) -> Result<T> {
        let _writer = self.writer.lock().await;
        let mut tables = self.committed.write().await;
        let mut staged = tables.clone();
        let out = f(&mut staged)?;
        *tables = staged;
        Ok(out)
    }

    async fn read<T: Send>(&self, f: impl FnOnce(&Tables) -> T + Send) -> T {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let tables = self.committed.read().await;
        f(&tables)
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let writer = self.writer.clone().lock_owned().await;
        let staged = self.committed.read().await.clone();
        Ok(Box::new(InMemoryTransaction {
            committed: self.committed.clone(),
            staged,
            _writer: writer,
        }))
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.read(|t| t.users.get(&id).cloned()).await)
    }

    async fn insert_user(&self, user: NewUser) -> Result<User> {
        self.write(|t| t.insert_user(user)).await
    }

    async fn update_user(&self, user: &User) -> Result<User> {
        self.write(|t| t.update_user(user)).await
    }

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.read(|t| t.products.get(&id).cloned()).await)
    }

    async fn insert_product(&self, product: NewProduct) -> Result<Product> {
        self.write(|t| t.insert_product(product)).await
    }

    async fn update_product(&self, product: &Product) -> Result<Product> {
        self.write(|t| t.update_product(product)).await
    }

    async fn delete_product(&self, id: ProductId) -> Result<bool> {
        self.write(|t| t.delete_product(id)).await
    }

    async fn upsert_products(&self, products: Vec<NewProduct>) -> Result<Vec<Product>> {
        self.write(|t| {
            products
                .into_iter()
                .map(|p| t.upsert_product(p))
                .collect::<Result<Vec<_>>>()
        })
        .await
    }

    async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<ProductWithCategory>> {
        let tables = self.committed.read().await;
        Ok(tables.products_matching(filter))
    }

    async fn stream_products(&self) -> Result<EntityStream<Product>> {
        use futures_util::stream;

        let products: Vec<Product> = self
            .committed
            .read()
            .await
            .products
            .values()
            .cloned()
            .collect();
        Ok(Box::pin(stream::iter(products.into_iter().map(Ok))))
    }

    async fn find_category(&self, id: CategoryId) -> Result<Option<ProductCategory>> {
        Ok(self.read(|t| t.categories.get(&id).cloned()).await)
    }

    async fn find_category_by_name(&self, name: &str) -> Result<Option<ProductCategory>> {
        Ok(self
            .read(|t| t.categories.values().find(|c| c.name == name).cloned())
            .await)
    }

    async fn insert_category(&self, category: NewCategory) -> Result<ProductCategory> {
        self.write(|t| t.insert_category(category)).await
    }

    async fn update_category(&self, category: &ProductCategory) -> Result<ProductCategory> {
        self.write(|t| t.update_category(category)).await
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.read(|t| t.orders.get(&id).cloned()).await)
    }

    async fn update_order(&self, order: &Order) -> Result<Order> {
        self.write(|t| t.update_order(order)).await
    }

    async fn find_order_item(&self, id: OrderItemId) -> Result<Option<OrderItem>> {
        Ok(self.read(|t| t.order_items.get(&id).cloned()).await)
    }

    async fn update_order_item(&self, item: &OrderItem) -> Result<OrderItem> {
        self.write(|t| t.update_order_item(item)).await
    }

    async fn fetch_order_page(&self, query: &OrderListQuery) -> Result<OrderRowPage> {
        query.validate()?;
        let tables = self.committed.read().await;
        Ok(tables.order_page(query))
    }
}

/// A transaction over a private copy of the committed tables.
struct InMemoryTransaction {
    committed: Arc<RwLock<Tables>>,
    staged: Tables,
    _writer: OwnedMutexGuard<()>,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        self.staged.insert_order(order)
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.staged.orders.get(&id).cloned())
    }

    async fn update_order(&mut self, order: &Order) -> Result<Order> {
        self.staged.update_order(order)
    }

    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.staged.products.get(&id).cloned())
    }

    async fn update_product(&mut self, product: &Product) -> Result<Product> {
        self.staged.update_product(product)
    }

    async fn find_order_item(&mut self, id: OrderItemId) -> Result<Option<OrderItem>> {
        Ok(self.staged.order_items.get(&id).cloned())
    }

    async fn insert_order_items(
        &mut self,
        order_id: OrderId,
        items: Vec<NewOrderItem>,
    ) -> Result<Vec<OrderItem>> {
        items
            .into_iter()
            .map(|item| self.staged.insert_order_item(order_id, item))
            .collect()
    }

    async fn update_order_item(&mut self, item: &OrderItem) -> Result<OrderItem> {
        self.staged.update_order_item(item)
    }

    async fn list_order_items(&mut self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        Ok(self.staged.order_items_of(order_id))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        *this.committed.write().await = this.staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
