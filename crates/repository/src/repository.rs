use std::future::Future;
use std::pin::Pin;

use cache::{CacheError, CacheMirror, CacheMirrorExt, CacheRecord};
use common::{CategoryId, EntityKind, OrderId, OrderItemId, ProductId, UserId};
use entity_store::{
    EntityStore, NewCategory, NewProduct, NewUser, Order, OrderItem, Product, ProductCategory,
    ProductFilter, ProductWithCategory, StoreError, User,
};
use futures_core::Stream;
use futures_util::StreamExt;

use crate::defaults::{DEFAULT_CATEGORY_ID, DEFAULT_USER_ID, default_category, default_user};
use crate::{RepositoryError, Result};

/// Products per upsert transaction in [`CachedRepository::import_products`].
pub const DEFAULT_IMPORT_CHUNK_SIZE: usize = 500;

/// A stream of products read from the entity store.
pub type ProductStream = Pin<Box<dyn Stream<Item = Result<Product>> + Send>>;

/// Cache-aside access to every entity table.
///
/// Both collaborators are injected: tests pass the in-memory store and cache,
/// the binary passes PostgreSQL and Redis.
#[derive(Clone)]
pub struct CachedRepository<S, C> {
    store: S,
    cache: C,
    import_chunk_size: usize,
}

impl<S, C> CachedRepository<S, C>
where
    S: EntityStore,
    C: CacheMirror,
{
    pub fn new(store: S, cache: C) -> Self {
        Self {
            store,
            cache,
            import_chunk_size: DEFAULT_IMPORT_CHUNK_SIZE,
        }
    }

    /// Sets how many products each import transaction upserts.
    pub fn with_import_chunk_size(mut self, chunk_size: usize) -> Self {
        self.import_chunk_size = chunk_size.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Looks a row up in the cache mirror, recording the hit or miss.
    async fn cached<R: CacheRecord>(&self, id: i32) -> Result<Option<R>> {
        let entity = R::ENTITY;
        let hit = self.cache.get_record::<R>(id).await?;
        if hit.is_some() {
            tracing::debug!(%entity, id, "Cache hit");
            metrics::counter!("cache_hits_total", "entity" => entity.as_str()).increment(1);
        } else {
            tracing::debug!(%entity, id, "Cache miss");
            metrics::counter!("cache_misses_total", "entity" => entity.as_str()).increment(1);
        }
        Ok(hit)
    }

    /// Serves a row from the cache, or loads it from the store and caches it.
    async fn read_through<R, F>(&self, id: i32, load: F) -> Result<R>
    where
        R: CacheRecord,
        F: Future<Output = entity_store::Result<Option<R>>>,
    {
        if let Some(hit) = self.cached::<R>(id).await? {
            return Ok(hit);
        }

        let row = load.await?.ok_or(RepositoryError::NotFound {
            entity: R::ENTITY,
            id,
        })?;
        self.cache.put_record(&row).await?;
        Ok(row)
    }

    /// Overwrites the cached entry of a row with its current fields, unless
    /// the entry already mirrors a newer version of the row.
    ///
    /// Used after a transaction commits to publish the rows it wrote. Returns
    /// whether the entry was written.
    pub async fn refresh<R: CacheRecord>(
        &self,
        row: &R,
    ) -> std::result::Result<bool, CacheError> {
        self.cache.put_record(row).await
    }

    // Users

    #[tracing::instrument(skip(self))]
    pub async fn get_user(&self, id: UserId) -> Result<User> {
        self.read_through(id.as_i32(), self.store.find_user(id))
            .await
    }

    /// Inserts a user. The row is cached on its first read, not here.
    pub async fn create_user(&self, user: NewUser) -> Result<User> {
        Ok(self.store.insert_user(user).await?)
    }

    pub async fn update_user(&self, user: &User) -> Result<User> {
        let row = self.store.update_user(user).await?;
        self.refresh(&row).await?;
        Ok(row)
    }

    /// Returns the default user, creating it on first use.
    #[tracing::instrument(skip(self))]
    pub async fn get_default_user(&self) -> Result<User> {
        if let Some(hit) = self.cached::<User>(DEFAULT_USER_ID.as_i32()).await? {
            return Ok(hit);
        }

        let user = match self.store.find_user(DEFAULT_USER_ID).await? {
            Some(user) => user,
            None => match self.store.insert_user(default_user()).await {
                Ok(user) => {
                    tracing::info!(user_id = %user.id, "Created default user");
                    user
                }
                // Lost a race with a concurrent creator.
                Err(StoreError::UniqueViolation { .. }) => self
                    .store
                    .find_user(DEFAULT_USER_ID)
                    .await?
                    .ok_or(RepositoryError::NotFound {
                        entity: EntityKind::User,
                        id: DEFAULT_USER_ID.as_i32(),
                    })?,
                Err(e) => return Err(e.into()),
            },
        };

        self.refresh(&user).await?;
        Ok(user)
    }

    // Products

    #[tracing::instrument(skip(self))]
    pub async fn get_product(&self, id: ProductId) -> Result<Product> {
        self.read_through(id.as_i32(), self.store.find_product(id))
            .await
    }

    pub async fn create_product(&self, product: NewProduct) -> Result<Product> {
        Ok(self.store.insert_product(product).await?)
    }

    #[tracing::instrument(skip(self, product), fields(product_id = %product.id))]
    pub async fn update_product(&self, product: &Product) -> Result<Product> {
        let row = self.store.update_product(product).await?;
        self.refresh(&row).await?;
        Ok(row)
    }

    /// Deletes a product and evicts its cache entry.
    #[tracing::instrument(skip(self))]
    pub async fn delete_product(&self, id: ProductId) -> Result<()> {
        if !self.store.delete_product(id).await? {
            return Err(RepositoryError::NotFound {
                entity: EntityKind::Product,
                id: id.as_i32(),
            });
        }
        self.cache.evict(EntityKind::Product, id.as_i32()).await?;
        Ok(())
    }

    /// Bulk imports products keyed on name.
    ///
    /// Runs one upsert transaction per chunk and refreshes the cache entries
    /// of every row a committed chunk touched. A failing chunk stops the import;
    /// earlier chunks stay committed.
    #[tracing::instrument(skip(self, products), fields(count = products.len()))]
    pub async fn import_products(&self, products: Vec<NewProduct>) -> Result<Vec<Product>> {
        let mut imported = Vec::with_capacity(products.len());

        for chunk in products.chunks(self.import_chunk_size) {
            let rows = self.store.upsert_products(chunk.to_vec()).await?;
            for row in &rows {
                self.refresh(row).await?;
            }
            tracing::debug!(rows = rows.len(), "Imported product chunk");
            imported.extend(rows);
        }

        Ok(imported)
    }

    pub async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<ProductWithCategory>> {
        Ok(self.store.list_products(filter).await?)
    }

    /// Streams every product straight from the store, for export.
    pub async fn stream_products(&self) -> Result<ProductStream> {
        let stream = self.store.stream_products().await?;
        Ok(Box::pin(
            stream.map(|row| row.map_err(RepositoryError::from)),
        ))
    }

    // Categories

    #[tracing::instrument(skip(self))]
    pub async fn get_category(&self, id: CategoryId) -> Result<ProductCategory> {
        self.read_through(id.as_i32(), self.store.find_category(id))
            .await
    }

    /// Looks a category up by its unique name and caches it under its id.
    #[tracing::instrument(skip(self))]
    pub async fn get_category_by_name(&self, name: &str) -> Result<ProductCategory> {
        let category = self
            .store
            .find_category_by_name(name)
            .await?
            .ok_or_else(|| RepositoryError::NameNotFound {
                entity: EntityKind::ProductCategory,
                name: name.to_string(),
            })?;
        self.refresh(&category).await?;
        Ok(category)
    }

    pub async fn create_category(&self, category: NewCategory) -> Result<ProductCategory> {
        Ok(self.store.insert_category(category).await?)
    }

    pub async fn update_category(&self, category: &ProductCategory) -> Result<ProductCategory> {
        let row = self.store.update_category(category).await?;
        self.refresh(&row).await?;
        Ok(row)
    }

    /// Returns the default category, creating it on first use.
    #[tracing::instrument(skip(self))]
    pub async fn get_default_category(&self) -> Result<ProductCategory> {
        if let Some(hit) = self
            .cached::<ProductCategory>(DEFAULT_CATEGORY_ID.as_i32())
            .await?
        {
            return Ok(hit);
        }

        let category = match self.store.find_category(DEFAULT_CATEGORY_ID).await? {
            Some(category) => category,
            None => match self.store.insert_category(default_category()).await {
                Ok(category) => {
                    tracing::info!(category_id = %category.id, "Created default category");
                    category
                }
                Err(StoreError::UniqueViolation { .. }) => self
                    .store
                    .find_category(DEFAULT_CATEGORY_ID)
                    .await?
                    .ok_or(RepositoryError::NotFound {
                        entity: EntityKind::ProductCategory,
                        id: DEFAULT_CATEGORY_ID.as_i32(),
                    })?,
                Err(e) => return Err(e.into()),
            },
        };

        self.refresh(&category).await?;
        Ok(category)
    }

    // Orders

    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, id: OrderId) -> Result<Order> {
        self.read_through(id.as_i32(), self.store.find_order(id))
            .await
    }

    pub async fn update_order(&self, order: &Order) -> Result<Order> {
        let row = self.store.update_order(order).await?;
        self.refresh(&row).await?;
        Ok(row)
    }

    // Order items

    #[tracing::instrument(skip(self))]
    pub async fn get_order_item(&self, id: OrderItemId) -> Result<OrderItem> {
        self.read_through(id.as_i32(), self.store.find_order_item(id))
            .await
    }

    pub async fn update_order_item(&self, item: &OrderItem) -> Result<OrderItem> {
        let row = self.store.update_order_item(item).await?;
        self.refresh(&row).await?;
        Ok(row)
    }
}
