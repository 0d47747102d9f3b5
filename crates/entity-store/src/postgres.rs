use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::{
    CategoryId, EntityKind, NewCategory, NewOrder, NewOrderItem, NewProduct, NewUser, Order,
    OrderAggregateRow, OrderId, OrderItem, OrderItemId, OrderListQuery, OrderRowPage, Product,
    ProductCategory, ProductFilter, ProductId, ProductWithCategory, Result, StoreError, User,
    UserId,
    store::{EntityStore, EntityStream, StoreTransaction},
};

const USER_COLUMNS: &str = "id, name, email, role, status, created_at, updated_at";
const CATEGORY_COLUMNS: &str = "id, name, description, created_at, updated_at";
const PRODUCT_COLUMNS: &str =
    "id, name, description, price, quantity, category_id, author_id, created_at, updated_at";
const ORDER_COLUMNS: &str = "id, user_id, status, total_price, created_at, updated_at";
const ORDER_ITEM_COLUMNS: &str =
    "id, order_id, product_id, quantity, price, created_at, updated_at";

/// Rows fetched per round trip by [`PostgresEntityStore::stream_products`].
const STREAM_BATCH_SIZE: i64 = 500;

const STREAM_PRODUCTS_SQL: &str = r#"
    SELECT id, name, description, price, quantity, category_id, author_id, created_at, updated_at
    FROM products
    WHERE id > $1
    ORDER BY id ASC
    LIMIT $2
"#;

/// Joins shared by the order page query and its count.
const ORDER_LISTING_JOINS: &str = r#"
    FROM orders
    INNER JOIN users ON users.id = orders.user_id
    INNER JOIN order_items ON order_items.order_id = orders.id
    INNER JOIN products ON products.id = order_items.product_id
"#;

/// PostgreSQL-backed entity store implementation.
#[derive(Clone)]
pub struct PostgresEntityStore {
    pool: PgPool,
}

impl PostgresEntityStore {
    /// Creates a new PostgreSQL entity store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    /// Builds the `WHERE` clause of the order listing, numbering parameters
    /// from `param_count + 1`.
    fn order_filter(query: &OrderListQuery, param_count: &mut usize) -> String {
        let mut sql = String::from(" WHERE 1=1");
        if query.date_range.is_some() {
            *param_count += 1;
            sql.push_str(&format!(" AND orders.created_at >= ${param_count}"));
            *param_count += 1;
            sql.push_str(&format!(" AND orders.created_at < ${param_count}"));
        }
        sql
    }

    fn order_by(query: &OrderListQuery) -> String {
        let mut keys: Vec<String> = query
            .sort
            .iter()
            .map(|key| {
                format!(
                    "orders.{} {}",
                    key.column.as_sql(),
                    key.direction.as_sql()
                )
            })
            .collect();
        keys.push("orders.id ASC".to_string());
        format!(" ORDER BY {}", keys.join(", "))
    }
}

fn row_to_user(row: PgRow) -> Result<User> {
    Ok(User {
        id: UserId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        role: row.try_get("role")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_category(row: PgRow) -> Result<ProductCategory> {
    Ok(ProductCategory {
        id: CategoryId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_product(row: &PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price: row.try_get("price")?,
        quantity: row.try_get("quantity")?,
        category_id: CategoryId::new(row.try_get("category_id")?),
        author_id: UserId::new(row.try_get("author_id")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_order(row: PgRow) -> Result<Order> {
    Ok(Order {
        id: OrderId::new(row.try_get("id")?),
        user_id: UserId::new(row.try_get("user_id")?),
        status: row.try_get("status")?,
        total_price: row.try_get("total_price")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_order_item(row: PgRow) -> Result<OrderItem> {
    Ok(OrderItem {
        id: OrderItemId::new(row.try_get("id")?),
        order_id: OrderId::new(row.try_get("order_id")?),
        product_id: ProductId::new(row.try_get("product_id")?),
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_aggregate(row: PgRow) -> Result<OrderAggregateRow> {
    Ok(OrderAggregateRow {
        order_id: OrderId::new(row.try_get("order_id")?),
        status: row.try_get("status")?,
        total_price: row.try_get("total_price")?,
        created_at: row.try_get("created_at")?,
        user_name: row.try_get("user_name")?,
        user_email: row.try_get("user_email")?,
        item_ids: row.try_get("item_ids")?,
        product_names: row.try_get("product_names")?,
        item_quantities: row.try_get("item_quantities")?,
        item_prices: row.try_get("item_prices")?,
    })
}

/// Moves a serial sequence past an explicitly inserted id.
async fn sync_sequence<'e, E>(executor: E, table: &str) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(&format!(
        "SELECT setval(pg_get_serial_sequence('{table}', 'id'), (SELECT MAX(id) FROM {table}))"
    ))
    .execute(executor)
    .await?;
    Ok(())
}

async fn update_product_in<'e, E>(executor: E, product: &Product) -> Result<Product>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query(&format!(
        r#"
        UPDATE products
        SET name = $2, description = $3, price = $4, quantity = $5,
            category_id = $6, author_id = $7, updated_at = GREATEST(clock_timestamp(), updated_at + interval '1 microsecond')
        WHERE id = $1
        RETURNING {PRODUCT_COLUMNS}
        "#
    ))
    .bind(product.id.as_i32())
    .bind(&product.name)
    .bind(&product.description)
    .bind(product.price)
    .bind(product.quantity)
    .bind(product.category_id.as_i32())
    .bind(product.author_id.as_i32())
    .fetch_optional(executor)
    .await
    .map_err(|e| StoreError::from_write(EntityKind::Product, e))?;

    match row {
        Some(row) => row_to_product(&row),
        None => Err(StoreError::RowNotFound {
            entity: EntityKind::Product,
            id: product.id.as_i32(),
        }),
    }
}

async fn update_order_in<'e, E>(executor: E, order: &Order) -> Result<Order>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query(&format!(
        r#"
        UPDATE orders
        SET user_id = $2, status = $3, total_price = $4, updated_at = GREATEST(clock_timestamp(), updated_at + interval '1 microsecond')
        WHERE id = $1
        RETURNING {ORDER_COLUMNS}
        "#
    ))
    .bind(order.id.as_i32())
    .bind(order.user_id.as_i32())
    .bind(&order.status)
    .bind(order.total_price)
    .fetch_optional(executor)
    .await
    .map_err(|e| StoreError::from_write(EntityKind::Order, e))?;

    match row {
        Some(row) => row_to_order(row),
        None => Err(StoreError::RowNotFound {
            entity: EntityKind::Order,
            id: order.id.as_i32(),
        }),
    }
}

async fn update_order_item_in<'e, E>(executor: E, item: &OrderItem) -> Result<OrderItem>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query(&format!(
        r#"
        UPDATE order_items
        SET order_id = $2, product_id = $3, quantity = $4, price = $5, updated_at = GREATEST(clock_timestamp(), updated_at + interval '1 microsecond')
        WHERE id = $1
        RETURNING {ORDER_ITEM_COLUMNS}
        "#
    ))
    .bind(item.id.as_i32())
    .bind(item.order_id.as_i32())
    .bind(item.product_id.as_i32())
    .bind(item.quantity)
    .bind(item.price)
    .fetch_optional(executor)
    .await
    .map_err(|e| StoreError::from_write(EntityKind::OrderItem, e))?;

    match row {
        Some(row) => row_to_order_item(row),
        None => Err(StoreError::RowNotFound {
            entity: EntityKind::OrderItem,
            id: item.id.as_i32(),
        }),
    }
}

async fn find_order_item_in<'e, E>(executor: E, id: OrderItemId) -> Result<Option<OrderItem>>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query(&format!(
        "SELECT {ORDER_ITEM_COLUMNS} FROM order_items WHERE id = $1"
    ))
    .bind(id.as_i32())
    .fetch_optional(executor)
    .await?;

    row.map(row_to_order_item).transpose()
}

#[async_trait]
impl EntityStore for PostgresEntityStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id.as_i32())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_user).transpose()
    }

    async fn insert_user(&self, user: NewUser) -> Result<User> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users (id, name, email, role, status)
            VALUES (COALESCE($1, nextval(pg_get_serial_sequence('users', 'id'))::int4), $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id.map(|id| id.as_i32()))
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.role)
        .bind(&user.status)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::from_write(EntityKind::User, e))?;

        if user.id.is_some() {
            sync_sequence(&mut *tx, "users").await?;
        }

        tx.commit().await?;
        row_to_user(row)
    }

    async fn update_user(&self, user: &User) -> Result<User> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE users
            SET name = $2, email = $3, role = $4, status = $5, updated_at = GREATEST(clock_timestamp(), updated_at + interval '1 microsecond')
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id.as_i32())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.role)
        .bind(&user.status)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::from_write(EntityKind::User, e))?;

        match row {
            Some(row) => row_to_user(row),
            None => Err(StoreError::RowNotFound {
                entity: EntityKind::User,
                id: user.id.as_i32(),
            }),
        }
    }

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id.as_i32())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn insert_product(&self, product: NewProduct) -> Result<Product> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO products (name, description, price, quantity, category_id, author_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price)
        .bind(product.quantity)
        .bind(product.category_id.as_i32())
        .bind(product.author_id.as_i32())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::from_write(EntityKind::Product, e))?;

        row_to_product(&row)
    }

    async fn update_product(&self, product: &Product) -> Result<Product> {
        update_product_in(&self.pool, product).await
    }

    async fn delete_product(&self, id: ProductId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.as_i32())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_write(EntityKind::Product, e))?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self, products), fields(count = products.len()))]
    async fn upsert_products(&self, products: Vec<NewProduct>) -> Result<Vec<Product>> {
        let mut tx = self.pool.begin().await?;
        let mut upserted = Vec::with_capacity(products.len());

        for product in &products {
            let row = sqlx::query(&format!(
                r#"
                INSERT INTO products (name, description, price, quantity, category_id, author_id)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (name) DO UPDATE SET
                    description = EXCLUDED.description,
                    price = EXCLUDED.price,
                    quantity = EXCLUDED.quantity,
                    category_id = EXCLUDED.category_id,
                    author_id = EXCLUDED.author_id,
                    updated_at = GREATEST(clock_timestamp(), products.updated_at + interval '1 microsecond')
                RETURNING {PRODUCT_COLUMNS}
                "#
            ))
            .bind(&product.name)
            .bind(&product.description)
            .bind(product.price)
            .bind(product.quantity)
            .bind(product.category_id.as_i32())
            .bind(product.author_id.as_i32())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| StoreError::from_write(EntityKind::Product, e))?;

            upserted.push(row_to_product(&row)?);
        }

        tx.commit().await?;
        Ok(upserted)
    }

    async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<ProductWithCategory>> {
        let mut sql = String::from(
            r#"
            SELECT products.id, products.name, products.description, products.price,
                   products.quantity, products.category_id, products.author_id,
                   products.created_at, products.updated_at,
                   product_categories.name AS category_name
            FROM products
            INNER JOIN product_categories ON product_categories.id = products.category_id
            WHERE 1=1
            "#,
        );
        let mut param_count = 0;

        if filter.name.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND products.name ILIKE '%' || ${param_count} || '%'"));
        }
        if filter.created_on.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND products.created_at::date = ${param_count}"));
        }
        sql.push_str(" ORDER BY products.id ASC");

        let mut sqlx_query = sqlx::query(&sql);
        if let Some(ref name) = filter.name {
            sqlx_query = sqlx_query.bind(name);
        }
        if let Some(day) = filter.created_on {
            sqlx_query = sqlx_query.bind(day);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                Ok(ProductWithCategory {
                    product: row_to_product(&row)?,
                    category_name: row.try_get("category_name")?,
                })
            })
            .collect()
    }

    async fn stream_products(&self) -> Result<EntityStream<Product>> {
        use futures_util::{TryStreamExt, stream};

        let pool = self.pool.clone();
        let batches = stream::try_unfold((pool, Some(0)), |(pool, after)| async move {
            let Some(after) = after else {
                return Ok::<_, StoreError>(None);
            };
            let rows = sqlx::query(STREAM_PRODUCTS_SQL)
                .bind(after)
                .bind(STREAM_BATCH_SIZE)
                .fetch_all(&pool)
                .await?;
            let batch = rows.iter().map(row_to_product).collect::<Result<Vec<_>>>()?;
            let next = if (batch.len() as i64) < STREAM_BATCH_SIZE {
                None
            } else {
                batch.last().map(|p| p.id.as_i32())
            };
            Ok(Some((batch, (pool, next))))
        });

        let stream = batches
            .map_ok(|batch| stream::iter(batch.into_iter().map(Ok)))
            .try_flatten();

        Ok(Box::pin(stream))
    }

    async fn find_category(&self, id: CategoryId) -> Result<Option<ProductCategory>> {
        let row = sqlx::query(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM product_categories WHERE id = $1"
        ))
        .bind(id.as_i32())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_category).transpose()
    }

    async fn find_category_by_name(&self, name: &str) -> Result<Option<ProductCategory>> {
        let row = sqlx::query(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM product_categories WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_category).transpose()
    }

    async fn insert_category(&self, category: NewCategory) -> Result<ProductCategory> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO product_categories (id, name, description)
            VALUES (COALESCE($1, nextval(pg_get_serial_sequence('product_categories', 'id'))::int4), $2, $3)
            RETURNING {CATEGORY_COLUMNS}
            "#
        ))
        .bind(category.id.map(|id| id.as_i32()))
        .bind(&category.name)
        .bind(&category.description)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::from_write(EntityKind::ProductCategory, e))?;

        if category.id.is_some() {
            sync_sequence(&mut *tx, "product_categories").await?;
        }

        tx.commit().await?;
        row_to_category(row)
    }

    async fn update_category(&self, category: &ProductCategory) -> Result<ProductCategory> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE product_categories
            SET name = $2, description = $3, updated_at = GREATEST(clock_timestamp(), updated_at + interval '1 microsecond')
            WHERE id = $1
            RETURNING {CATEGORY_COLUMNS}
            "#
        ))
        .bind(category.id.as_i32())
        .bind(&category.name)
        .bind(&category.description)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::from_write(EntityKind::ProductCategory, e))?;

        match row {
            Some(row) => row_to_category(row),
            None => Err(StoreError::RowNotFound {
                entity: EntityKind::ProductCategory,
                id: category.id.as_i32(),
            }),
        }
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_i32())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_order).transpose()
    }

    async fn update_order(&self, order: &Order) -> Result<Order> {
        update_order_in(&self.pool, order).await
    }

    async fn find_order_item(&self, id: OrderItemId) -> Result<Option<OrderItem>> {
        find_order_item_in(&self.pool, id).await
    }

    async fn update_order_item(&self, item: &OrderItem) -> Result<OrderItem> {
        update_order_item_in(&self.pool, item).await
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_order_page(&self, query: &OrderListQuery) -> Result<OrderRowPage> {
        query.validate()?;

        let mut param_count = 0;
        let filter = Self::order_filter(query, &mut param_count);

        let count_sql = format!("SELECT COUNT(DISTINCT orders.id) {ORDER_LISTING_JOINS}{filter}");

        let mut page_sql = format!(
            r#"
            SELECT orders.id AS order_id, orders.status, orders.total_price, orders.created_at,
                   users.name AS user_name, users.email AS user_email,
                   array_agg(order_items.id ORDER BY order_items.id) AS item_ids,
                   array_agg(products.name ORDER BY order_items.id) AS product_names,
                   array_agg(order_items.quantity ORDER BY order_items.id) AS item_quantities,
                   array_agg(order_items.price ORDER BY order_items.id) AS item_prices
            {ORDER_LISTING_JOINS}{filter}
            GROUP BY orders.id, users.name, users.email
            "#
        );
        page_sql.push_str(&Self::order_by(query));
        param_count += 1;
        page_sql.push_str(&format!(" LIMIT ${param_count}"));
        param_count += 1;
        page_sql.push_str(&format!(" OFFSET ${param_count}"));

        // Both statements read the same snapshot.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        let mut page_query = sqlx::query(&page_sql);
        if let Some(range) = query.date_range {
            count_query = count_query
                .bind(range.starts_at())
                .bind(range.ends_before());
            page_query = page_query.bind(range.starts_at()).bind(range.ends_before());
        }
        page_query = page_query
            .bind(i64::from(query.pagination.limit))
            .bind(query.pagination.offset());

        let total_count = count_query.fetch_one(&mut *tx).await?;
        let rows = page_query.fetch_all(&mut *tx).await?;
        tx.commit().await?;
        tracing::debug!(total_count, rows = rows.len(), "Fetched order page");

        let rows = rows
            .into_iter()
            .map(row_to_aggregate)
            .collect::<Result<Vec<_>>>()?;

        Ok(OrderRowPage { rows, total_count })
    }
}

/// A PostgreSQL transaction. Dropping it rolls back.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO orders (user_id, status, total_price)
            VALUES ($1, $2, $3)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order.user_id.as_i32())
        .bind(&order.status)
        .bind(order.total_price)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_write(EntityKind::Order, e))?;

        row_to_order(row)
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_i32())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_order).transpose()
    }

    async fn update_order(&mut self, order: &Order) -> Result<Order> {
        update_order_in(&mut *self.tx, order).await
    }

    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_i32())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn update_product(&mut self, product: &Product) -> Result<Product> {
        update_product_in(&mut *self.tx, product).await
    }

    async fn find_order_item(&mut self, id: OrderItemId) -> Result<Option<OrderItem>> {
        find_order_item_in(&mut *self.tx, id).await
    }

    async fn insert_order_items(
        &mut self,
        order_id: OrderId,
        items: Vec<NewOrderItem>,
    ) -> Result<Vec<OrderItem>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let product_ids: Vec<i32> = items.iter().map(|i| i.product_id.as_i32()).collect();
        let quantities: Vec<i32> = items.iter().map(|i| i.quantity).collect();
        let prices: Vec<Decimal> = items.iter().map(|i| i.price).collect();

        let rows = sqlx::query(&format!(
            r#"
            INSERT INTO order_items (order_id, product_id, quantity, price)
            SELECT $1, item.product_id, item.quantity, item.price
            FROM UNNEST($2::int4[], $3::int4[], $4::numeric[]) AS item(product_id, quantity, price)
            RETURNING {ORDER_ITEM_COLUMNS}
            "#
        ))
        .bind(order_id.as_i32())
        .bind(&product_ids)
        .bind(&quantities)
        .bind(&prices)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_write(EntityKind::OrderItem, e))?;

        let mut inserted = rows
            .into_iter()
            .map(row_to_order_item)
            .collect::<Result<Vec<_>>>()?;
        inserted.sort_by_key(|item| item.id);
        Ok(inserted)
    }

    async fn update_order_item(&mut self, item: &OrderItem) -> Result<OrderItem> {
        update_order_item_in(&mut *self.tx, item).await
    }

    async fn list_order_items(&mut self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY id ASC"
        ))
        .bind(order_id.as_i32())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(row_to_order_item).collect()
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
