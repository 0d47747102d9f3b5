//! Order transactions and listing against the in-memory store and cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cache::{CacheMirror, FieldMap, InMemoryCache, cache_key};
use chrono::{NaiveDate, TimeZone, Utc};
use common::{EntityKind, OrderItemId, ProductId, UserId};
use entity_store::{
    DateRange, EntityStore, InMemoryEntityStore, NewProduct, OrderListQuery, OrderSortColumn,
    Product, SortKey,
};
use fulfillment::{
    ErrorKind, NotificationError, OrderConfirmation, OrderEngine, OrderError, OrderLine,
    OrderLineUpdate, OrderListing, OrderNotifier, RecordingNotifier,
};
use repository::CachedRepository;
use rust_decimal::Decimal;

type Engine<N = RecordingNotifier> = OrderEngine<InMemoryEntityStore, InMemoryCache, N>;

struct Fixture {
    engine: Engine,
    lamp: Product,
    desk: Product,
    user: UserId,
}

async fn product(
    repo: &CachedRepository<InMemoryEntityStore, InMemoryCache>,
    name: &str,
    price: i64,
    quantity: i32,
) -> Product {
    repo.create_product(NewProduct {
        name: name.to_string(),
        description: String::new(),
        price: Decimal::from(price),
        quantity,
        category_id: repository::DEFAULT_CATEGORY_ID,
        author_id: repository::DEFAULT_USER_ID,
    })
    .await
    .unwrap()
}

async fn seeded_repository() -> CachedRepository<InMemoryEntityStore, InMemoryCache> {
    let repo = CachedRepository::new(InMemoryEntityStore::new(), InMemoryCache::new());
    repo.get_default_user().await.unwrap();
    repo.get_default_category().await.unwrap();
    repo
}

async fn setup() -> Fixture {
    let repo = seeded_repository().await;
    let lamp = product(&repo, "Lamp", 1000, 10).await;
    let desk = product(&repo, "Desk", 100, 10).await;
    Fixture {
        engine: OrderEngine::new(repo, RecordingNotifier::new()),
        lamp,
        desk,
        user: repository::DEFAULT_USER_ID,
    }
}

async fn stock(engine: &Engine<impl OrderNotifier>, id: ProductId) -> i32 {
    engine
        .repository()
        .store()
        .find_product(id)
        .await
        .unwrap()
        .unwrap()
        .quantity
}

#[tokio::test]
async fn create_order_prices_lines_and_decrements_stock() {
    let f = setup().await;

    let receipt = f
        .engine
        .create_order(
            f.user,
            "Created",
            vec![OrderLine::new(f.lamp.id, 1), OrderLine::new(f.desk.id, 3)],
        )
        .await
        .unwrap();

    assert_eq!(receipt.order.total_price, Some(Decimal::from(1300)));
    assert_eq!(receipt.items.len(), 2);
    assert_eq!(receipt.items[0].price, Decimal::from(1000));
    assert_eq!(receipt.items[1].price, Decimal::from(300));
    assert_eq!(receipt.items_total(), Decimal::from(1300));

    assert_eq!(stock(&f.engine, f.lamp.id).await, 9);
    assert_eq!(stock(&f.engine, f.desk.id).await, 7);

    let sent = f.engine.notifier().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].order_id, receipt.order.id);
    assert_eq!(sent[0].user_email, "user@gmail.com");
    assert_eq!(sent[0].items[1].product_name, "Desk");
    assert_eq!(sent[0].total_price, Decimal::from(1300));
}

#[tokio::test]
async fn two_line_order_totals_captured_prices() {
    let repo = seeded_repository().await;
    let first = product(&repo, "Chair", 500, 4).await;
    let second = product(&repo, "Stool", 300, 4).await;
    let engine = OrderEngine::new(repo, RecordingNotifier::new());

    let receipt = engine
        .create_order(
            repository::DEFAULT_USER_ID,
            "Created",
            vec![OrderLine::new(first.id, 2), OrderLine::new(second.id, 1)],
        )
        .await
        .unwrap();

    assert_eq!(receipt.order.total_price, Some(Decimal::from(1300)));
    let stored = engine
        .repository()
        .store()
        .order_items_of(receipt.order.id)
        .await;
    assert_eq!(stored.len(), 2);
    assert_eq!((stored[0].product_id, stored[0].quantity), (first.id, 2));
    assert_eq!((stored[1].product_id, stored[1].quantity), (second.id, 1));
    assert_eq!(stock(&engine, first.id).await, 2);
    assert_eq!(stock(&engine, second.id).await, 3);
}

#[tokio::test]
async fn insufficient_stock_rolls_back_every_line() {
    let f = setup().await;

    let result = f
        .engine
        .create_order(
            f.user,
            "Created",
            vec![OrderLine::new(f.lamp.id, 2), OrderLine::new(f.desk.id, 11)],
        )
        .await;

    match result {
        Err(OrderError::InsufficientQuantity {
            product_id,
            requested,
            available,
        }) => {
            assert_eq!(product_id, f.desk.id);
            assert_eq!(requested, 11);
            assert_eq!(available, 10);
        }
        other => panic!("expected insufficient quantity, got {other:?}"),
    }

    assert_eq!(stock(&f.engine, f.lamp.id).await, 10);
    assert_eq!(stock(&f.engine, f.desk.id).await, 10);
    let counts = f.engine.repository().store().row_counts().await;
    assert_eq!(counts.orders, 0);
    assert_eq!(counts.order_items, 0);
    assert!(f.engine.notifier().sent().is_empty());
}

#[tokio::test]
async fn request_above_stock_leaves_stock_unchanged() {
    let repo = seeded_repository().await;
    let scarce = product(&repo, "Scarce", 50, 5).await;
    let engine = OrderEngine::new(repo, RecordingNotifier::new());

    let err = engine
        .create_order(
            repository::DEFAULT_USER_ID,
            "Created",
            vec![OrderLine::new(scarce.id, 10)],
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InsufficientQuantity);
    assert_eq!(stock(&engine, scarce.id).await, 5);
}

#[tokio::test]
async fn unknown_user_is_not_found_and_writes_nothing() {
    let f = setup().await;

    let err = f
        .engine
        .create_order(
            UserId::new(99999),
            "Created",
            vec![OrderLine::new(f.lamp.id, 1)],
        )
        .await
        .unwrap_err();

    assert_eq!(err.not_found_entity(), Some(EntityKind::User));
    assert_eq!(err.kind().http_status(), 404);
    let counts = f.engine.repository().store().row_counts().await;
    assert_eq!(counts.orders, 0);
    assert_eq!(counts.order_items, 0);
}

#[tokio::test]
async fn unknown_product_is_not_found_and_writes_nothing() {
    let f = setup().await;

    let err = f
        .engine
        .create_order(
            f.user,
            "Created",
            vec![
                OrderLine::new(f.lamp.id, 1),
                OrderLine::new(ProductId::new(777), 1),
            ],
        )
        .await
        .unwrap_err();

    assert_eq!(err.not_found_entity(), Some(EntityKind::Product));
    assert_eq!(stock(&f.engine, f.lamp.id).await, 10);
    assert_eq!(f.engine.repository().store().row_counts().await.orders, 0);
}

#[tokio::test]
async fn repeated_product_is_checked_against_running_stock() {
    let f = setup().await;

    let receipt = f
        .engine
        .create_order(
            f.user,
            "Created",
            vec![OrderLine::new(f.lamp.id, 4), OrderLine::new(f.lamp.id, 5)],
        )
        .await
        .unwrap();
    assert_eq!(receipt.order.total_price, Some(Decimal::from(9000)));
    assert_eq!(stock(&f.engine, f.lamp.id).await, 1);

    let err = f
        .engine
        .create_order(
            f.user,
            "Created",
            vec![OrderLine::new(f.lamp.id, 1), OrderLine::new(f.lamp.id, 1)],
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrderError::InsufficientQuantity {
            requested: 1,
            available: 0,
            ..
        }
    ));
    assert_eq!(stock(&f.engine, f.lamp.id).await, 1);
}

#[tokio::test]
async fn failed_notification_rolls_back_the_order() {
    let f = setup().await;
    f.engine.notifier().set_fail_on_send(true);

    let err = f
        .engine
        .create_order(f.user, "Created", vec![OrderLine::new(f.lamp.id, 2)])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotificationFailed);
    assert_eq!(stock(&f.engine, f.lamp.id).await, 10);
    assert_eq!(f.engine.repository().store().row_counts().await.orders, 0);
}

#[tokio::test]
async fn cache_is_refreshed_only_after_commit() {
    let f = setup().await;
    let cache = f.engine.repository().cache();
    let lamp_key = cache_key(EntityKind::Product, f.lamp.id.as_i32());

    // Warm the product entry, then fail an order that touches it.
    f.engine.repository().get_product(f.lamp.id).await.unwrap();
    f.engine.notifier().set_fail_on_send(true);
    f.engine
        .create_order(f.user, "Created", vec![OrderLine::new(f.lamp.id, 3)])
        .await
        .unwrap_err();
    assert_eq!(cache.entry(&lamp_key).await.unwrap()["quantity"], "10");
    assert!(cache.entry("order:1").await.is_none());

    f.engine.notifier().set_fail_on_send(false);
    let receipt = f
        .engine
        .create_order(f.user, "Created", vec![OrderLine::new(f.lamp.id, 3)])
        .await
        .unwrap();

    assert_eq!(cache.entry(&lamp_key).await.unwrap()["quantity"], "7");
    let order_key = cache_key(EntityKind::Order, receipt.order.id.as_i32());
    assert_eq!(
        cache.entry(&order_key).await.unwrap()["total_price"],
        "3000"
    );
    let item_key = cache_key(EntityKind::OrderItem, receipt.items[0].id.as_i32());
    assert!(cache.entry(&item_key).await.is_some());

    // The cached order now matches the store without another store read.
    let reads = f.engine.repository().store().read_count();
    let cached = f.engine.repository().get_order(receipt.order.id).await.unwrap();
    assert_eq!(cached, receipt.order);
    assert_eq!(f.engine.repository().store().read_count(), reads);
}

#[tokio::test]
async fn failed_refresh_after_commit_reports_the_committed_order() {
    let f = setup().await;
    let repo = f.engine.repository();

    // Warm every entry the order resolves, then reject cache writes.
    repo.get_user(f.user).await.unwrap();
    repo.get_product(f.lamp.id).await.unwrap();
    repo.cache().set_fail_on_write(true);

    let err = f
        .engine
        .create_order(f.user, "Created", vec![OrderLine::new(f.lamp.id, 2)])
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::CommittedCacheStale { .. }));
    assert_eq!(err.kind(), ErrorKind::CacheUnavailable);
    let order_id = err.committed_order().unwrap();
    let order = repo.store().find_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.total_price, Some(Decimal::from(2000)));
    assert_eq!(stock(&f.engine, f.lamp.id).await, 8);
    assert_eq!(f.engine.notifier().sent().len(), 1);
}

/// Holds back the first product write that publishes a quantity of 7.
#[derive(Clone, Default)]
struct SlowFirstWriteCache {
    inner: InMemoryCache,
    delayed: Arc<AtomicBool>,
}

#[async_trait]
impl CacheMirror for SlowFirstWriteCache {
    async fn get_all(&self, key: &str) -> cache::Result<FieldMap> {
        self.inner.get_all(key).await
    }

    async fn set_fields(&self, key: &str, fields: &[(String, String)]) -> cache::Result<()> {
        self.inner.set_fields(key, fields).await
    }

    async fn set_fields_if_newer(
        &self,
        key: &str,
        fields: &[(String, String)],
        version: i64,
    ) -> cache::Result<bool> {
        let publishes_seven = key.starts_with("product:")
            && fields.iter().any(|(f, v)| f == "quantity" && v == "7");
        if publishes_seven && !self.delayed.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        self.inner.set_fields_if_newer(key, fields, version).await
    }

    async fn delete(&self, key: &str) -> cache::Result<()> {
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn late_refresh_of_an_earlier_order_keeps_the_newest_stock_cached() {
    let cache = SlowFirstWriteCache::default();
    let repo = CachedRepository::new(InMemoryEntityStore::new(), cache.clone());
    repo.get_default_user().await.unwrap();
    repo.get_default_category().await.unwrap();
    let lamp = repo
        .create_product(NewProduct {
            name: "Lamp".to_string(),
            description: String::new(),
            price: Decimal::from(1000),
            quantity: 10,
            category_id: repository::DEFAULT_CATEGORY_ID,
            author_id: repository::DEFAULT_USER_ID,
        })
        .await
        .unwrap();
    let engine = OrderEngine::new(repo, RecordingNotifier::new());
    let user = repository::DEFAULT_USER_ID;

    let (first, second) = tokio::join!(
        engine.create_order(user, "Created", vec![OrderLine::new(lamp.id, 3)]),
        engine.create_order(user, "Created", vec![OrderLine::new(lamp.id, 3)]),
    );
    first.unwrap();
    second.unwrap();
    assert!(cache.delayed.load(Ordering::SeqCst));

    let stored = engine
        .repository()
        .store()
        .find_product(lamp.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.quantity, 4);

    let key = cache_key(EntityKind::Product, lamp.id.as_i32());
    assert_eq!(cache.inner.entry(&key).await.unwrap()["quantity"], "4");
    let cached = engine.repository().get_product(lamp.id).await.unwrap();
    assert_eq!(cached, stored);
}

#[tokio::test]
async fn unavailable_cache_fails_before_any_write() {
    let f = setup().await;
    f.engine.repository().cache().set_unavailable(true);

    let err = f
        .engine
        .create_order(f.user, "Created", vec![OrderLine::new(f.lamp.id, 1)])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CacheUnavailable);
    assert_eq!(err.kind().http_status(), 503);
    assert_eq!(stock(&f.engine, f.lamp.id).await, 10);
    assert_eq!(f.engine.repository().store().row_counts().await.orders, 0);
}

#[tokio::test]
async fn malformed_requests_are_validation_failures() {
    let f = setup().await;

    let empty = f
        .engine
        .create_order(f.user, "Created", Vec::new())
        .await
        .unwrap_err();
    assert_eq!(empty.kind(), ErrorKind::ValidationFailed);

    let zero = f
        .engine
        .create_order(f.user, "Created", vec![OrderLine::new(f.lamp.id, 0)])
        .await
        .unwrap_err();
    assert!(matches!(zero, OrderError::Validation(_)));

    let negative = f
        .engine
        .update_order(
            common::OrderId::new(1),
            f.user,
            "Updated",
            vec![OrderLineUpdate {
                item_id: None,
                product_id: f.lamp.id,
                quantity: -2,
            }],
        )
        .await
        .unwrap_err();
    assert_eq!(negative.kind(), ErrorKind::ValidationFailed);
}

#[tokio::test]
async fn update_rewrites_known_lines_and_adds_unknown_ones() {
    let f = setup().await;
    let created = f
        .engine
        .create_order(f.user, "Created", vec![OrderLine::new(f.lamp.id, 2)])
        .await
        .unwrap();
    let line = created.items[0].id;

    let updated = f
        .engine
        .update_order(
            created.order.id,
            f.user,
            "Updated",
            vec![
                OrderLineUpdate {
                    item_id: Some(line),
                    product_id: f.lamp.id,
                    quantity: 3,
                },
                OrderLineUpdate {
                    item_id: Some(OrderItemId::new(4242)),
                    product_id: f.desk.id,
                    quantity: 1,
                },
            ],
        )
        .await
        .unwrap();

    assert_eq!(updated.order.status, "Updated");
    assert_eq!(updated.items.len(), 2);
    assert_eq!(updated.items[0].id, line);
    assert_eq!(updated.items[0].quantity, 3);
    assert_eq!(updated.items[0].price, Decimal::from(3000));
    assert_eq!(updated.items[1].product_id, f.desk.id);
    assert_eq!(updated.order.total_price, Some(Decimal::from(3100)));
    assert_eq!(updated.items_total(), Decimal::from(3100));

    assert_eq!(stock(&f.engine, f.lamp.id).await, 5);
    assert_eq!(stock(&f.engine, f.desk.id).await, 9);

    // Updates do not send confirmations.
    assert_eq!(f.engine.notifier().sent().len(), 1);
}

#[tokio::test]
async fn update_of_missing_order_is_not_found() {
    let f = setup().await;

    let err = f
        .engine
        .update_order(common::OrderId::new(31), f.user, "Updated", Vec::new())
        .await
        .unwrap_err();

    assert_eq!(err.not_found_entity(), Some(EntityKind::Order));
}

#[tokio::test]
async fn update_with_insufficient_stock_keeps_previous_order() {
    let f = setup().await;
    let created = f
        .engine
        .create_order(f.user, "Created", vec![OrderLine::new(f.desk.id, 4)])
        .await
        .unwrap();

    let err = f
        .engine
        .update_order(
            created.order.id,
            f.user,
            "Updated",
            vec![OrderLineUpdate {
                item_id: Some(created.items[0].id),
                product_id: f.desk.id,
                quantity: 7,
            }],
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InsufficientQuantity);
    let order = f
        .engine
        .repository()
        .store()
        .find_order(created.order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, "Created");
    assert_eq!(stock(&f.engine, f.desk.id).await, 6);
}

struct StalledNotifier;

#[async_trait]
impl OrderNotifier for StalledNotifier {
    async fn order_created(&self, _: &OrderConfirmation) -> Result<(), NotificationError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn deadline_expiry_abandons_the_transaction() {
    let repo = seeded_repository().await;
    let lamp = product(&repo, "Lamp", 1000, 10).await;
    let engine = OrderEngine::new(repo, StalledNotifier).with_timeout(Duration::from_secs(1));

    let err = engine
        .create_order(
            repository::DEFAULT_USER_ID,
            "Created",
            vec![OrderLine::new(lamp.id, 2)],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::DeadlineExceeded(_)));
    assert_eq!(err.kind().http_status(), 504);
    assert_eq!(stock(&engine, lamp.id).await, 10);
    assert_eq!(engine.repository().store().row_counts().await.orders, 0);

    // The abandoned transaction released the store for the next writer.
    engine
        .repository()
        .update_product(&Product {
            quantity: 4,
            ..lamp
        })
        .await
        .unwrap();
    assert_eq!(stock(&engine, lamp.id).await, 4);
}

#[tokio::test]
async fn listing_pages_are_disjoint_and_counted() {
    let f = setup().await;
    for quantity in 1..=5 {
        f.engine
            .create_order(
                f.user,
                "Created",
                vec![
                    OrderLine::new(f.lamp.id, 1),
                    OrderLine::new(f.desk.id, quantity),
                ],
            )
            .await
            .unwrap();
    }
    let listing = OrderListing::new(f.engine.repository().store().clone());

    let first = listing
        .get_orders(&OrderListQuery::new().page(2, 1))
        .await
        .unwrap();
    let second = listing
        .get_orders(&OrderListQuery::new().page(2, 2))
        .await
        .unwrap();
    let third = listing
        .get_orders(&OrderListQuery::new().page(2, 3))
        .await
        .unwrap();

    assert_eq!(first.total_count, 5);
    assert_eq!(first.page_count(2), 3);
    assert_eq!(first.orders.len(), 2);
    assert_eq!(second.orders.len(), 2);
    assert_eq!(third.orders.len(), 1);

    let mut ids: Vec<_> = [&first, &second, &third]
        .iter()
        .flat_map(|page| page.orders.iter().map(|o| o.id))
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);

    let order = &first.orders[0];
    assert_eq!(order.user_name, "user default");
    assert_eq!(order.items.len(), 2);
    assert_eq!(order.items[0].product_name, "Lamp");
    let items_total: Decimal = order.items.iter().map(|i| i.price).sum();
    assert_eq!(order.total_price, Some(items_total));
}

#[tokio::test]
async fn listing_filters_by_creation_day_and_sorts() {
    let f = setup().await;
    let mut ids = Vec::new();
    for total in [3, 1, 2] {
        let receipt = f
            .engine
            .create_order(f.user, "Created", vec![OrderLine::new(f.desk.id, total)])
            .await
            .unwrap();
        ids.push(receipt.order.id);
    }
    let store = f.engine.repository().store().clone();
    store
        .set_order_created_at(ids[0], Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap())
        .await
        .unwrap();
    store
        .set_order_created_at(ids[1], Utc.with_ymd_and_hms(2024, 3, 2, 23, 59, 0).unwrap())
        .await
        .unwrap();
    store
        .set_order_created_at(ids[2], Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap())
        .await
        .unwrap();
    let listing = OrderListing::new(store);

    let range = DateRange::new(
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
    )
    .unwrap();
    let page = listing
        .get_orders(
            &OrderListQuery::new()
                .sort_by(SortKey::asc(OrderSortColumn::TotalPrice))
                .created_between(range)
                .page(10, 1),
        )
        .await
        .unwrap();

    assert_eq!(page.total_count, 2);
    let listed: Vec<_> = page.orders.iter().map(|o| o.id).collect();
    assert_eq!(listed, vec![ids[1], ids[0]]);
}

#[tokio::test]
async fn listing_rejects_zero_limit() {
    let f = setup().await;
    let listing = OrderListing::new(f.engine.repository().store().clone());

    let err = listing
        .get_orders(&OrderListQuery::new().page(0, 1))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
}
