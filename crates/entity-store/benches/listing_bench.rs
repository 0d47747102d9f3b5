use chrono::Utc;
use criterion::{Criterion, criterion_group, criterion_main};
use entity_store::{
    EntityStore, InMemoryEntityStore, NewCategory, NewOrder, NewOrderItem, NewProduct, NewUser,
    OrderAggregateRow, OrderId, OrderListQuery, OrderSortColumn, SortKey, decode_order_rows,
};
use rust_decimal::Decimal;

fn make_row(order_id: i32, items: i32) -> OrderAggregateRow {
    OrderAggregateRow {
        order_id: OrderId::new(order_id),
        status: "Created".to_string(),
        total_price: Some(Decimal::from(items * 10)),
        created_at: Utc::now(),
        user_name: "Ada".to_string(),
        user_email: "ada@example.com".to_string(),
        item_ids: (1..=items).collect(),
        product_names: (1..=items).map(|i| format!("Product {i}")).collect(),
        item_quantities: vec![1; items as usize],
        item_prices: vec![Decimal::from(10); items as usize],
    }
}

fn bench_decode_page(c: &mut Criterion) {
    let rows: Vec<OrderAggregateRow> = (1..=50).map(|id| make_row(id, 5)).collect();

    c.bench_function("listing/decode_page_50x5", |b| {
        b.iter(|| {
            decode_order_rows(rows.clone()).unwrap();
        });
    });
}

fn bench_in_memory_page(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEntityStore::new();

    // Pre-populate with 200 single-item orders
    rt.block_on(async {
        let user = store
            .insert_user(NewUser {
                id: None,
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
                role: "user".to_string(),
                status: "activated".to_string(),
            })
            .await
            .unwrap();
        let category = store
            .insert_category(NewCategory {
                id: None,
                name: "General".to_string(),
                description: String::new(),
            })
            .await
            .unwrap();
        let product = store
            .insert_product(NewProduct {
                name: "Lamp".to_string(),
                description: String::new(),
                price: Decimal::from(10),
                quantity: 1_000,
                category_id: category.id,
                author_id: user.id,
            })
            .await
            .unwrap();

        for _ in 0..200 {
            let mut tx = store.begin().await.unwrap();
            let order = tx
                .insert_order(NewOrder {
                    user_id: user.id,
                    status: "Created".to_string(),
                    total_price: Some(product.price),
                })
                .await
                .unwrap();
            tx.insert_order_items(
                order.id,
                vec![NewOrderItem {
                    product_id: product.id,
                    quantity: 1,
                    price: product.price,
                }],
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }
    });

    let query = OrderListQuery::new()
        .sort_by(SortKey::desc(OrderSortColumn::CreatedAt))
        .page(20, 3);

    c.bench_function("listing/in_memory_page_20_of_200", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.fetch_order_page(&query).await.unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_decode_page, bench_in_memory_page);
criterion_main!(benches);
