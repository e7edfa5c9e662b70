use criterion::{Criterion, criterion_group, criterion_main};
use stock::{
    EngineConfig, InMemoryReservationStore, ItemId, ItemMetadata, ItemQuantity, OrderId,
    ReservationEngine,
};

async fn stocked_engine(items: usize) -> ReservationEngine<InMemoryReservationStore> {
    let engine = ReservationEngine::new(InMemoryReservationStore::new(), EngineConfig::default());
    for i in 0..items {
        engine
            .add_stock(
                &ItemId::new(format!("SKU-{i}")),
                1_000_000,
                ItemMetadata::default(),
            )
            .await
            .unwrap();
    }
    engine
}

fn bench_book_single_item(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = rt.block_on(stocked_engine(1));

    c.bench_function("stock/book_single_item", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine
                    .book(&[ItemQuantity::new("SKU-0", 1)], Some(OrderId::new()))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_book_and_finalize_five_items(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = rt.block_on(stocked_engine(5));
    let lines: Vec<ItemQuantity> = (0..5)
        .map(|i| ItemQuantity::new(format!("SKU-{i}"), 1))
        .collect();

    c.bench_function("stock/book_and_finalize_5_items", |b| {
        b.iter(|| {
            rt.block_on(async {
                let order_id = OrderId::new();
                engine.book(&lines, Some(order_id)).await.unwrap();
                engine.finalize(order_id).await.unwrap();
            });
        });
    });
}

fn bench_verify_ten_items(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = rt.block_on(stocked_engine(10));
    let lines: Vec<ItemQuantity> = (0..10)
        .map(|i| ItemQuantity::new(format!("SKU-{i}"), 2))
        .collect();

    c.bench_function("stock/verify_10_items", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine.verify_stock(&lines).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_book_single_item,
    bench_book_and_finalize_five_items,
    bench_verify_ten_items
);
criterion_main!(benches);
