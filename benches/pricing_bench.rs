//! Pricing Benchmarks - Hot-Path Performance Validation
//!
//! Benchmarks the functions that run on every stats update and the
//! cache read that precedes every synchronizer start.
//!
//! Run with: cargo bench --bench pricing_bench

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal_macros::dec;

use live_price_curve::adapters::cache::MemoryCacheBackend;
use live_price_curve::domain::pricing::{
    compute_price, progress, PriceCurve, StockLimit, VariantPriceOverride, VariantSelection,
};
use live_price_curve::domain::product::Product;
use live_price_curve::domain::stats::{stats_key, StatsView};
use live_price_curve::usecases::{CachePolicy, LivePricer, StatsCache};

fn curve() -> PriceCurve {
    PriceCurve {
        base_price: dec!(49.90),
        min_orders: 100,
        max_stock: StockLimit::Limited(500),
        modifier_before_min: Some(dec!(-0.15)),
        modifier_after_min: Some(dec!(0.20)),
    }
}

/// Benchmark the curve on both sides of the threshold.
fn bench_compute_price(c: &mut Criterion) {
    let curve = curve();

    c.bench_function("compute_price_before_min", |b| {
        b.iter(|| compute_price(black_box(&curve), black_box(42), None));
    });
    c.bench_function("compute_price_after_min", |b| {
        b.iter(|| compute_price(black_box(&curve), black_box(420), None));
    });
}

/// Benchmark override resolution for a two-option selection.
fn bench_variant_override(c: &mut Criterion) {
    let mut overrides = VariantPriceOverride::new();
    for size in ["S", "M", "L", "XL"] {
        for color in ["black", "white", "red"] {
            let selection = VariantSelection::new().with("size", size).with("color", color);
            overrides.insert(&selection, dec!(55.00));
        }
    }
    let selection = VariantSelection::new().with("color", "red").with("size", "XL");

    c.bench_function("variant_override_lookup", |b| {
        b.iter(|| overrides.price_for(black_box(&selection)));
    });
}

/// Benchmark the full repricing of a view (price + progress).
fn bench_live_pricer(c: &mut Criterion) {
    let product = Product {
        id: "sku-1".into(),
        name: "Hoodie".into(),
        curve: curve(),
        variant_overrides: VariantPriceOverride::new(),
    };
    let pricer = LivePricer::new(product, None);
    let mut view = StatsView::initializing("sku-1");
    view.current_orders = 137;
    view.loading = false;

    c.bench_function("live_pricer_price", |b| {
        b.iter(|| pricer.price(black_box(&view)));
    });
    c.bench_function("curve_progress", |b| {
        b.iter(|| progress(black_box(&pricer.product().curve), black_box(137)));
    });
}

/// Benchmark a warm cache read on the in-process backend.
fn bench_cache_get(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let cache = StatsCache::new(
        Arc::new(MemoryCacheBackend::<u64>::new(1_024)),
        CachePolicy::default(),
    );
    let key = stats_key("sku-1");
    runtime.block_on(cache.put(&key, 137));

    c.bench_function("stats_cache_get_hit", |b| {
        b.to_async(&runtime).iter(|| cache.get(black_box(&key)));
    });
}

criterion_group!(
    benches,
    bench_compute_price,
    bench_variant_override,
    bench_live_pricer,
    bench_cache_get,
);
criterion_main!(benches);
