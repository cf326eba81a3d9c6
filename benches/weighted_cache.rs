// Benchmarks the weighted LRU cache's hot paths: admission under churn and
// cache-hit promotion, the two operations on the request-serving path of
// every tenant node.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rustydb_fleet::common::TenantId;
use rustydb_fleet::node::WeightedLruCache;

fn bench_admit_with_eviction(c: &mut Criterion) {
    c.bench_function("weighted_cache_admit_with_eviction", |b| {
        b.iter(|| {
            let cache: WeightedLruCache<u32> = WeightedLruCache::new(100);
            for _ in 0..200 {
                let id = TenantId::new();
                let weight = 2;
                let victims = cache.eviction_candidates(weight);
                for v in victims {
                    cache.remove(v);
                }
                let _ = cache.admit(id, 0, weight);
            }
            black_box(cache.sum_weights())
        })
    });
}

fn bench_touch_promotion(c: &mut Criterion) {
    let cache: WeightedLruCache<u32> = WeightedLruCache::new(1000);
    let ids: Vec<TenantId> = (0..500)
        .map(|_| {
            let id = TenantId::new();
            cache.admit(id, 0, 2).unwrap();
            id
        })
        .collect();

    c.bench_function("weighted_cache_touch_promotion", |b| {
        b.iter(|| {
            for id in &ids {
                black_box(cache.touch(*id));
            }
        })
    });
}

criterion_group!(benches, bench_admit_with_eviction, bench_touch_promotion);
criterion_main!(benches);
