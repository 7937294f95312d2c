// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Benchmarks for shared object cache and query cache operations.

#![allow(missing_docs, reason = "Benchmark code")]

use std::{hint::black_box, time::Instant};

use criterion::{Criterion, criterion_group, criterion_main};
use futures::executor::block_on;
use larder::{CacheKey, CacheManager, ConcurrencyStrategy, QueryCacheKey, RegionConfig, UnlockOutcome, Version};
use tick::Clock;

const KEYS: i64 = 1000;

fn manager() -> CacheManager<String> {
    CacheManager::builder::<String>(Clock::new_frozen())
        .region(RegionConfig::new("Product", ConcurrencyStrategy::ReadWrite))
        .region(RegionConfig::new("Log", ConcurrencyStrategy::NonstrictReadWrite))
        .logs(false)
        .build()
        .expect("valid configuration")
}

fn keys(entity: &str) -> Vec<CacheKey> {
    (0..KEYS).map(|id| CacheKey::new(entity, id)).collect()
}

// =============================================================================
// Shared object cache
// =============================================================================

fn bench_object_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("object_cache");

    group.bench_function("get_hit", |b| {
        let manager = manager();
        let keys = keys("Product");
        block_on(async {
            for key in &keys {
                manager
                    .objects()
                    .put("Product", key, format!("value_{key}"), Version(0))
                    .await
                    .expect("put failed");
            }
        });

        b.iter_custom(|iters| {
            block_on(async {
                let start = Instant::now();
                for key in keys.iter().cycle().take(usize::try_from(iters).unwrap_or(usize::MAX)) {
                    let _ = black_box(manager.objects().get("Product", key).await);
                }
                start.elapsed()
            })
        });
    });

    group.bench_function("get_miss", |b| {
        let manager = manager();
        let keys = keys("Product");

        b.iter_custom(|iters| {
            block_on(async {
                let start = Instant::now();
                for key in keys.iter().cycle().take(usize::try_from(iters).unwrap_or(usize::MAX)) {
                    let _ = black_box(manager.objects().get("Product", key).await);
                }
                start.elapsed()
            })
        });
    });

    group.bench_function("nonstrict_put", |b| {
        let manager = manager();
        let keys = keys("Log");

        b.iter_custom(|iters| {
            block_on(async {
                let start = Instant::now();
                for (version, key) in keys.iter().cycle().take(usize::try_from(iters).unwrap_or(usize::MAX)).enumerate() {
                    let version = Version(u64::try_from(version).unwrap_or(u64::MAX));
                    let _ = black_box(manager.objects().put("Log", key, "entry".to_owned(), version).await);
                }
                start.elapsed()
            })
        });
    });

    group.bench_function("soft_lock_cycle", |b| {
        let manager = manager();
        let key = CacheKey::new("Product", 1);
        let mut version = 0;

        b.iter_custom(|iters| {
            block_on(async {
                let start = Instant::now();
                for _ in 0..iters {
                    let token = manager.objects().soft_lock("Product", &key).await.expect("lock failed");
                    version += 1;
                    let outcome = UnlockOutcome::Success {
                        snapshot: "widget".to_owned(),
                        version: Version(version),
                    };
                    let _ = black_box(manager.objects().soft_unlock("Product", &key, token, outcome).await);
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

// =============================================================================
// Query result cache
// =============================================================================

fn bench_query_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_cache");

    group.bench_function("get_fresh", |b| {
        let manager = manager();
        let queries = manager.queries();
        let region = queries.default_region().to_owned();
        let query = QueryCacheKey::new("from Product where price < ?").param(20).depends_on("Product");
        block_on(queries.put(&region, &query, keys("Product"))).expect("put failed");

        b.iter_custom(|iters| {
            block_on(async {
                let start = Instant::now();
                for _ in 0..iters {
                    let _ = black_box(queries.get(&region, &query).await);
                }
                start.elapsed()
            })
        });
    });

    group.bench_function("record_write", |b| {
        let manager = manager();
        let timestamps = manager.timestamps();

        b.iter(|| timestamps.record_write_now(black_box("Product")));
    });

    group.finish();
}

criterion_group!(benches, bench_object_cache, bench_query_cache);
criterion_main!(benches);
