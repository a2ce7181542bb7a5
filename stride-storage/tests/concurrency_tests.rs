//! Concurrent access to the volatile tier, the image loader and the domain
//! cache, run on a multi-threaded runtime.

use std::sync::Arc;
use std::time::Duration;

use stride_core::{CacheKey, CachedImageEntry, DomainSnapshot, Rgb};
use stride_storage::{
    DerivedValuePipeline, FitnessDomainCache, InMemoryKvStore, LoadSource, MemoryPressure,
    ReadThroughImageLoader, VolatileTierCache,
};
use stride_test_utils::fixtures;
use stride_test_utils::{CountingBlobStore, CountingFetcher};
use tokio::task::JoinSet;

const URL: &str = "https://cdn.example.com/exercises/deadlift.png";

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

const ENTRY_COST: usize = 100;

fn tiny_entry(seed: u8) -> Arc<CachedImageEntry> {
    Arc::new(CachedImageEntry::new(
        1,
        1,
        vec![seed, seed, seed, 255],
        vec![Rgb::new(seed, seed, seed)],
    ))
}

fn image_key(task: usize, n: usize) -> CacheKey {
    CacheKey::image(&format!("https://cdn.example.com/{task}/{n}.png"))
}

fn snapshot_with(weight_kg: f64) -> DomainSnapshot {
    DomainSnapshot::capture(
        vec![fixtures::lift(&fixtures::squat(), weight_kg, 5, 0)],
        fixtures::epoch(),
    )
}

// ============================================================================
// VOLATILE TIER
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_puts_and_pressure_keep_bounds() {
    // Cost allows five entries, count allows eight.
    let memory = Arc::new(VolatileTierCache::new(8, 5 * ENTRY_COST));
    let pressure = MemoryPressure::new();
    pressure.subscribe(&memory);

    let mut tasks = JoinSet::new();
    for task in 0..6 {
        let memory = Arc::clone(&memory);
        tasks.spawn(async move {
            for n in 0..200 {
                let key = image_key(task, n % 12);
                memory.put(key.clone(), tiny_entry(n as u8), ENTRY_COST);
                let _ = memory.get(&key);
                if n % 25 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        });
    }
    for _ in 0..2 {
        let pressure = pressure.clone();
        tasks.spawn(async move {
            for _ in 0..20 {
                pressure.notify();
                tokio::task::yield_now().await;
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.expect("task should not panic");
    }

    assert!(memory.len() <= 5);
    assert!(memory.total_cost() <= memory.max_total_cost());
    assert_eq!(memory.total_cost(), memory.len() * ENTRY_COST);
    assert_eq!(memory.stats().entry_count, memory.len() as u64);

    pressure.notify();
    assert!(memory.is_empty());
    assert_eq!(memory.total_cost(), 0);
}

// ============================================================================
// IMAGE LOADER
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_cold_loads_each_fetch() {
    let memory = Arc::new(VolatileTierCache::new(50, 20 * 1024 * 1024));
    let blobs = Arc::new(CountingBlobStore::new());
    let fetcher = Arc::new(
        CountingFetcher::new()
            .with_response(URL, fixtures::solid_png(32, 32, Rgb::new(200, 100, 0)))
            .with_latency(Duration::from_millis(100)),
    );
    let loader = ReadThroughImageLoader::new(
        Arc::clone(&memory),
        Arc::clone(&blobs),
        Arc::clone(&fetcher),
        DerivedValuePipeline::new(32, 32, 2),
        Duration::from_secs(2),
    );

    let (first, second) = tokio::join!(loader.load_url(URL), loader.load_url(URL));
    let first = first.expect("first load should succeed");
    let second = second.expect("second load should succeed");

    // Misses are not coalesced: both loads go to the network.
    assert_eq!(first.source, LoadSource::Network);
    assert_eq!(second.source, LoadSource::Network);
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(*first.entry, *second.entry);

    let key = CacheKey::image(URL);
    assert_eq!(memory.len(), 1);
    assert!(memory.contains(&key));
    assert!(blobs.inner().contains(&key));
    assert_eq!(blobs.counts().puts(), 2);
}

// ============================================================================
// DOMAIN CACHE
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sets_converge_in_both_tiers() {
    let store = Arc::new(InMemoryKvStore::new());
    let cache = Arc::new(FitnessDomainCache::<InMemoryKvStore>::new(Arc::clone(&store)));

    let mut tasks = JoinSet::new();
    for n in 0..8 {
        let cache = Arc::clone(&cache);
        tasks.spawn(async move {
            for round in 0..10 {
                cache.set(snapshot_with(100.0 + f64::from(n * 10 + round)));
                let seen = cache.get().await;
                assert!(seen.is_some(), "a set value is always visible");
                tokio::task::yield_now().await;
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.expect("task should not panic");
    }
    cache.flush().await;

    let in_memory = cache.get().await.expect("snapshot should be cached");
    cache.discard_memory().await;
    let promoted = cache.get().await.expect("snapshot should be persisted");
    assert_eq!(*promoted, *in_memory);

    let reopened = FitnessDomainCache::<InMemoryKvStore>::new(Arc::clone(&store));
    let persisted = reopened.get().await.expect("snapshot should survive restart");
    assert_eq!(*persisted, *in_memory);
}
