// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for `HeapProvider`.

use std::sync::Arc;

use larder_memory::{EvictionCause, HeapProvider, HeapProviderBuilder};
use larder_provider::CacheProvider;
use parking_lot::Mutex;

fn block_on<F: std::future::Future>(f: F) -> F::Output {
    futures::executor::block_on(f)
}

#[test]
fn new_provider_is_empty() {
    let provider = HeapProvider::<String, i32>::new();
    assert_eq!(provider.len(), Some(0));
    assert_eq!(provider.is_empty(), Some(true));
}

#[test]
fn get_missing_key_is_none() {
    block_on(async {
        let provider = HeapProvider::<String, i32>::default();
        assert_eq!(provider.get(&"missing".to_string()).await.expect("get failed"), None);
    });
}

#[test]
fn put_replaces_previous_value() {
    block_on(async {
        let provider = HeapProvider::<String, i32>::new();
        let key = "key".to_string();
        provider.put(&key, 1).await.expect("put failed");
        provider.put(&key, 2).await.expect("put failed");
        assert_eq!(provider.get(&key).await.expect("get failed"), Some(2));
    });
}

#[test]
fn remove_and_clear_drop_values() {
    block_on(async {
        let provider = HeapProvider::<u32, i32>::new();
        provider.put(&1, 10).await.expect("put failed");
        provider.put(&2, 20).await.expect("put failed");

        provider.remove(&1).await.expect("remove failed");
        provider.remove(&99).await.expect("removing a missing key succeeds");
        assert_eq!(provider.get(&1).await.expect("get failed"), None);

        provider.clear().await.expect("clear failed");
        assert_eq!(provider.get(&2).await.expect("get failed"), None);
    });
}

#[test]
fn clones_share_storage() {
    block_on(async {
        let provider = HeapProvider::<u32, i32>::new();
        let clone = provider.clone();
        provider.put(&1, 10).await.expect("put failed");
        assert_eq!(clone.get(&1).await.expect("get failed"), Some(10));
    });
}

#[test]
fn len_counts_entries_after_housekeeping() {
    block_on(async {
        let provider = HeapProvider::<u32, i32>::new();
        for key in 0..5 {
            provider.put(&key, 0).await.expect("put failed");
        }
        provider.run_pending_tasks().await;
        assert_eq!(provider.len(), Some(5));
    });
}

#[test]
fn capacity_bound_evicts_and_notifies() {
    block_on(async {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&evicted);
        let provider = HeapProvider::<u32, i32>::builder()
            .max_capacity(3)
            .eviction_listener(move |key, cause| sink.lock().push((*key, cause)))
            .build();

        for key in 0..20 {
            provider.put(&key, 0).await.expect("put failed");
            provider.run_pending_tasks().await;
        }

        assert!(provider.len().expect("heap tracks size") <= 3);
        let evicted = evicted.lock();
        assert!(!evicted.is_empty());
        assert!(evicted.iter().all(|(_, cause)| *cause == EvictionCause::Capacity));
    });
}

#[test]
fn explicit_removal_is_not_reported_as_eviction() {
    block_on(async {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&evicted);
        let provider = HeapProvider::<u32, i32>::builder()
            .eviction_listener(move |key, cause| sink.lock().push((*key, cause)))
            .build();

        provider.put(&1, 1).await.expect("put failed");
        provider.put(&1, 2).await.expect("put failed");
        provider.remove(&1).await.expect("remove failed");
        provider.run_pending_tasks().await;

        assert!(evicted.lock().is_empty());
    });
}

#[test]
fn weigher_bounds_total_weight() {
    block_on(async {
        let provider = HeapProvider::<u32, Vec<u8>>::builder()
            .max_capacity(100)
            .weigher(|_key, value: &Vec<u8>| u32::try_from(value.len()).unwrap_or(u32::MAX))
            .build();

        for key in 0..10 {
            provider.put(&key, vec![0; 40]).await.expect("put failed");
            provider.run_pending_tasks().await;
        }

        assert!(provider.len().expect("heap tracks size") <= 2);
    });
}

#[test]
fn builder_debug_hides_closures() {
    let builder = HeapProviderBuilder::<u32, u32>::new()
        .max_capacity(10)
        .initial_capacity(4)
        .time_to_live(std::time::Duration::from_secs(30))
        .time_to_idle(std::time::Duration::from_secs(10))
        .name("users")
        .weigher(|_, _| 1);
    let debug = format!("{builder:?}");
    assert!(debug.contains("weighted: true"));
    assert!(debug.contains("users"));
    let _provider = builder.build();
}
