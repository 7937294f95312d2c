// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The moka-backed heap provider.

use std::hash::Hash;

use larder_provider::{CacheProvider, Error};
use moka::future::Cache;
use moka::notification::RemovalCause;

use crate::builder::{EvictionCause, HeapProviderBuilder};

/// A provider that stores values on the heap.
///
/// Reads and writes never fail. Clones share the same storage.
///
/// ```
/// use larder_memory::HeapProvider;
/// use larder_provider::CacheProvider;
///
/// # futures::executor::block_on(async {
/// let provider = HeapProvider::<u32, &str>::with_capacity(100);
/// provider.put(&1, "one").await.unwrap();
/// assert_eq!(provider.get(&1).await.unwrap(), Some("one"));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct HeapProvider<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<K, V>,
}

impl<K, V> Default for HeapProvider<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> HeapProvider<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates an unbounded provider.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a provider holding at most `max_capacity` entries.
    #[must_use]
    pub fn with_capacity(max_capacity: u64) -> Self {
        Self::builder().max_capacity(max_capacity).build()
    }

    /// Starts configuring a provider.
    #[must_use]
    pub fn builder() -> HeapProviderBuilder<K, V> {
        HeapProviderBuilder::new()
    }

    /// Runs pending housekeeping such as capacity evictions.
    ///
    /// The provider normally does this lazily. Tests call it to observe
    /// evictions deterministically.
    pub async fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks().await;
    }

    pub(crate) fn from_builder(builder: HeapProviderBuilder<K, V>) -> Self {
        let mut moka_builder = Cache::builder();

        if let Some(capacity) = builder.max_capacity {
            moka_builder = moka_builder.max_capacity(capacity);
        }

        if let Some(capacity) = builder.initial_capacity {
            moka_builder = moka_builder.initial_capacity(capacity);
        }

        if let Some(weigher) = builder.weigher {
            moka_builder = moka_builder.weigher(move |key: &K, value: &V| weigher(key, value));
        }

        if let Some(ttl) = builder.time_to_live {
            moka_builder = moka_builder.time_to_live(ttl);
        }

        if let Some(tti) = builder.time_to_idle {
            moka_builder = moka_builder.time_to_idle(tti);
        }

        if let Some(name) = builder.name.as_deref() {
            moka_builder = moka_builder.name(name);
        }

        if let Some(listener) = builder.eviction_listener {
            moka_builder = moka_builder.eviction_listener(move |key, _value, cause| {
                let cause = match cause {
                    RemovalCause::Size => EvictionCause::Capacity,
                    RemovalCause::Expired => EvictionCause::Expired,
                    _ => return,
                };
                listener(&*key, cause);
            });
        }

        Self {
            inner: moka_builder.build(),
        }
    }
}

impl<K, V> CacheProvider<K, V> for HeapProvider<K, V>
where
    K: Clone + Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<V>, Error> {
        Ok(self.inner.get(key).await)
    }

    async fn put(&self, key: &K, value: V) -> Result<(), Error> {
        self.inner.insert(key.clone(), value).await;
        Ok(())
    }

    async fn remove(&self, key: &K) -> Result<(), Error> {
        self.inner.invalidate(key).await;
        Ok(())
    }

    async fn clear(&self) -> Result<(), Error> {
        self.inner.invalidate_all();
        Ok(())
    }

    fn len(&self) -> Option<u64> {
        Some(self.inner.entry_count())
    }
}
