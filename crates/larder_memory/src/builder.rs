// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Configuration for heap providers.

use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::provider::HeapProvider;

pub(crate) type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> u32 + Send + Sync>;
pub(crate) type EvictionListener<K> = Arc<dyn Fn(&K, EvictionCause) + Send + Sync>;

/// Why the heap provider dropped an entry on its own.
///
/// Explicit removals and replacements are not reported; only entries the
/// provider chose to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EvictionCause {
    /// Dropped to stay within the configured capacity.
    Capacity,
    /// Dropped because its time-to-live or time-to-idle elapsed.
    Expired,
}

/// Builder for [`HeapProvider`].
///
/// Without any settings the provider is unbounded and entries never expire.
///
/// ```
/// use larder_memory::HeapProvider;
/// use std::time::Duration;
///
/// let provider = HeapProvider::<String, Vec<u8>>::builder()
///     .max_capacity(64 * 1024)
///     .weigher(|_key, value| u32::try_from(value.len()).unwrap_or(u32::MAX))
///     .time_to_idle(Duration::from_secs(60))
///     .name("blobs")
///     .build();
/// ```
pub struct HeapProviderBuilder<K, V> {
    pub(crate) max_capacity: Option<u64>,
    pub(crate) initial_capacity: Option<usize>,
    pub(crate) weigher: Option<Weigher<K, V>>,
    pub(crate) time_to_live: Option<Duration>,
    pub(crate) time_to_idle: Option<Duration>,
    pub(crate) name: Option<String>,
    pub(crate) eviction_listener: Option<EvictionListener<K>>,
    _phantom: PhantomData<(K, V)>,
}

impl<K, V> Debug for HeapProviderBuilder<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapProviderBuilder")
            .field("max_capacity", &self.max_capacity)
            .field("initial_capacity", &self.initial_capacity)
            .field("weighted", &self.weigher.is_some())
            .field("time_to_live", &self.time_to_live)
            .field("time_to_idle", &self.time_to_idle)
            .field("name", &self.name)
            .field("eviction_listener", &self.eviction_listener.is_some())
            .finish()
    }
}

impl<K, V> Default for HeapProviderBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> HeapProviderBuilder<K, V> {
    /// Creates a builder for an unbounded provider without expiration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_capacity: None,
            initial_capacity: None,
            weigher: None,
            time_to_live: None,
            time_to_idle: None,
            name: None,
            eviction_listener: None,
            _phantom: PhantomData,
        }
    }

    /// Bounds the provider.
    ///
    /// Without a [`weigher`](Self::weigher) the bound counts entries. With one
    /// it bounds the sum of entry weights, for example bytes.
    #[must_use]
    pub fn max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = Some(capacity);
        self
    }

    /// Pre-allocates room for `capacity` entries.
    #[must_use]
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = Some(capacity);
        self
    }

    /// Assigns each entry a weight counted against
    /// [`max_capacity`](Self::max_capacity).
    #[must_use]
    pub fn weigher<F>(mut self, weigher: F) -> Self
    where
        F: Fn(&K, &V) -> u32 + Send + Sync + 'static,
    {
        self.weigher = Some(Arc::new(weigher));
        self
    }

    /// Expires entries this long after they were written.
    #[must_use]
    pub fn time_to_live(mut self, duration: Duration) -> Self {
        self.time_to_live = Some(duration);
        self
    }

    /// Expires entries this long after they were last read or written.
    #[must_use]
    pub fn time_to_idle(mut self, duration: Duration) -> Self {
        self.time_to_idle = Some(duration);
        self
    }

    /// Names the underlying cache for debugging output.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Calls `listener` whenever the provider drops an entry on its own.
    ///
    /// The listener runs on whichever task triggered the housekeeping, so it
    /// must be cheap and must not block.
    #[must_use]
    pub fn eviction_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&K, EvictionCause) + Send + Sync + 'static,
    {
        self.eviction_listener = Some(Arc::new(listener));
        self
    }

    /// Builds the provider.
    #[must_use]
    pub fn build(self) -> HeapProvider<K, V>
    where
        K: Hash + Eq + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        HeapProvider::from_builder(self)
    }
}
