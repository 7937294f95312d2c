// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Type-erased providers.

use std::{fmt::Debug, sync::Arc};

use crate::{CacheProvider, Error, provider::DynCacheProvider};

/// Converts any [`CacheProvider`] into a [`DynamicProvider`].
///
/// Implemented for every provider type.
///
/// # Examples
///
/// ```
/// use larder_provider::{CacheProvider, DynamicProvider, DynamicProviderExt};
///
/// fn erase<P>(provider: P) -> DynamicProvider<String, u64>
/// where
///     P: CacheProvider<String, u64> + 'static,
/// {
///     provider.into_dynamic()
/// }
/// ```
pub trait DynamicProviderExt<K, V>: Sized {
    /// Wraps this provider in a [`DynamicProvider`].
    fn into_dynamic(self) -> DynamicProvider<K, V>;
}

impl<K, V, P> DynamicProviderExt<K, V> for P
where
    P: CacheProvider<K, V> + 'static,
{
    fn into_dynamic(self) -> DynamicProvider<K, V> {
        DynamicProvider::new(self)
    }
}

/// A clonable provider with its concrete storage type erased.
///
/// Cloning shares the same underlying storage.
pub struct DynamicProvider<K, V>(Arc<DynCacheProvider<'static, K, V>>);

impl<K, V> DynamicProvider<K, V> {
    pub(crate) fn new<P>(provider: P) -> Self
    where
        P: CacheProvider<K, V> + Send + Sync + 'static,
    {
        Self(DynCacheProvider::new_arc(provider))
    }
}

impl<K, V> Debug for DynamicProvider<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicProvider").finish_non_exhaustive()
    }
}

impl<K, V> Clone for DynamicProvider<K, V> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<K, V> CacheProvider<K, V> for DynamicProvider<K, V>
where
    K: Sync,
    V: Send,
{
    async fn get(&self, key: &K) -> Result<Option<V>, Error> {
        self.0.get(key).await
    }

    async fn put(&self, key: &K, value: V) -> Result<(), Error> {
        self.0.put(key, value).await
    }

    async fn remove(&self, key: &K) -> Result<(), Error> {
        self.0.remove(key).await
    }

    async fn clear(&self) -> Result<(), Error> {
        self.0.clear().await
    }

    fn len(&self) -> Option<u64> {
        self.0.len()
    }

    fn is_empty(&self) -> Option<bool> {
        self.0.is_empty()
    }
}
