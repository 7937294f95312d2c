// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The storage trait behind every cache region.

use crate::Error;

/// Storage primitives a cache region is built on.
///
/// Providers store opaque values under opaque keys. They know nothing about
/// versions, soft locks, or expiration; regions keep that bookkeeping inside
/// the stored values. Every method may fail, for example when a remote cache
/// node is unreachable. Regions treat any failure as a cache miss.
///
/// All four storage methods are required. `len` and `is_empty` default to
/// `None` because not every backend can count its entries cheaply.
#[cfg_attr(
    any(test, feature = "dynamic-provider"),
    dynosaur::dynosaur(pub(crate) DynCacheProvider = dyn(box) CacheProvider, bridge(none))
)]
pub trait CacheProvider<K, V>: Send + Sync {
    /// Looks up the value stored under `key`.
    fn get(&self, key: &K) -> impl Future<Output = Result<Option<V>, Error>> + Send;

    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: &K, value: V) -> impl Future<Output = Result<(), Error>> + Send;

    /// Removes the value stored under `key`. Removing a missing key succeeds.
    fn remove(&self, key: &K) -> impl Future<Output = Result<(), Error>> + Send;

    /// Removes every stored value.
    fn clear(&self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Returns the number of stored values, if the backend tracks it.
    fn len(&self) -> Option<u64> {
        None
    }

    /// Returns `true` if nothing is stored.
    ///
    /// Returns `None` when the backend does not track its size.
    fn is_empty(&self) -> Option<bool> {
        self.len().map(|len| len == 0)
    }
}
