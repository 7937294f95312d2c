// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory provider with an operation log and failure injection.

use std::{collections::HashMap, hash::Hash, sync::Arc};

use parking_lot::Mutex;

use crate::{CacheProvider, Error};

/// A provider call as seen by [`MockProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOp<K, V> {
    /// `get` for the key.
    Get(K),
    /// `put` of a value under a key.
    Put {
        /// The key written.
        key: K,
        /// The value written.
        value: V,
    },
    /// `remove` for the key.
    Remove(K),
    /// `clear`.
    Clear,
}

impl<K, V> ProviderOp<K, V> {
    /// Returns the key this operation touched, if any.
    #[must_use]
    pub fn key(&self) -> Option<&K> {
        match self {
            Self::Get(key) | Self::Remove(key) | Self::Put { key, .. } => Some(key),
            Self::Clear => None,
        }
    }
}

type FailPredicate<K, V> = Box<dyn Fn(&ProviderOp<K, V>) -> bool + Send + Sync>;

/// A provider for tests that stores values in a hash map.
///
/// Every call is recorded. A predicate installed with
/// [`fail_when`](Self::fail_when) makes matching calls fail, which is how
/// tests simulate an unreachable cache cluster. Clones share storage, the log
/// and the predicate, so a test can keep a handle after giving the provider to
/// a region.
///
/// ```
/// use larder_provider::testing::{MockProvider, ProviderOp};
/// use larder_provider::CacheProvider;
///
/// # futures::executor::block_on(async {
/// let provider = MockProvider::<u32, &str>::new();
/// provider.put(&1, "one").await.unwrap();
///
/// provider.fail_when(|op| matches!(op, ProviderOp::Get(_)));
/// assert!(provider.get(&1).await.is_err());
///
/// provider.clear_failures();
/// assert_eq!(provider.get(&1).await.unwrap(), Some("one"));
/// # });
/// ```
pub struct MockProvider<K, V> {
    data: Arc<Mutex<HashMap<K, V>>>,
    operations: Arc<Mutex<Vec<ProviderOp<K, V>>>>,
    fail_when: Arc<Mutex<Option<FailPredicate<K, V>>>>,
}

impl<K, V> std::fmt::Debug for MockProvider<K, V>
where
    K: std::fmt::Debug,
    V: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("data", &self.data)
            .field("operations", &self.operations.lock().len())
            .field("failing", &self.fail_when.lock().is_some())
            .finish()
    }
}

impl<K, V> Clone for MockProvider<K, V> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            operations: Arc::clone(&self.operations),
            fail_when: Arc::clone(&self.fail_when),
        }
    }
}

impl<K, V> Default for MockProvider<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> MockProvider<K, V> {
    /// Creates an empty provider that never fails.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
            operations: Arc::new(Mutex::new(Vec::new())),
            fail_when: Arc::new(Mutex::new(None)),
        }
    }

    /// Number of stored values.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.data.lock().len()
    }

    /// Makes every call for which `predicate` returns `true` fail.
    ///
    /// Replaces any previously installed predicate.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&ProviderOp<K, V>) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Makes every call succeed again.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Forgets all recorded calls.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    fn check(&self, op: ProviderOp<K, V>, what: &'static str) -> Result<(), Error> {
        let fail = self.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        self.operations.lock().push(op);
        if fail {
            return Err(Error::from_message(format!("mock provider: {what} failed")));
        }
        Ok(())
    }
}

impl<K, V> MockProvider<K, V>
where
    K: Eq + Hash,
{
    /// Returns `true` if a value is stored under `key`.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.data.lock().contains_key(key)
    }
}

impl<K, V> MockProvider<K, V>
where
    K: Clone,
    V: Clone,
{
    /// Returns every call recorded so far, oldest first.
    #[must_use]
    pub fn operations(&self) -> Vec<ProviderOp<K, V>> {
        self.operations.lock().clone()
    }
}

impl<K, V> CacheProvider<K, V> for MockProvider<K, V>
where
    K: Clone + Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    async fn get(&self, key: &K) -> Result<Option<V>, Error> {
        self.check(ProviderOp::Get(key.clone()), "get")?;
        Ok(self.data.lock().get(key).cloned())
    }

    async fn put(&self, key: &K, value: V) -> Result<(), Error> {
        self.check(
            ProviderOp::Put {
                key: key.clone(),
                value: value.clone(),
            },
            "put",
        )?;
        self.data.lock().insert(key.clone(), value);
        Ok(())
    }

    async fn remove(&self, key: &K) -> Result<(), Error> {
        self.check(ProviderOp::Remove(key.clone()), "remove")?;
        self.data.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), Error> {
        self.check(ProviderOp::Clear, "clear")?;
        self.data.lock().clear();
        Ok(())
    }

    fn len(&self) -> Option<u64> {
        Some(self.data.lock().len() as u64)
    }
}
