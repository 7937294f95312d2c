// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The per-unit-of-work identity map.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::Result;
use crate::entry::Version;
use crate::error::Error;
use crate::key::CacheKey;

/// A live object managed by one unit of work.
///
/// Two handles denote the same object exactly when they point at the same
/// allocation.
pub type Managed<S> = Arc<RwLock<S>>;

#[derive(Debug)]
struct IdentityEntry<S> {
    object: Managed<S>,
    original: Option<S>,
    version: Option<Version>,
}

/// Guarantees one managed instance per key within a unit of work.
///
/// The map is owned by its unit of work and is not shared between threads of
/// control. Entries loaded from a cache or store remember their original
/// state, which is what [`is_dirty`](Self::is_dirty) compares against.
///
/// ```
/// use std::sync::Arc;
///
/// use larder::{CacheKey, IdentityMap, Managed};
/// use parking_lot::RwLock;
///
/// let mut map = IdentityMap::new();
/// let key = CacheKey::new("Product", 1);
/// let product: Managed<u32> = Arc::new(RwLock::new(10));
///
/// map.put(key.clone(), Arc::clone(&product))?;
/// assert!(Arc::ptr_eq(&map.get(&key).unwrap(), &product));
///
/// // A different instance under the same key is rejected.
/// assert!(map.put(key, Arc::new(RwLock::new(10))).is_err());
/// # Ok::<(), larder::Error>(())
/// ```
#[derive(Debug)]
pub struct IdentityMap<S> {
    entries: HashMap<CacheKey, IdentityEntry<S>>,
}

impl<S> Default for IdentityMap<S> {
    fn default() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl<S> IdentityMap<S> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The managed instance for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Managed<S>> {
        self.entries.get(key).map(|entry| Arc::clone(&entry.object))
    }

    /// Registers a new object under `key`.
    ///
    /// Registering the instance already held is a no-op.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::IdentityConflict`](crate::ErrorKind::IdentityConflict) if a
    /// different instance is already registered under `key`. The unit of work
    /// must be abandoned.
    pub fn put(&mut self, key: CacheKey, object: Managed<S>) -> Result<()> {
        self.register(key, object, None, None)
    }

    /// Registers an object loaded at `version` with state `original`.
    ///
    /// # Errors
    ///
    /// As [`put`](Self::put).
    pub fn put_loaded(&mut self, key: CacheKey, object: Managed<S>, original: S, version: Version) -> Result<()> {
        self.register(key, object, Some(original), Some(version))
    }

    fn register(&mut self, key: CacheKey, object: Managed<S>, original: Option<S>, version: Option<Version>) -> Result<()> {
        if let Some(existing) = self.entries.get(&key) {
            return if Arc::ptr_eq(&existing.object, &object) {
                Ok(())
            } else {
                Err(Error::identity_conflict(&key))
            };
        }

        self.entries.insert(key, IdentityEntry { object, original, version });
        Ok(())
    }

    /// Whether an instance is registered under `key`.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// The version `key` was loaded at, or `None` for new objects.
    #[must_use]
    pub fn version(&self, key: &CacheKey) -> Option<Version> {
        self.entries.get(key).and_then(|entry| entry.version)
    }

    /// Forgets every entry. Call when the unit of work ends.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of managed instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no instance is managed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records that `key` now matches the store at `version`.
    pub fn mark_clean(&mut self, key: &CacheKey, version: Version)
    where
        S: Clone,
    {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.original = Some(entry.object.read().clone());
            entry.version = Some(version);
        }
    }
}

impl<S: PartialEq> IdentityMap<S> {
    /// Whether `key` is new or changed since it was loaded.
    #[must_use]
    pub fn is_dirty(&self, key: &CacheKey) -> bool {
        self.entries.get(key).is_some_and(Self::entry_is_dirty)
    }

    /// Keys of every new or changed object, in no particular order.
    pub fn dirty_keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.entries
            .iter()
            .filter(|(_, entry)| Self::entry_is_dirty(entry))
            .map(|(key, _)| key)
    }

    fn entry_is_dirty(entry: &IdentityEntry<S>) -> bool {
        entry
            .original
            .as_ref()
            .is_none_or(|original| *original != *entry.object.read())
    }
}
