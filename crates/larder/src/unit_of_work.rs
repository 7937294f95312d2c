// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reads and writes through every cache tier on behalf of one unit of work.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::ConcurrencyStrategy;
use crate::entry::{CachedObject, Version};
use crate::error::Error;
use crate::identity::{IdentityMap, Managed};
use crate::key::{CacheKey, QueryCacheKey};
use crate::manager::CacheManager;
use crate::object_cache::UnlockOutcome;
use crate::query_cache::QueryHint;
use crate::transaction::TransactionId;
use crate::{ErrorKind, Result};

/// A snapshot together with the version the store holds it at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<S> {
    /// The stored state.
    pub snapshot: S,
    /// Its version.
    pub version: Version,
}

impl<S> From<CachedObject<S>> for Versioned<S> {
    fn from(object: CachedObject<S>) -> Self {
        Self {
            snapshot: object.snapshot,
            version: object.version,
        }
    }
}

/// The durable store behind the caches.
///
/// The caches never call the store themselves; a [`UnitOfWork`] does, and
/// reports the outcome to the caches.
pub trait DurableStore<S>: Send + Sync {
    /// Loads the committed state of `key`.
    fn load(&self, key: &CacheKey) -> impl Future<Output = Result<Option<Versioned<S>>>> + Send;

    /// Writes `snapshot` as the new state of `key` and returns its version.
    ///
    /// `expected` is the version the writer loaded, or `None` for a new
    /// object. Stores fail with
    /// [`ErrorKind::OptimisticConflict`] when it no longer matches.
    fn save(&self, key: &CacheKey, snapshot: &S, expected: Option<Version>) -> impl Future<Output = Result<Version>> + Send;

    /// Runs `query` and returns the identifiers of the matching objects in order.
    fn query(&self, query: &QueryCacheKey) -> impl Future<Output = Result<Vec<CacheKey>>> + Send;
}

/// One bounded sequence of reads and writes sharing an identity map.
///
/// Reads go to the identity map first, then the shared object cache, then
/// the store. [`commit`](Self::commit) writes every new or changed object to
/// the store and updates the caches according to each region's strategy.
///
/// Cache failures never fail a store operation: when the cache cannot take
/// part in a write, the key is evicted or bypassed and the write proceeds.
pub struct UnitOfWork<'a, S, D> {
    manager: &'a CacheManager<S>,
    store: &'a D,
    identity: IdentityMap<S>,
}

impl<S, D> std::fmt::Debug for UnitOfWork<'_, S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("managed", &self.identity.len())
            .finish_non_exhaustive()
    }
}

impl<'a, S, D> UnitOfWork<'a, S, D>
where
    S: Clone + PartialEq + Send + Sync + 'static,
    D: DurableStore<S>,
{
    pub(crate) fn new(manager: &'a CacheManager<S>, store: &'a D) -> Self {
        Self {
            manager,
            store,
            identity: IdentityMap::new(),
        }
    }

    /// The identity map of this unit of work.
    #[must_use]
    pub fn identity(&self) -> &IdentityMap<S> {
        &self.identity
    }

    /// The managed instance of `key`, loading it if necessary.
    ///
    /// # Errors
    ///
    /// Errors reported by the store.
    pub async fn find(&mut self, key: &CacheKey) -> Result<Option<Managed<S>>> {
        if let Some(object) = self.identity.get(key) {
            return Ok(Some(object));
        }

        let manager = self.manager;
        let region = manager.region_for(key);
        if let Some(region) = region
            && let Some(hit) = manager.objects().get(region, key).await?
        {
            return self.manage(key, hit.into()).map(Some);
        }

        let Some(loaded) = self.store.load(key).await? else {
            return Ok(None);
        };
        if let Some(region) = region {
            match manager
                .objects()
                .put(region, key, loaded.snapshot.clone(), loaded.version)
                .await
            {
                Ok(_) => {}
                // Another unit of work cached the key first.
                Err(error) if matches!(error.kind(), ErrorKind::ImmutableCacheViolation | ErrorKind::OptimisticConflict) => {
                    tracing::debug!(cache.region = region, cache.key = %key, "kept cached state: {error}");
                }
                Err(error) => return Err(error),
            }
        }
        self.manage(key, loaded).map(Some)
    }

    fn manage(&mut self, key: &CacheKey, loaded: Versioned<S>) -> Result<Managed<S>> {
        let object = Arc::new(RwLock::new(loaded.snapshot.clone()));
        self.identity
            .put_loaded(key.clone(), Arc::clone(&object), loaded.snapshot, loaded.version)?;
        Ok(object)
    }

    /// Registers a new object to be inserted on commit.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::IdentityConflict`] if `key` is already managed.
    pub fn persist(&mut self, key: CacheKey, snapshot: S) -> Result<Managed<S>> {
        let object = Arc::new(RwLock::new(snapshot));
        self.identity.put(key, Arc::clone(&object))?;
        Ok(object)
    }

    /// Runs `query`, serving it from the query cache when `hint` allows.
    ///
    /// Identifiers of a cached result are resolved one by one; an object that
    /// no longer exists in the store is skipped.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::UnknownRegion`] if `hint` names an unconfigured region,
    /// or errors reported by the store.
    pub async fn query(&mut self, hint: &QueryHint, query: &QueryCacheKey) -> Result<Vec<Managed<S>>> {
        let queries = self.manager.queries();
        let ids = if hint.cacheable {
            let region = queries.region_for(hint);
            if let Some(cached) = queries.get(region, query).await? {
                cached.ids().to_vec()
            } else {
                let started_at = self.manager.timestamps().next_timestamp();
                let ids = self.store.query(query).await?;
                queries.put_started_at(region, query, ids.clone(), started_at).await?;
                ids
            }
        } else {
            self.store.query(query).await?
        };

        let mut objects = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(object) = self.find(id).await? {
                objects.push(object);
            }
        }
        Ok(objects)
    }

    /// Writes every new or changed object to the store and updates the caches.
    ///
    /// # Errors
    ///
    /// - Errors reported by the store. Writes committed before the failing one
    ///   stay committed; cached transactional state for them is evicted.
    /// - [`ErrorKind::ImmutableCacheViolation`] when an object of a read-only
    ///   region was changed. Nothing is written for it.
    pub async fn commit(mut self) -> Result<()> {
        let tx = TransactionId::next();
        let mut staged = Vec::new();

        if let Err(error) = self.write_dirty(tx, &mut staged).await {
            self.abandon_transaction(tx, &staged).await;
            return Err(error);
        }

        if !staged.is_empty() {
            self.finish_transaction(tx, &staged).await;
        }
        self.identity.clear();
        Ok(())
    }

    async fn write_dirty(&mut self, tx: TransactionId, staged: &mut Vec<(&'a str, CacheKey)>) -> Result<()> {
        let manager = self.manager;
        // Key order keeps soft locks of concurrent commits in one global order.
        let mut dirty: Vec<CacheKey> = self.identity.dirty_keys().cloned().collect();
        dirty.sort();

        for key in dirty {
            let Some(object) = self.identity.get(&key) else { continue };
            let snapshot = object.read().clone();
            let expected = self.identity.version(&key);
            let region = manager.region_for(&key);

            let version = match region {
                None => self.store.save(&key, &snapshot, expected).await?,
                Some(region) => match manager.strategy(region)? {
                    ConcurrencyStrategy::ReadOnly => self.write_read_only(region, &key, snapshot.clone(), expected).await?,
                    ConcurrencyStrategy::ReadWrite => self.write_read_write(region, &key, snapshot.clone(), expected).await?,
                    ConcurrencyStrategy::NonstrictReadWrite => {
                        let version = self.store.save(&key, &snapshot, expected).await?;
                        manager.objects().evict(region, &key).await?;
                        version
                    }
                    ConcurrencyStrategy::Transactional => {
                        let version = self.store.save(&key, &snapshot, expected).await?;
                        // Committed in the store from here on; a later failure must evict it.
                        staged.push((region, key.clone()));
                        manager.objects().stage(tx, region, &key, snapshot.clone(), version)?;
                        version
                    }
                },
            };

            manager.timestamps().record_write_now(region.unwrap_or_else(|| key.entity()));
            self.identity.mark_clean(&key, version);
        }
        Ok(())
    }

    async fn write_read_only(&self, region: &str, key: &CacheKey, snapshot: S, expected: Option<Version>) -> Result<Version> {
        if expected.is_some() {
            return Err(Error::immutable(region, key));
        }

        let version = self.store.save(key, &snapshot, None).await?;
        if let Err(error) = self.manager.objects().put(region, key, snapshot, version).await {
            tracing::warn!(cache.region = region, cache.key = %key, "could not cache inserted object: {error}");
        }
        Ok(version)
    }

    async fn write_read_write(&self, region: &str, key: &CacheKey, snapshot: S, expected: Option<Version>) -> Result<Version> {
        let objects = self.manager.objects();
        let token = match objects.soft_lock(region, key).await {
            Ok(token) => token,
            Err(error) if matches!(error.kind(), ErrorKind::LockContention | ErrorKind::ProviderUnavailable) => {
                tracing::warn!(cache.region = region, cache.key = %key, "bypassing cache for write: {error}");
                let version = self.store.save(key, &snapshot, expected).await?;
                objects.evict(region, key).await?;
                return Ok(version);
            }
            Err(error) => return Err(error),
        };

        match self.store.save(key, &snapshot, expected).await {
            Ok(version) => {
                if let Err(error) = objects
                    .soft_unlock(region, key, token, UnlockOutcome::Success { snapshot, version })
                    .await
                {
                    tracing::warn!(cache.region = region, cache.key = %key, "committed object was not cached: {error}");
                }
                Ok(version)
            }
            Err(error) => {
                if let Err(unlock_error) = objects.soft_unlock(region, key, token, UnlockOutcome::Failure).await {
                    tracing::warn!(cache.region = region, cache.key = %key, "could not release soft lock after failed write: {unlock_error}");
                }
                Err(error)
            }
        }
    }

    async fn finish_transaction(&self, tx: TransactionId, staged: &[(&str, CacheKey)]) {
        let objects = self.manager.objects();
        let outcome = match objects.prepare(tx).await {
            Ok(()) => objects.commit(tx).await,
            Err(error) => Err(error),
        };

        if let Err(error) = outcome {
            tracing::warn!(transaction = %tx, "cache transaction failed, evicting staged keys: {error}");
            self.abandon_transaction(tx, staged).await;
        }
    }

    /// Discards `tx` and evicts the keys it staged, whose store state moved on.
    async fn abandon_transaction(&self, tx: TransactionId, staged: &[(&str, CacheKey)]) {
        let objects = self.manager.objects();
        objects.rollback(tx);
        for (region, key) in staged {
            if let Err(error) = objects.evict(region, key).await {
                tracing::warn!(cache.region = *region, cache.key = %key, "could not evict staged key: {error}");
            }
        }
    }

    /// Abandons the unit of work without writing anything.
    pub fn rollback(mut self) {
        self.identity.clear();
    }
}
