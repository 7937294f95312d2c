// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cached query results validated against the update-timestamp registry.

use std::sync::Arc;

use crate::Result;
use crate::entry::{CachedItem, PutOutcome, QueryCacheEntry};
use crate::key::{CacheKey, QueryCacheKey, RegionKey};
use crate::region::{Region, Regions};
use crate::telemetry::{CacheActivity, CacheOperation};
use crate::timestamps::{Timestamp, UpdateTimestampRegistry};

/// Per-query caching instructions supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryHint {
    /// Whether the result may be cached at all.
    pub cacheable: bool,
    /// The region to cache in; `None` selects the default query region.
    pub region: Option<String>,
}

impl QueryHint {
    /// Cache the result in the default query region.
    #[must_use]
    pub fn cacheable() -> Self {
        Self {
            cacheable: true,
            region: None,
        }
    }

    /// Never cache the result.
    #[must_use]
    pub fn uncached() -> Self {
        Self::default()
    }

    /// Cache the result in `region`.
    #[must_use]
    pub fn in_region(region: impl Into<String>) -> Self {
        Self {
            cacheable: true,
            region: Some(region.into()),
        }
    }
}

/// Ordered identifier lists of previously run queries.
///
/// An entry is served only while no region it depends on has been written
/// after the entry was created. Validation and eviction of a stale entry
/// happen under the entry's key lock, so a concurrent `put` of a fresh result
/// for the same key cannot be evicted by mistake.
///
/// Results hold identifiers, not state: resolve each through the
/// [`SharedObjectCache`](crate::SharedObjectCache) and reload the ones that
/// miss.
pub struct QueryResultCache<S> {
    regions: Arc<Regions<S>>,
    registry: Arc<UpdateTimestampRegistry>,
    default_region: Arc<str>,
}

impl<S> std::fmt::Debug for QueryResultCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResultCache")
            .field("default_region", &self.default_region)
            .finish_non_exhaustive()
    }
}

impl<S> QueryResultCache<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(regions: Arc<Regions<S>>, registry: Arc<UpdateTimestampRegistry>, default_region: Arc<str>) -> Self {
        Self {
            regions,
            registry,
            default_region,
        }
    }

    /// The region used when a hint names none.
    #[must_use]
    pub fn default_region(&self) -> &str {
        &self.default_region
    }

    /// The region a hint selects.
    #[must_use]
    pub fn region_for<'a>(&'a self, hint: &'a QueryHint) -> &'a str {
        hint.region.as_deref().unwrap_or(&self.default_region)
    }

    /// Looks up the result of `key`, discarding it if a dependent region was
    /// written after it was cached.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::UnknownRegion`](crate::ErrorKind::UnknownRegion) if no such region is configured.
    pub async fn get(&self, region: &str, key: &QueryCacheKey) -> Result<Option<QueryCacheEntry>> {
        let region = self.regions.get(region)?;
        let region_key = RegionKey::Query(key.clone());
        let _guard = region.lock_key(&region_key).await;

        let Some(CachedItem::Query(entry)) = region.read(&region_key, CacheOperation::QueryGet).await else {
            region.stats().miss();
            region.record(CacheOperation::QueryGet, CacheActivity::Miss);
            return Ok(None);
        };

        if let Some(changed) = self.changed_since(key, entry.created_at) {
            region.remove(&region_key, CacheOperation::QueryGet).await;
            region.stats().stale_query();
            region.stats().miss();
            region.record(CacheOperation::QueryGet, CacheActivity::Stale);
            tracing::debug!(
                cache.region = region.name(),
                cache.query = %key,
                cache.dependency = changed,
                "discarded stale query result"
            );
            return Ok(None);
        }

        region.stats().hit();
        region.record(CacheOperation::QueryGet, CacheActivity::Hit);
        Ok(Some(entry))
    }

    /// Caches `ids` as the result of `key`, stamped with the current logical
    /// time.
    ///
    /// Prefer [`put_started_at`](Self::put_started_at) when the query start
    /// time is known: a write that lands while the query runs would otherwise
    /// go unnoticed.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::UnknownRegion`](crate::ErrorKind::UnknownRegion) if no such region is configured.
    pub async fn put(&self, region: &str, key: &QueryCacheKey, ids: Vec<CacheKey>) -> Result<PutOutcome> {
        let now = self.registry.next_timestamp();
        self.put_started_at(region, key, ids, now).await
    }

    /// Caches `ids` as the result of `key`, computed by a query that started
    /// at `started_at`.
    ///
    /// A result already outdated by a write to a dependent region is not
    /// cached and reports [`PutOutcome::Ignored`].
    ///
    /// # Errors
    ///
    /// [`ErrorKind::UnknownRegion`](crate::ErrorKind::UnknownRegion) if no such region is configured.
    pub async fn put_started_at(&self, region: &str, key: &QueryCacheKey, ids: Vec<CacheKey>, started_at: Timestamp) -> Result<PutOutcome> {
        let region = self.regions.get(region)?;
        let region_key = RegionKey::Query(key.clone());
        let _guard = region.lock_key(&region_key).await;

        if self.changed_since(key, started_at).is_some() {
            region.record(CacheOperation::QueryPut, CacheActivity::Ignored);
            return Ok(PutOutcome::Ignored);
        }

        let entry = QueryCacheEntry {
            key: key.clone(),
            ids,
            created_at: started_at,
            cached_at: region.clock().system_time(),
        };
        if !region.write(&region_key, CachedItem::Query(entry), CacheOperation::QueryPut).await {
            return Ok(PutOutcome::Dropped);
        }
        region.record(CacheOperation::QueryPut, CacheActivity::Inserted);
        Ok(PutOutcome::Inserted)
    }

    /// Drops the cached result of `key`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::UnknownRegion`](crate::ErrorKind::UnknownRegion) if no such region is configured.
    pub async fn invalidate(&self, region: &str, key: &QueryCacheKey) -> Result<()> {
        let region = self.regions.get(region)?;
        Self::remove(region, key).await;
        Ok(())
    }

    /// Drops every cached result in `region`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::UnknownRegion`](crate::ErrorKind::UnknownRegion) if no such region is configured.
    pub async fn clear(&self, region: &str) -> Result<()> {
        self.regions.get(region)?.clear().await;
        Ok(())
    }

    async fn remove(region: &Region<S>, key: &QueryCacheKey) {
        let region_key = RegionKey::Query(key.clone());
        let _guard = region.lock_key(&region_key).await;
        if region.remove(&region_key, CacheOperation::Evict).await {
            region.record(CacheOperation::Evict, CacheActivity::Evicted);
        }
    }

    fn changed_since<'k>(&self, key: &'k QueryCacheKey, at: Timestamp) -> Option<&'k str> {
        key.dependent_regions()
            .find(|dependency| self.registry.last_write(dependency) > at)
    }
}
