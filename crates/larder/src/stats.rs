// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-region counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// A point-in-time copy of a region's counters.
///
/// Counters only grow. They reset when the owning manager is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub struct RegionStatistics {
    /// Lookups that found a servable entry.
    pub hits: u64,
    /// Lookups that found nothing servable.
    pub misses: u64,
    /// Entries written.
    pub puts: u64,
    /// Entries the provider dropped on its own to honor capacity or expiry.
    pub evictions: u64,
    /// Soft-lock attempts that found the key locked by someone else.
    pub soft_lock_contentions: u64,
    /// Provider calls that failed or timed out.
    pub provider_errors: u64,
    /// Cached query results discarded because a dependent region changed.
    pub stale_query_results: u64,
}

impl RegionStatistics {
    /// Fraction of lookups that hit, or `None` before the first lookup.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "ratio of counters, precision loss is acceptable")]
    pub fn hit_ratio(&self) -> Option<f64> {
        let lookups = self.hits.saturating_add(self.misses);
        (lookups > 0).then(|| self.hits as f64 / lookups as f64)
    }
}

#[derive(Debug, Default)]
pub(crate) struct RegionStats {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
    soft_lock_contentions: AtomicU64,
    provider_errors: AtomicU64,
    stale_query_results: AtomicU64,
}

impl RegionStats {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn contention(&self) {
        self.soft_lock_contentions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn provider_error(&self) {
        self.provider_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stale_query(&self) {
        self.stale_query_results.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RegionStatistics {
        RegionStatistics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            soft_lock_contentions: self.soft_lock_contentions.load(Ordering::Relaxed),
            provider_errors: self.provider_errors.load(Ordering::Relaxed),
            stale_query_results: self.stale_query_results.load(Ordering::Relaxed),
        }
    }
}
