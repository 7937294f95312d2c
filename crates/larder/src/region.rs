// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A named cache region wrapping its provider.
//!
//! The region is where provider failures stop. Every provider call is bounded
//! by the configured operation timeout. A failed or timed-out call switches the
//! region into pass-through for the configured window: reads miss and writes
//! are dropped without contacting the provider. Once the window has elapsed,
//! the next call probes the provider by clearing it. Writes and evictions
//! dropped during the window may have left stale entries behind, so nothing
//! cached before the failure survives recovery.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::BuildHasher;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use foldhash::fast::FixedState;
use futures::lock::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use larder_provider::{CacheProvider, DynamicProvider};
use parking_lot::Mutex;
use tick::{Clock, FutureExt};

use crate::Result;
use crate::config::RegionConfig;
use crate::entry::CachedItem;
use crate::error::Error;
use crate::key::RegionKey;
use crate::stats::RegionStats;
use crate::telemetry::{CacheActivity, CacheOperation, Telemetry};

const KEY_STRIPES: usize = 64;
const STRIPE_SEED: u64 = 0x6c61_7264_6572_5f6b;

#[derive(Debug, Clone, Copy)]
enum Health {
    Available,
    PassThrough { until: Instant },
    Probing { since: Instant },
}

enum Admission {
    Normal,
    Probe,
    Rejected,
}

impl Health {
    fn admit(&mut self, now: Instant, window: Duration) -> Admission {
        match *self {
            Self::Available => Admission::Normal,
            Self::PassThrough { until } if now >= until => {
                *self = Self::Probing { since: now };
                Admission::Probe
            }
            // A probe that never finished (its future was dropped) must not
            // keep the region bypassed forever.
            Self::Probing { since } if now.saturating_duration_since(since) >= window => {
                *self = Self::Probing { since: now };
                Admission::Probe
            }
            Self::PassThrough { .. } | Self::Probing { .. } => Admission::Rejected,
        }
    }
}

/// One configured region: provider, expiration, health and key locks.
pub(crate) struct Region<S> {
    name: Arc<str>,
    config: RegionConfig,
    provider: DynamicProvider<RegionKey, CachedItem<S>>,
    clock: Clock,
    stats: Arc<RegionStats>,
    telemetry: Telemetry,
    health: Mutex<Health>,
    stripes: Box<[AsyncMutex<()>]>,
    stripe_hasher: FixedState,
}

impl<S> std::fmt::Debug for Region<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("health", &*self.health.lock())
            .finish_non_exhaustive()
    }
}

impl<S> Region<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        config: RegionConfig,
        provider: DynamicProvider<RegionKey, CachedItem<S>>,
        clock: Clock,
        stats: Arc<RegionStats>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            name: Arc::from(config.name()),
            config,
            provider,
            clock,
            stats,
            telemetry,
            health: Mutex::new(Health::Available),
            stripes: (0..KEY_STRIPES).map(|_| AsyncMutex::new(())).collect(),
            stripe_hasher: FixedState::with_seed(STRIPE_SEED),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn config(&self) -> &RegionConfig {
        &self.config
    }

    pub(crate) fn clock(&self) -> &Clock {
        &self.clock
    }

    pub(crate) fn stats(&self) -> &RegionStats {
        &self.stats
    }

    pub(crate) fn record(&self, operation: CacheOperation, activity: CacheActivity) {
        self.telemetry.record(&self.name, operation, activity, None);
    }

    /// Serializes read-modify-write sequences on `key` within this process.
    pub(crate) async fn lock_key(&self, key: &RegionKey) -> AsyncMutexGuard<'_, ()> {
        #[expect(clippy::cast_possible_truncation, reason = "only the low bits select a stripe")]
        let stripe = (self.stripe_hasher.hash_one(key) as usize) % self.stripes.len();
        self.stripes[stripe].lock().await
    }

    /// Fetches the live item under `key`.
    ///
    /// Returns `None` when nothing is stored, the item expired, the provider
    /// failed, or the region is passing through.
    pub(crate) async fn read(&self, key: &RegionKey, operation: CacheOperation) -> Option<CachedItem<S>> {
        let item = self.call(operation, self.provider.get(key)).await??;

        if self.is_expired(item.cached_at()) {
            if self.call(CacheOperation::Evict, self.provider.remove(key)).await.is_some() {
                self.stats.eviction();
            }
            self.record(operation, CacheActivity::Expired);
            return None;
        }

        Some(item)
    }

    /// Stores `item` under `key`. Returns `false` if the write was dropped.
    pub(crate) async fn write(&self, key: &RegionKey, item: CachedItem<S>, operation: CacheOperation) -> bool {
        let written = self.call(operation, self.provider.put(key, item)).await.is_some();
        if written {
            self.stats.put();
            self.record_size();
        }
        written
    }

    /// Removes `key`. Returns `false` if the removal was dropped.
    pub(crate) async fn remove(&self, key: &RegionKey, operation: CacheOperation) -> bool {
        self.call(operation, self.provider.remove(key)).await.is_some()
    }

    /// Removes every entry. Returns `false` if the clear was dropped.
    pub(crate) async fn clear(&self) -> bool {
        let cleared = self.call(CacheOperation::Clear, self.provider.clear()).await.is_some();
        if cleared {
            self.record(CacheOperation::Clear, CacheActivity::Evicted);
            self.record_size();
        }
        cleared
    }

    pub(crate) fn len(&self) -> Option<u64> {
        self.provider.len()
    }

    pub(crate) fn is_passing_through(&self) -> bool {
        !matches!(*self.health.lock(), Health::Available)
    }

    fn is_expired(&self, cached_at: SystemTime) -> bool {
        self.config.time_to_live().is_some_and(|ttl| {
            self.clock
                .system_time()
                .duration_since(cached_at)
                .is_ok_and(|age| age >= ttl)
        })
    }

    fn record_size(&self) {
        if let Some(size) = self.provider.len() {
            self.telemetry.record_size(&self.name, size);
        }
    }

    async fn call<T, F>(&self, operation: CacheOperation, future: F) -> Option<T>
    where
        F: Future<Output = std::result::Result<T, larder_provider::Error>>,
    {
        let admission = self.health.lock().admit(self.clock.instant(), self.config.pass_through_window());
        match admission {
            Admission::Normal => {}
            Admission::Rejected => return None,
            Admission::Probe => {
                self.bounded(CacheOperation::Clear, self.provider.clear()).await?;
                *self.health.lock() = Health::Available;
                self.record(operation, CacheActivity::Recovered);
            }
        }

        self.bounded(operation, future).await
    }

    async fn bounded<T, F>(&self, operation: CacheOperation, future: F) -> Option<T>
    where
        F: Future<Output = std::result::Result<T, larder_provider::Error>>,
    {
        let stopwatch = self.clock.stopwatch();
        match future.timeout(&self.clock, self.config.operation_timeout()).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(error)) => {
                self.fail(operation, stopwatch.elapsed(), &error);
                None
            }
            Err(timeout) => {
                self.fail(operation, stopwatch.elapsed(), &timeout);
                None
            }
        }
    }

    fn fail(&self, operation: CacheOperation, elapsed: Duration, cause: &dyn Display) {
        self.stats.provider_error();
        self.telemetry.record_failure(&self.name, operation, Some(elapsed), cause);

        let now = self.clock.instant();
        let until = now.checked_add(self.config.pass_through_window()).unwrap_or(now);
        let previous = std::mem::replace(&mut *self.health.lock(), Health::PassThrough { until });
        if matches!(previous, Health::Available) {
            self.record(operation, CacheActivity::PassThrough);
        }
    }
}

/// Every configured region, by name.
pub(crate) struct Regions<S> {
    by_name: HashMap<Arc<str>, Region<S>>,
}

impl<S> std::fmt::Debug for Regions<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.by_name.values()).finish()
    }
}

impl<S> Regions<S> {
    pub(crate) fn new(regions: impl IntoIterator<Item = Region<S>>) -> Self {
        Self {
            by_name: regions.into_iter().map(|region| (Arc::clone(&region.name), region)).collect(),
        }
    }

    pub(crate) fn get(&self, name: &str) -> Result<&Region<S>> {
        self.by_name.get(name).ok_or_else(|| Error::unknown_region(name))
    }

    pub(crate) fn find(&self, name: &str) -> Option<&Region<S>> {
        self.by_name.get(name)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Region<S>> {
        self.by_name.values()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::executor::block_on;
    use larder_provider::DynamicProviderExt;
    use larder_provider::testing::{MockProvider, ProviderOp};
    use tick::ClockControl;

    use super::*;
    use crate::entry::{CacheEntry, Version};
    use crate::key::CacheKey;

    fn key(id: i64) -> RegionKey {
        RegionKey::Object(CacheKey::new("Product", id))
    }

    fn item(clock: &Clock, id: i64, price: u32) -> CachedItem<u32> {
        CachedItem::Object(CacheEntry::readable(CacheKey::new("Product", id), price, Version(1), clock.system_time()))
    }

    fn region(config: RegionConfig, provider: &MockProvider<RegionKey, CachedItem<u32>>, clock: &Clock) -> Region<u32> {
        Region::new(
            config,
            provider.clone().into_dynamic(),
            clock.clone(),
            Arc::new(RegionStats::default()),
            Telemetry::new(false),
        )
    }

    #[test]
    fn read_returns_written_item() {
        block_on(async {
            let clock = Clock::new_frozen();
            let provider = MockProvider::new();
            let region = region(RegionConfig::builder("Product").build(), &provider, &clock);

            assert!(region.write(&key(1), item(&clock, 1, 10), CacheOperation::Put).await);
            let read = region.read(&key(1), CacheOperation::Get).await;
            assert!(matches!(read, Some(CachedItem::Object(entry)) if entry.snapshot() == Some(&10)));
            assert_eq!(region.stats().snapshot().puts, 1);
        });
    }

    #[test]
    fn expired_items_are_removed() {
        block_on(async {
            let control = ClockControl::new();
            let clock = control.to_clock();
            let provider = MockProvider::new();
            let config = RegionConfig::builder("Product").time_to_live(Duration::from_secs(10)).build();
            let region = region(config, &provider, &clock);

            region.write(&key(1), item(&clock, 1, 10), CacheOperation::Put).await;
            control.advance(Duration::from_secs(9));
            assert!(region.read(&key(1), CacheOperation::Get).await.is_some());

            control.advance(Duration::from_secs(1));
            assert!(region.read(&key(1), CacheOperation::Get).await.is_none());
            assert!(!provider.contains_key(&key(1)));
            assert_eq!(region.stats().snapshot().evictions, 1);
        });
    }

    #[test]
    fn provider_failure_starts_pass_through() {
        block_on(async {
            let control = ClockControl::new();
            let clock = control.to_clock();
            let provider = MockProvider::new();
            let region = region(RegionConfig::builder("Product").build(), &provider, &clock);
            region.write(&key(1), item(&clock, 1, 10), CacheOperation::Put).await;

            provider.fail_when(|op| matches!(op, ProviderOp::Get(_)));
            assert!(region.read(&key(1), CacheOperation::Get).await.is_none());
            assert!(region.is_passing_through());
            assert_eq!(region.stats().snapshot().provider_errors, 1);

            // Writes are dropped without reaching the provider.
            provider.clear_operations();
            assert!(!region.write(&key(2), item(&clock, 2, 20), CacheOperation::Put).await);
            assert!(!region.remove(&key(1), CacheOperation::Evict).await);
            assert!(provider.operations().is_empty());
        });
    }

    #[test]
    fn recovery_probe_clears_stale_entries() {
        block_on(async {
            let control = ClockControl::new();
            let clock = control.to_clock();
            let provider = MockProvider::new();
            let region = region(RegionConfig::builder("Product").build(), &provider, &clock);
            region.write(&key(1), item(&clock, 1, 10), CacheOperation::Put).await;

            provider.fail_when(|_| true);
            assert!(region.read(&key(1), CacheOperation::Get).await.is_none());

            provider.clear_failures();
            control.advance(Duration::from_secs(4));
            assert!(region.read(&key(1), CacheOperation::Get).await.is_none());
            assert!(provider.contains_key(&key(1)));

            control.advance(Duration::from_secs(1));
            assert!(region.read(&key(1), CacheOperation::Get).await.is_none());
            assert!(!region.is_passing_through());
            assert_eq!(provider.entry_count(), 0);

            assert!(region.write(&key(1), item(&clock, 1, 11), CacheOperation::Put).await);
            assert!(region.read(&key(1), CacheOperation::Get).await.is_some());
        });
    }

    #[test]
    fn failed_probe_extends_pass_through() {
        block_on(async {
            let control = ClockControl::new();
            let clock = control.to_clock();
            let provider = MockProvider::new();
            let region = region(RegionConfig::builder("Product").build(), &provider, &clock);

            provider.fail_when(|_| true);
            assert!(region.read(&key(1), CacheOperation::Get).await.is_none());
            control.advance(Duration::from_secs(5));
            assert!(region.read(&key(1), CacheOperation::Get).await.is_none());
            assert!(region.is_passing_through());
            assert_eq!(region.stats().snapshot().provider_errors, 2);
        });
    }

    #[test]
    fn key_lock_is_released_on_drop() {
        block_on(async {
            let clock = Clock::new_frozen();
            let provider = MockProvider::new();
            let region = region(RegionConfig::builder("Product").build(), &provider, &clock);

            let first = region.lock_key(&key(1)).await;
            drop(first);
            let _again = region.lock_key(&key(1)).await;
        });
    }
}
