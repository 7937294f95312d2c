// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Assembles regions, providers and caches into one manager.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use larder_memory::HeapProvider;
use larder_provider::{DynamicProvider, DynamicProviderExt};
use tick::Clock;

use crate::Result;
use crate::config::{Capacity, ConcurrencyStrategy, DEFAULT_QUERY_REGION, ProviderKind, RegionConfig};
use crate::entry::CachedItem;
use crate::error::Error;
use crate::key::{CacheKey, RegionKey};
use crate::object_cache::SharedObjectCache;
use crate::query_cache::QueryResultCache;
use crate::region::{Region, Regions};
use crate::stats::{RegionStatistics, RegionStats};
use crate::telemetry::Telemetry;
use crate::timestamps::UpdateTimestampRegistry;
use crate::unit_of_work::{DurableStore, UnitOfWork};

/// The provider type regions are built on.
pub type RegionProvider<S> = DynamicProvider<RegionKey, CachedItem<S>>;

type ProviderFactory<S> = Arc<dyn Fn(&RegionConfig) -> Result<RegionProvider<S>> + Send + Sync>;
type SnapshotWeigher<S> = Arc<dyn Fn(&S) -> u32 + Send + Sync>;

/// Owns every region and the caches built on them.
///
/// One manager serves every unit of work in the process. Its statistics live
/// as long as it does.
///
/// ```
/// use larder::{CacheKey, CacheManager, ConcurrencyStrategy, RegionConfig, Version};
/// use tick::Clock;
///
/// # futures::executor::block_on(async {
/// let manager = CacheManager::builder::<u32>(Clock::new_frozen())
///     .region(RegionConfig::new("Product", ConcurrencyStrategy::ReadWrite))
///     .build()?;
///
/// let key = CacheKey::new("Product", 1);
/// manager.objects().put("Product", &key, 10, Version(0)).await?;
/// let hit = manager.objects().get("Product", &key).await?.unwrap();
/// assert_eq!(hit.snapshot, 10);
/// assert_eq!(manager.statistics("Product")?.hits, 1);
/// # Ok::<(), larder::Error>(())
/// # }).unwrap();
/// ```
#[derive(Debug)]
pub struct CacheManager<S> {
    regions: Arc<Regions<S>>,
    objects: SharedObjectCache<S>,
    queries: QueryResultCache<S>,
    timestamps: Arc<UpdateTimestampRegistry>,
    default_entity_region: Option<Arc<str>>,
}

impl CacheManager<()> {
    /// Starts configuring a manager for snapshots of type `S`.
    #[must_use]
    pub fn builder<S>(clock: Clock) -> CacheManagerBuilder<S> {
        CacheManagerBuilder::new(clock)
    }
}

impl<S> CacheManager<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// The shared object cache.
    #[must_use]
    pub fn objects(&self) -> &SharedObjectCache<S> {
        &self.objects
    }

    /// The query result cache.
    #[must_use]
    pub fn queries(&self) -> &QueryResultCache<S> {
        &self.queries
    }

    /// The update-timestamp registry.
    #[must_use]
    pub fn timestamps(&self) -> &UpdateTimestampRegistry {
        &self.timestamps
    }

    /// The region objects of `key`'s entity are cached in.
    ///
    /// That is the region named after the entity, else the default entity
    /// region, else `None` and the entity is not cached.
    #[must_use]
    pub fn region_for(&self, key: &CacheKey) -> Option<&str> {
        self.regions
            .find(key.entity())
            .map(|region| region.name())
            .or(self.default_entity_region.as_deref())
    }

    /// The strategy of `region`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::UnknownRegion`](crate::ErrorKind::UnknownRegion) if no such region is configured.
    pub fn strategy(&self, region: &str) -> Result<ConcurrencyStrategy> {
        self.objects.strategy(region)
    }

    /// Names of every configured region, sorted.
    #[must_use]
    pub fn region_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.regions.iter().map(Region::name).collect();
        names.sort_unstable();
        names
    }

    /// Counters of `region`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::UnknownRegion`](crate::ErrorKind::UnknownRegion) if no such region is configured.
    pub fn statistics(&self, region: &str) -> Result<RegionStatistics> {
        Ok(self.regions.get(region)?.stats().snapshot())
    }

    /// Counters of every region, by name.
    #[must_use]
    pub fn all_statistics(&self) -> BTreeMap<String, RegionStatistics> {
        self.regions
            .iter()
            .map(|region| (region.name().to_owned(), region.stats().snapshot()))
            .collect()
    }

    /// Number of entries `region`'s provider holds, if it can tell.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::UnknownRegion`](crate::ErrorKind::UnknownRegion) if no such region is configured.
    pub fn entry_count(&self, region: &str) -> Result<Option<u64>> {
        Ok(self.regions.get(region)?.len())
    }

    /// Whether `region` is bypassing its provider after a failure.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::UnknownRegion`](crate::ErrorKind::UnknownRegion) if no such region is configured.
    pub fn is_passing_through(&self, region: &str) -> Result<bool> {
        Ok(self.regions.get(region)?.is_passing_through())
    }

    /// Starts a unit of work against `store`.
    pub fn begin<'a, D>(&'a self, store: &'a D) -> UnitOfWork<'a, S, D>
    where
        S: PartialEq,
        D: DurableStore<S>,
    {
        UnitOfWork::new(self, store)
    }
}

/// Configures a [`CacheManager`].
///
/// Created by [`CacheManager::builder`]. The default query region is always
/// created: as configured through
/// [`default_query_region`](Self::default_query_region), or otherwise as a
/// nonstrict read-write region named [`DEFAULT_QUERY_REGION`].
pub struct CacheManagerBuilder<S> {
    clock: Clock,
    regions: Vec<RegionConfig>,
    default_query_region: Option<RegionConfig>,
    default_entity_region: Option<String>,
    factories: HashMap<ProviderKind, ProviderFactory<S>>,
    weigher: Option<SnapshotWeigher<S>>,
    logs: bool,
    #[cfg(any(feature = "metrics", test))]
    meter: Option<opentelemetry::metrics::Meter>,
}

impl<S> std::fmt::Debug for CacheManagerBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManagerBuilder")
            .field("regions", &self.regions)
            .field("default_query_region", &self.default_query_region)
            .field("default_entity_region", &self.default_entity_region)
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .field("weighted", &self.weigher.is_some())
            .field("logs", &self.logs)
            .finish_non_exhaustive()
    }
}

impl<S> CacheManagerBuilder<S> {
    fn new(clock: Clock) -> Self {
        Self {
            clock,
            regions: Vec::new(),
            default_query_region: None,
            default_entity_region: None,
            factories: HashMap::new(),
            weigher: None,
            logs: true,
            #[cfg(any(feature = "metrics", test))]
            meter: None,
        }
    }

    /// Adds a region.
    #[must_use]
    pub fn region(mut self, config: RegionConfig) -> Self {
        self.regions.push(config);
        self
    }

    /// Adds the region queries are cached in when a hint names none.
    #[must_use]
    pub fn default_query_region(mut self, config: RegionConfig) -> Self {
        self.default_query_region = Some(config);
        self
    }

    /// Caches entities without a region of their own in `region`.
    #[must_use]
    pub fn default_entity_region(mut self, region: impl Into<String>) -> Self {
        self.default_entity_region = Some(region.into());
        self
    }

    /// Builds the providers of regions configured with `kind`.
    ///
    /// Heap providers are built in; registering a factory for
    /// [`ProviderKind::Heap`] replaces them.
    #[must_use]
    pub fn provider_factory<F>(mut self, kind: ProviderKind, factory: F) -> Self
    where
        F: Fn(&RegionConfig) -> Result<RegionProvider<S>> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
        self
    }

    /// Weighs snapshots for regions bounded in bytes.
    #[must_use]
    pub fn weigher<F>(mut self, weigher: F) -> Self
    where
        F: Fn(&S) -> u32 + Send + Sync + 'static,
    {
        self.weigher = Some(Arc::new(weigher));
        self
    }

    /// Turns structured logging on or off. On by default.
    #[must_use]
    pub fn logs(mut self, enabled: bool) -> Self {
        self.logs = enabled;
        self
    }

    /// Exports OpenTelemetry metrics through `provider`.
    #[cfg(any(feature = "metrics", test))]
    #[must_use]
    pub fn metrics(mut self, provider: &dyn opentelemetry::metrics::MeterProvider) -> Self {
        self.meter = Some(crate::telemetry::metrics::create_meter(provider));
        self
    }

    fn telemetry(&self) -> Telemetry {
        #[cfg(any(feature = "metrics", test))]
        if let Some(meter) = &self.meter {
            return Telemetry::with_meter(self.logs, meter);
        }
        Telemetry::new(self.logs)
    }
}

impl<S> CacheManagerBuilder<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Builds the manager.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::Configuration`](crate::ErrorKind::Configuration) if two
    /// regions share a name, the default entity region is not configured, a
    /// region asks for a provider kind without a factory, or a region bounded
    /// in bytes has no weigher to measure them with. Errors returned by
    /// provider factories are passed through.
    pub fn build(self) -> Result<CacheManager<S>> {
        let telemetry = self.telemetry();
        let query_region = self
            .default_query_region
            .clone()
            .unwrap_or_else(|| RegionConfig::new(DEFAULT_QUERY_REGION, ConcurrencyStrategy::NonstrictReadWrite));
        let default_query_name: Arc<str> = Arc::from(query_region.name());

        let mut names = HashSet::new();
        let mut regions = Vec::with_capacity(self.regions.len() + 1);
        for config in self.regions.iter().cloned().chain(std::iter::once(query_region)) {
            if !names.insert(config.name().to_owned()) {
                return Err(Error::configuration(format!("region {} is configured twice", config.name())));
            }

            let stats = Arc::new(RegionStats::default());
            let provider = self.provider(&config, &stats)?;
            tracing::debug!(
                cache.region = config.name(),
                cache.strategy = config.strategy().as_str(),
                "configured cache region"
            );
            regions.push(Region::new(config, provider, self.clock.clone(), stats, telemetry.clone()));
        }

        let default_entity_region = match self.default_entity_region {
            Some(name) if !names.contains(&name) => {
                return Err(Error::configuration(format!("default entity region {name} is not configured")));
            }
            name => name.map(Arc::from),
        };

        let regions = Arc::new(Regions::new(regions));
        let timestamps = Arc::new(UpdateTimestampRegistry::new());
        Ok(CacheManager {
            objects: SharedObjectCache::new(Arc::clone(&regions)),
            queries: QueryResultCache::new(Arc::clone(&regions), Arc::clone(&timestamps), default_query_name),
            regions,
            timestamps,
            default_entity_region,
        })
    }

    fn provider(&self, config: &RegionConfig, stats: &Arc<RegionStats>) -> Result<RegionProvider<S>> {
        if let Some(factory) = self.factories.get(&config.provider()) {
            return factory(config);
        }
        if config.provider() != ProviderKind::Heap {
            return Err(Error::configuration(format!(
                "region {} needs a {:?} provider but no factory is registered",
                config.name(),
                config.provider()
            )));
        }

        let mut builder = HeapProvider::<RegionKey, CachedItem<S>>::builder().name(config.name());
        match config.capacity() {
            Capacity::Unbounded => {}
            Capacity::Entries(entries) => builder = builder.max_capacity(entries),
            Capacity::Bytes(bytes) => {
                let Some(weigher) = self.weigher.clone() else {
                    return Err(Error::configuration(format!(
                        "region {} is bounded in bytes but no weigher is configured",
                        config.name()
                    )));
                };
                builder = builder
                    .max_capacity(bytes)
                    .weigher(move |_key, item: &CachedItem<S>| item.weight(&*weigher));
            }
        }
        if let Some(ttl) = config.time_to_live() {
            builder = builder.time_to_live(ttl);
        }
        if let Some(tti) = config.time_to_idle() {
            builder = builder.time_to_idle(tti);
        }

        let stats = Arc::clone(stats);
        Ok(builder
            .eviction_listener(move |_key, _cause| stats.eviction())
            .build()
            .into_dynamic())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::executor::block_on;
    use larder_provider::testing::MockProvider;

    use super::*;
    use crate::ErrorKind;
    use crate::entry::Version;
    use crate::telemetry::testing::MetricTester;

    fn builder() -> CacheManagerBuilder<String> {
        CacheManager::builder::<String>(Clock::new_frozen()).logs(false)
    }

    #[test]
    fn default_query_region_is_always_created() {
        let manager = builder().region(RegionConfig::builder("Product").build()).build().unwrap();
        assert_eq!(manager.region_names(), vec!["Product", DEFAULT_QUERY_REGION]);
        assert_eq!(manager.queries().default_region(), DEFAULT_QUERY_REGION);
        assert_eq!(
            manager.strategy(DEFAULT_QUERY_REGION).unwrap(),
            ConcurrencyStrategy::NonstrictReadWrite
        );
    }

    #[test]
    fn explicit_default_query_region() {
        let manager = builder()
            .default_query_region(RegionConfig::new("queries", ConcurrencyStrategy::ReadWrite))
            .build()
            .unwrap();
        assert_eq!(manager.region_names(), vec!["queries"]);
        assert_eq!(manager.queries().default_region(), "queries");
    }

    #[test]
    fn duplicate_regions_are_rejected() {
        let error = builder()
            .region(RegionConfig::builder("Product").build())
            .region(RegionConfig::builder("Product").build())
            .build()
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn byte_bound_needs_weigher() {
        let config = RegionConfig::builder("Note").capacity(Capacity::Bytes(1024)).build();
        let error = builder().region(config.clone()).build().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);

        let manager = builder()
            .region(config)
            .weigher(|note: &String| u32::try_from(note.len()).unwrap_or(u32::MAX))
            .build();
        assert!(manager.is_ok());
    }

    #[test]
    fn missing_provider_factory_is_rejected() {
        let config = RegionConfig::builder("Product").provider(ProviderKind::Distributed).build();
        let error = builder().region(config.clone()).build().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);

        let provider = MockProvider::new();
        let shared = provider.clone();
        let manager = builder()
            .region(config)
            .provider_factory(ProviderKind::Distributed, move |_config| Ok(shared.clone().into_dynamic()))
            .build()
            .unwrap();

        block_on(async {
            let key = CacheKey::new("Product", 1);
            manager.objects().put("Product", &key, "widget".to_owned(), Version(1)).await.unwrap();
            assert_eq!(provider.entry_count(), 1);
            assert_eq!(manager.entry_count("Product").unwrap(), Some(1));
        });
    }

    #[test]
    fn entity_regions_resolve() {
        let manager = builder()
            .region(RegionConfig::builder("Product").build())
            .region(RegionConfig::builder("Entities").build())
            .default_entity_region("Entities")
            .build()
            .unwrap();
        assert_eq!(manager.region_for(&CacheKey::new("Product", 1)), Some("Product"));
        assert_eq!(manager.region_for(&CacheKey::new("Order", 1)), Some("Entities"));

        let error = builder().default_entity_region("Entities").build().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);

        let uncached = builder().build().unwrap();
        assert_eq!(uncached.region_for(&CacheKey::new("Order", 1)), None);
    }

    #[test]
    fn statistics_per_region() {
        block_on(async {
            let manager = builder()
                .region(RegionConfig::builder("Product").build())
                .region(RegionConfig::builder("Order").build())
                .build()
                .unwrap();
            let key = CacheKey::new("Product", 1);
            manager.objects().put("Product", &key, "widget".to_owned(), Version(1)).await.unwrap();
            manager.objects().get("Product", &key).await.unwrap();
            manager.objects().get("Order", &CacheKey::new("Order", 1)).await.unwrap();

            let all = manager.all_statistics();
            assert_eq!(all["Product"].hits, 1);
            assert_eq!(all["Product"].puts, 1);
            assert_eq!(all["Order"].misses, 1);
            // moka counts entries during housekeeping, so only presence is certain.
            assert!(manager.entry_count("Product").unwrap().is_some());
            assert_eq!(manager.statistics("missing").unwrap_err().kind(), ErrorKind::UnknownRegion);
        });
    }

    #[test]
    fn metrics_are_exported() {
        block_on(async {
            let tester = MetricTester::new();
            let manager = builder()
                .region(RegionConfig::builder("Product").lock_timeout(Duration::from_secs(1)).build())
                .metrics(tester.meter_provider())
                .build()
                .unwrap();
            let key = CacheKey::new("Product", 1);
            manager.objects().get("Product", &key).await.unwrap();

            tester.assert_attributes_contain(&[
                opentelemetry::KeyValue::new(crate::telemetry::attributes::CACHE_REGION, "Product"),
                opentelemetry::KeyValue::new(crate::telemetry::attributes::CACHE_ACTIVITY, "cache.miss"),
            ]);
        });
    }
}
