// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Region configuration.
//!
//! A region is a named partition of the shared cache with its own
//! concurrency strategy, capacity bound, expiration and provider. Regions are
//! configured once, when the [`CacheManager`](crate::CacheManager) is built,
//! and never change afterwards.
//!
//! With the `serde` feature, [`RegionConfig`] can be read from a config file.
//! Durations are given in milliseconds:
//!
//! ```json
//! {
//!   "name": "Product",
//!   "strategy": "READ_WRITE",
//!   "capacity": { "entries": 10000 },
//!   "time_to_live_ms": 300000,
//!   "provider": "heap"
//! }
//! ```

use std::time::Duration;

/// Name of the region queries are cached in when a hint names none.
pub const DEFAULT_QUERY_REGION: &str = "larder.default-query-region";

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(250);
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_PASS_THROUGH_WINDOW: Duration = Duration::from_secs(5);

/// How a region handles concurrent reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum ConcurrencyStrategy {
    /// Entries are inserted once and never change. Overwriting one fails.
    ReadOnly,
    /// Writers soft-lock an entry while they commit; readers miss meanwhile.
    #[default]
    ReadWrite,
    /// Writers evict the entry after they commit. Readers may briefly see the
    /// old state.
    NonstrictReadWrite,
    /// Cache updates are staged and installed together with the store
    /// transaction through two-phase commit.
    Transactional,
}

impl ConcurrencyStrategy {
    /// Stable name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::ReadWrite => "read_write",
            Self::NonstrictReadWrite => "nonstrict_read_write",
            Self::Transactional => "transactional",
        }
    }
}

/// How much a region may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Capacity {
    /// No bound.
    #[default]
    Unbounded,
    /// At most this many entries.
    Entries(u64),
    /// At most this many bytes, as reported by the manager's weigher.
    Bytes(u64),
}

/// Where a region keeps its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ProviderKind {
    /// In process memory.
    #[default]
    Heap,
    /// On a local disk.
    Disk,
    /// In a distributed cache cluster.
    Distributed,
}

/// Settings for one region.
///
/// ```
/// use larder::{Capacity, ConcurrencyStrategy, RegionConfig};
/// use std::time::Duration;
///
/// let config = RegionConfig::builder("Product")
///     .strategy(ConcurrencyStrategy::ReadWrite)
///     .capacity(Capacity::Entries(10_000))
///     .time_to_live(Duration::from_secs(300))
///     .build();
///
/// assert_eq!(config.name(), "Product");
/// assert_eq!(config.operation_timeout(), Duration::from_millis(250));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(deny_unknown_fields))]
pub struct RegionConfig {
    name: String,
    #[cfg_attr(feature = "serde", serde(default))]
    strategy: ConcurrencyStrategy,
    #[cfg_attr(feature = "serde", serde(default))]
    capacity: Capacity,
    #[cfg_attr(feature = "serde", serde(default, rename = "time_to_live_ms", with = "millis::optional"))]
    time_to_live: Option<Duration>,
    #[cfg_attr(feature = "serde", serde(default, rename = "time_to_idle_ms", with = "millis::optional"))]
    time_to_idle: Option<Duration>,
    #[cfg_attr(feature = "serde", serde(default))]
    provider: ProviderKind,
    #[cfg_attr(
        feature = "serde",
        serde(default = "millis::operation_timeout", rename = "operation_timeout_ms", with = "millis::required")
    )]
    operation_timeout: Duration,
    #[cfg_attr(
        feature = "serde",
        serde(default = "millis::lock_timeout", rename = "lock_timeout_ms", with = "millis::required")
    )]
    lock_timeout: Duration,
    #[cfg_attr(
        feature = "serde",
        serde(default = "millis::pass_through_window", rename = "pass_through_window_ms", with = "millis::required")
    )]
    pass_through_window: Duration,
}

impl RegionConfig {
    /// Starts configuring a region named `name` with default settings.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> RegionConfigBuilder {
        RegionConfigBuilder {
            config: Self {
                name: name.into(),
                strategy: ConcurrencyStrategy::default(),
                capacity: Capacity::default(),
                time_to_live: None,
                time_to_idle: None,
                provider: ProviderKind::default(),
                operation_timeout: DEFAULT_OPERATION_TIMEOUT,
                lock_timeout: DEFAULT_LOCK_TIMEOUT,
                pass_through_window: DEFAULT_PASS_THROUGH_WINDOW,
            },
        }
    }

    /// A region with the given strategy and every other setting at its default.
    #[must_use]
    pub fn new(name: impl Into<String>, strategy: ConcurrencyStrategy) -> Self {
        Self::builder(name).strategy(strategy).build()
    }

    /// The region name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The concurrency strategy.
    #[must_use]
    pub fn strategy(&self) -> ConcurrencyStrategy {
        self.strategy
    }

    /// The capacity bound.
    #[must_use]
    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// How long an entry lives after being written.
    #[must_use]
    pub fn time_to_live(&self) -> Option<Duration> {
        self.time_to_live
    }

    /// How long an entry lives without being read or written.
    #[must_use]
    pub fn time_to_idle(&self) -> Option<Duration> {
        self.time_to_idle
    }

    /// Where entries are kept.
    #[must_use]
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// The bound on any single provider call.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// How long a soft lock is honored before other writers may take it over.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// How long the region bypasses its provider after a provider failure.
    #[must_use]
    pub fn pass_through_window(&self) -> Duration {
        self.pass_through_window
    }
}

/// Builder for [`RegionConfig`].
#[derive(Debug, Clone)]
pub struct RegionConfigBuilder {
    config: RegionConfig,
}

impl RegionConfigBuilder {
    /// Sets the concurrency strategy. Defaults to read-write.
    #[must_use]
    pub fn strategy(mut self, strategy: ConcurrencyStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    /// Sets the capacity bound. Defaults to unbounded.
    #[must_use]
    pub fn capacity(mut self, capacity: Capacity) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Expires entries this long after they were written.
    #[must_use]
    pub fn time_to_live(mut self, ttl: Duration) -> Self {
        self.config.time_to_live = Some(ttl);
        self
    }

    /// Expires entries this long after they were last used.
    #[must_use]
    pub fn time_to_idle(mut self, tti: Duration) -> Self {
        self.config.time_to_idle = Some(tti);
        self
    }

    /// Selects the provider. Defaults to the heap.
    #[must_use]
    pub fn provider(mut self, provider: ProviderKind) -> Self {
        self.config.provider = provider;
        self
    }

    /// Bounds each provider call. Defaults to 250 milliseconds.
    #[must_use]
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = timeout;
        self
    }

    /// Sets how long soft locks are honored. Defaults to 60 seconds.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    /// Sets how long the region bypasses a failed provider. Defaults to 5 seconds.
    #[must_use]
    pub fn pass_through_window(mut self, window: Duration) -> Self {
        self.config.pass_through_window = window;
        self
    }

    /// Finishes the configuration.
    #[must_use]
    pub fn build(self) -> RegionConfig {
        self.config
    }
}

#[cfg(feature = "serde")]
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn operation_timeout() -> Duration {
        super::DEFAULT_OPERATION_TIMEOUT
    }

    pub(super) fn lock_timeout() -> Duration {
        super::DEFAULT_LOCK_TIMEOUT
    }

    pub(super) fn pass_through_window() -> Duration {
        super::DEFAULT_PASS_THROUGH_WINDOW
    }

    pub(super) mod required {
        use super::{Deserialize, Deserializer, Duration};

        pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
            u64::deserialize(deserializer).map(Duration::from_millis)
        }
    }

    pub(super) mod optional {
        use super::{Deserialize, Deserializer, Duration};

        pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = RegionConfig::builder("Product").build();
        assert_eq!(config.strategy(), ConcurrencyStrategy::ReadWrite);
        assert_eq!(config.capacity(), Capacity::Unbounded);
        assert_eq!(config.provider(), ProviderKind::Heap);
        assert_eq!(config.time_to_live(), None);
        assert_eq!(config.time_to_idle(), None);
        assert_eq!(config.operation_timeout(), Duration::from_millis(250));
        assert_eq!(config.lock_timeout(), Duration::from_secs(60));
        assert_eq!(config.pass_through_window(), Duration::from_secs(5));
    }

    #[test]
    fn builder_overrides() {
        let config = RegionConfig::builder("Log")
            .strategy(ConcurrencyStrategy::NonstrictReadWrite)
            .capacity(Capacity::Bytes(1 << 20))
            .time_to_live(Duration::from_secs(10))
            .time_to_idle(Duration::from_secs(5))
            .provider(ProviderKind::Distributed)
            .operation_timeout(Duration::from_millis(50))
            .lock_timeout(Duration::from_secs(1))
            .pass_through_window(Duration::from_secs(30))
            .build();

        assert_eq!(config.strategy(), ConcurrencyStrategy::NonstrictReadWrite);
        assert_eq!(config.capacity(), Capacity::Bytes(1 << 20));
        assert_eq!(config.time_to_live(), Some(Duration::from_secs(10)));
        assert_eq!(config.time_to_idle(), Some(Duration::from_secs(5)));
        assert_eq!(config.provider(), ProviderKind::Distributed);
        assert_eq!(config.operation_timeout(), Duration::from_millis(50));
        assert_eq!(config.lock_timeout(), Duration::from_secs(1));
        assert_eq!(config.pass_through_window(), Duration::from_secs(30));
    }

    #[test]
    fn strategy_names() {
        assert_eq!(ConcurrencyStrategy::ReadOnly.as_str(), "read_only");
        assert_eq!(ConcurrencyStrategy::Transactional.as_str(), "transactional");
        assert_eq!(RegionConfig::new("x", ConcurrencyStrategy::ReadOnly).strategy(), ConcurrencyStrategy::ReadOnly);
    }
}
