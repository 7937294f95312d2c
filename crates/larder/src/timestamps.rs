// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-region write timestamps for query invalidation.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// A logical point in time.
///
/// Logical timestamps order events without relying on wall clocks, so
/// processes with skewed clocks still agree on which write came first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Timestamp(pub u64);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// A Lamport clock.
///
/// [`tick`](Self::tick) hands out strictly increasing timestamps.
/// [`observe`](Self::observe) folds in a timestamp seen elsewhere, for example
/// in a registry shared with another process, so later ticks order after it.
#[derive(Debug, Default)]
pub struct LogicalClock {
    counter: AtomicU64,
}

impl LogicalClock {
    /// Creates a clock starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the clock and returns the new time.
    pub fn tick(&self) -> Timestamp {
        Timestamp(self.counter.fetch_add(1, Ordering::AcqRel).saturating_add(1))
    }

    /// Moves the clock forward to at least `remote`.
    pub fn observe(&self, remote: Timestamp) {
        self.counter.fetch_max(remote.0, Ordering::AcqRel);
    }

    /// The most recent time handed out or observed.
    #[must_use]
    pub fn current(&self) -> Timestamp {
        Timestamp(self.counter.load(Ordering::Acquire))
    }
}

/// Tracks the time of the most recent committed write per region.
///
/// Updates are an atomic max per region, so concurrent writers never move a
/// region's timestamp backwards. Reads take no lock beyond the map shard.
///
/// ```
/// use larder::{Timestamp, UpdateTimestampRegistry};
///
/// let registry = UpdateTimestampRegistry::new();
/// assert_eq!(registry.last_write("Product"), Timestamp(0));
///
/// registry.record_write("Product", Timestamp(150));
/// registry.record_write("Product", Timestamp(120));
/// assert_eq!(registry.last_write("Product"), Timestamp(150));
/// assert!(registry.next_timestamp() > Timestamp(150));
/// ```
#[derive(Debug, Default)]
pub struct UpdateTimestampRegistry {
    clock: LogicalClock,
    regions: DashMap<Arc<str>, AtomicU64>,
}

impl UpdateTimestampRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a committed write to `region` at time `at`.
    ///
    /// Call this once per committed write, after the durable store has made
    /// the write durable.
    pub fn record_write(&self, region: &str, at: Timestamp) {
        self.clock.observe(at);
        if let Some(last) = self.regions.get(region) {
            last.fetch_max(at.0, Ordering::AcqRel);
            return;
        }
        self.regions
            .entry(Arc::from(region))
            .or_default()
            .fetch_max(at.0, Ordering::AcqRel);
    }

    /// Records a committed write to `region` at the next logical time.
    pub fn record_write_now(&self, region: &str) -> Timestamp {
        let at = self.clock.tick();
        self.record_write(region, at);
        at
    }

    /// The time of the last write to `region`; zero if it was never written.
    #[must_use]
    pub fn last_write(&self, region: &str) -> Timestamp {
        self.regions
            .get(region)
            .map_or(Timestamp::default(), |last| Timestamp(last.load(Ordering::Acquire)))
    }

    /// A fresh timestamp for a query that is about to run.
    pub fn next_timestamp(&self) -> Timestamp {
        self.clock.tick()
    }

    /// The registry's logical clock.
    #[must_use]
    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }
}
