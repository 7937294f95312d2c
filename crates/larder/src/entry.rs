// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Values stored in cache regions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::key::{CacheKey, QueryCacheKey};
use crate::timestamps::Timestamp;

/// The version of a persistent object as assigned by the durable store.
///
/// Versions only grow. A cache entry never moves to a lower version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Version(pub u64);

impl Version {
    /// The version that follows this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Proof of holding a soft lock.
///
/// Tokens are unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

impl LockToken {
    pub(crate) fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

/// Whether an entry is being written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    /// Readable.
    Unlocked,
    /// A writer is committing to the durable store; reads miss.
    SoftLocked {
        /// The holder's token.
        token: LockToken,
        /// When the lock was taken, for expiry.
        locked_at: SystemTime,
        /// The version cached when the lock was taken.
        expected: Option<Version>,
    },
}

/// A cached object snapshot and its bookkeeping.
///
/// A soft-locked entry holds no snapshot, so nothing can be served from it.
#[derive(Debug, Clone)]
pub struct CacheEntry<S> {
    pub(crate) key: CacheKey,
    pub(crate) snapshot: Option<S>,
    pub(crate) version: Version,
    pub(crate) lock_state: LockState,
    pub(crate) cached_at: SystemTime,
}

impl<S> CacheEntry<S> {
    pub(crate) fn readable(key: CacheKey, snapshot: S, version: Version, cached_at: SystemTime) -> Self {
        Self {
            key,
            snapshot: Some(snapshot),
            version,
            lock_state: LockState::Unlocked,
            cached_at,
        }
    }

    pub(crate) fn locked(key: CacheKey, token: LockToken, expected: Option<Version>, now: SystemTime) -> Self {
        Self {
            key,
            snapshot: None,
            version: expected.unwrap_or_default(),
            lock_state: LockState::SoftLocked {
                token,
                locked_at: now,
                expected,
            },
            cached_at: now,
        }
    }

    /// The key this entry belongs to.
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The cached state, absent while soft-locked.
    #[must_use]
    pub fn snapshot(&self) -> Option<&S> {
        self.snapshot.as_ref()
    }

    /// The version of the cached state.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// The lock state.
    #[must_use]
    pub fn lock_state(&self) -> &LockState {
        &self.lock_state
    }

    /// When the entry was written.
    #[must_use]
    pub fn cached_at(&self) -> SystemTime {
        self.cached_at
    }
}

/// A cached query result: the identifiers the query returned, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCacheEntry {
    pub(crate) key: QueryCacheKey,
    pub(crate) ids: Vec<CacheKey>,
    pub(crate) created_at: Timestamp,
    pub(crate) cached_at: SystemTime,
}

impl QueryCacheEntry {
    /// The key of the cached query.
    #[must_use]
    pub fn key(&self) -> &QueryCacheKey {
        &self.key
    }

    /// Identifiers of the result rows, in query order.
    #[must_use]
    pub fn ids(&self) -> &[CacheKey] {
        &self.ids
    }

    /// The logical time the query started.
    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }
}

/// The value type providers store: either kind of entry.
#[derive(Debug, Clone)]
pub enum CachedItem<S> {
    /// An object entry.
    Object(CacheEntry<S>),
    /// A query result entry.
    Query(QueryCacheEntry),
}

impl<S> CachedItem<S> {
    pub(crate) fn cached_at(&self) -> SystemTime {
        match self {
            Self::Object(entry) => entry.cached_at,
            Self::Query(entry) => entry.cached_at,
        }
    }

    /// Weighs an item for byte-bounded regions.
    ///
    /// Object entries weigh what `weigh_snapshot` reports for their snapshot;
    /// locked entries and query entries weigh a fixed per-key amount.
    pub(crate) fn weight(&self, weigh_snapshot: &dyn Fn(&S) -> u32) -> u32 {
        const KEY_WEIGHT: u32 = 32;
        match self {
            Self::Object(entry) => entry
                .snapshot
                .as_ref()
                .map_or(KEY_WEIGHT, |snapshot| weigh_snapshot(snapshot).saturating_add(KEY_WEIGHT)),
            Self::Query(entry) => {
                let ids = u32::try_from(entry.ids.len()).unwrap_or(u32::MAX);
                ids.saturating_add(1).saturating_mul(KEY_WEIGHT)
            }
        }
    }
}

/// A cache hit: the snapshot and the version it represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedObject<S> {
    /// The cached state.
    pub snapshot: S,
    /// Its version.
    pub version: Version,
}

/// What a shared-cache `put` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PutOutcome {
    /// The key was absent and now holds the snapshot.
    Inserted,
    /// A lower version was replaced.
    Replaced,
    /// Nothing changed: the version was already cached or a writer holds the lock.
    Ignored,
    /// The region is passing through and did not contact its provider.
    Dropped,
}
