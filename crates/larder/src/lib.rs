// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A multi-tier object cache for persistence layers.
//!
//! Applications read persistent objects through three tiers before reaching
//! the durable store:
//!
//! 1. The [`IdentityMap`] of a unit of work guarantees one managed instance
//!    per key for as long as the unit of work runs.
//! 2. The [`SharedObjectCache`] holds versioned snapshots shared by every unit
//!    of work. Each [region](RegionConfig) enforces one
//!    [`ConcurrencyStrategy`] for concurrent writers.
//! 3. The [`QueryResultCache`] holds ordered identifier lists of earlier
//!    queries, validated against the [`UpdateTimestampRegistry`] so a write
//!    to a region a query depends on invalidates its cached result.
//!
//! A [`CacheManager`] owns the regions and both shared caches. A
//! [`UnitOfWork`] drives reads and writes through all three tiers on behalf
//! of one transaction against a [`DurableStore`].
//!
//! # Failure model
//!
//! The cache is an optimization. When a region's provider fails or times out,
//! the region passes through: reads miss and writes are dropped until the
//! provider recovers, and callers keep working against the store. Errors that
//! signal a program or data problem, such as an [`ErrorKind::IdentityConflict`]
//! or an [`ErrorKind::OptimisticConflict`], are returned to the caller.
//!
//! # Example
//!
//! ```
//! use larder::{CacheKey, CacheManager, ConcurrencyStrategy, RegionConfig, UnlockOutcome, Version};
//! use tick::Clock;
//!
//! # futures::executor::block_on(async {
//! let manager = CacheManager::builder::<u32>(Clock::new_frozen())
//!     .region(RegionConfig::new("Product", ConcurrencyStrategy::ReadWrite))
//!     .build()?;
//! let objects = manager.objects();
//! let key = CacheKey::new("Product", 1);
//!
//! objects.put("Product", &key, 10, Version(0)).await?;
//!
//! // A writer locks the key while it commits to the store; readers miss.
//! let token = objects.soft_lock("Product", &key).await?;
//! assert!(objects.get("Product", &key).await?.is_none());
//!
//! let outcome = UnlockOutcome::Success { snapshot: 12, version: Version(1) };
//! objects.soft_unlock("Product", &key, token, outcome).await?;
//! assert_eq!(objects.get("Product", &key).await?.unwrap().snapshot, 12);
//! # Ok::<(), larder::Error>(())
//! # }).unwrap();
//! ```
//!
//! # Features
//!
//! - `metrics`: exports OpenTelemetry metrics through
//!   `CacheManagerBuilder::metrics`.
//! - `serde`: makes [`RegionConfig`] deserializable.
//! - `test-util`: enables the failure-injecting `MockProvider` and frozen clocks.

pub mod config;
pub mod entry;
pub mod error;
pub mod identity;
pub mod key;
pub mod manager;
pub mod object_cache;
pub mod query_cache;
mod region;
pub mod stats;
mod telemetry;
pub mod timestamps;
pub mod transaction;
pub mod unit_of_work;

#[doc(inline)]
pub use config::{Capacity, ConcurrencyStrategy, DEFAULT_QUERY_REGION, ProviderKind, RegionConfig, RegionConfigBuilder};
#[doc(inline)]
pub use entry::{CacheEntry, CachedItem, CachedObject, LockState, LockToken, PutOutcome, QueryCacheEntry, Version};
#[doc(inline)]
pub use error::{Error, ErrorKind, Result};
#[doc(inline)]
pub use identity::{IdentityMap, Managed};
#[doc(inline)]
pub use key::{CacheKey, Identifier, QueryCacheKey, QueryParam, RegionKey};
#[doc(inline)]
pub use larder_provider::{CacheProvider, DynamicProvider, DynamicProviderExt};
#[doc(inline)]
pub use manager::{CacheManager, CacheManagerBuilder, RegionProvider};
#[doc(inline)]
pub use object_cache::{SharedObjectCache, UnlockOutcome};
#[doc(inline)]
pub use query_cache::{QueryHint, QueryResultCache};
#[doc(inline)]
pub use stats::RegionStatistics;
#[doc(inline)]
pub use timestamps::{LogicalClock, Timestamp, UpdateTimestampRegistry};
#[doc(inline)]
pub use transaction::{TransactionId, TransactionParticipant};
#[doc(inline)]
pub use unit_of_work::{DurableStore, UnitOfWork, Versioned};

#[cfg(any(feature = "test-util", test))]
#[doc(inline)]
pub use larder_provider::testing::{MockProvider, ProviderOp};
