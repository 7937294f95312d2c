// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The shared object cache and its concurrency strategies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::config::ConcurrencyStrategy;
use crate::entry::{CacheEntry, CachedItem, CachedObject, LockState, LockToken, PutOutcome, Version};
use crate::error::Error;
use crate::key::{CacheKey, RegionKey};
use crate::region::{Region, Regions};
use crate::telemetry::{CacheActivity, CacheOperation};
use crate::transaction::{TransactionId, TransactionParticipant};
use crate::{ErrorKind, Result};

const LOCK_RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// How the durable-store write guarded by a soft lock ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockOutcome<S> {
    /// The store committed `snapshot` as `version`.
    Success {
        /// The committed state.
        snapshot: S,
        /// The version the store assigned.
        version: Version,
    },
    /// The store write failed or was rolled back.
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    Active,
    Prepared,
}

#[derive(Debug)]
struct StagedWrite<S> {
    region: Arc<str>,
    key: CacheKey,
    snapshot: S,
    version: Version,
}

#[derive(Debug)]
struct Transaction<S> {
    state: TransactionState,
    writes: Vec<StagedWrite<S>>,
}

impl<S> Default for Transaction<S> {
    fn default() -> Self {
        Self {
            state: TransactionState::Active,
            writes: Vec::new(),
        }
    }
}

/// Versioned object snapshots shared by every unit of work.
///
/// Each region enforces its [`ConcurrencyStrategy`]:
///
/// - **Read-only** regions accept the first `put` for a key and reject any
///   later one with [`ErrorKind::ImmutableCacheViolation`].
/// - **Read-write** regions require writers to [`soft_lock`](Self::soft_lock)
///   the key before writing to the store. Readers miss while the lock is held.
///   [`soft_unlock`](Self::soft_unlock) installs the committed snapshot.
/// - **Nonstrict read-write** regions evict the key once the store write is
///   done; readers may see the old state until then.
/// - **Transactional** regions [`stage`](Self::stage) writes, which become
///   visible only when the coordinator commits.
///
/// Provider failures never surface from reads or plain puts: a failed region
/// misses and drops writes until its provider recovers.
pub struct SharedObjectCache<S> {
    regions: Arc<Regions<S>>,
    transactions: Mutex<HashMap<TransactionId, Transaction<S>>>,
}

impl<S> std::fmt::Debug for SharedObjectCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedObjectCache")
            .field("regions", &self.regions)
            .field("open_transactions", &self.transactions.lock().len())
            .finish()
    }
}

fn object_key(key: &CacheKey) -> RegionKey {
    RegionKey::Object(key.clone())
}

/// Whether `lock_state` is a soft lock younger than `lock_timeout`.
fn is_live_lock(lock_state: &LockState, now: SystemTime, lock_timeout: Duration) -> bool {
    match lock_state {
        LockState::SoftLocked { locked_at, .. } => !now
            .duration_since(*locked_at)
            .is_ok_and(|held| held >= lock_timeout),
        LockState::Unlocked => false,
    }
}

impl<S> SharedObjectCache<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(regions: Arc<Regions<S>>) -> Self {
        Self {
            regions,
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// The strategy of `region`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::UnknownRegion`] if no such region is configured.
    pub fn strategy(&self, region: &str) -> Result<ConcurrencyStrategy> {
        Ok(self.regions.get(region)?.config().strategy())
    }

    /// Looks up the cached snapshot of `key`.
    ///
    /// Only unlocked, unexpired entries hit. A key soft-locked by a writer
    /// misses so the caller reads the durable store instead.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::UnknownRegion`] if no such region is configured.
    pub async fn get(&self, region: &str, key: &CacheKey) -> Result<Option<CachedObject<S>>> {
        let region = self.regions.get(region)?;
        let hit = match region.read(&object_key(key), CacheOperation::Get).await {
            Some(CachedItem::Object(CacheEntry {
                snapshot: Some(snapshot),
                version,
                lock_state: LockState::Unlocked,
                ..
            })) => Some(CachedObject { snapshot, version }),
            _ => None,
        };

        if hit.is_some() {
            region.stats().hit();
            region.record(CacheOperation::Get, CacheActivity::Hit);
        } else {
            region.stats().miss();
            region.record(CacheOperation::Get, CacheActivity::Miss);
        }
        Ok(hit)
    }

    /// Caches `snapshot` as `version` of `key`.
    ///
    /// A newer version replaces the cached one, the same version is ignored,
    /// and a key soft-locked by a live writer is left alone. In read-only
    /// regions only the first put for a key succeeds.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::ImmutableCacheViolation`] when a read-only region already holds `key`.
    /// - [`ErrorKind::OptimisticConflict`] when `version` is older than the cached version.
    /// - [`ErrorKind::UnknownRegion`] if no such region is configured.
    pub async fn put(&self, region: &str, key: &CacheKey, snapshot: S, version: Version) -> Result<PutOutcome> {
        let region = self.regions.get(region)?;
        let region_key = object_key(key);
        let _guard = region.lock_key(&region_key).await;
        let now = region.clock().system_time();

        let current = match region.read(&region_key, CacheOperation::Put).await {
            Some(CachedItem::Object(entry)) => Some(entry),
            _ => None,
        };

        let outcome = match current {
            None => PutOutcome::Inserted,
            Some(_) if region.config().strategy() == ConcurrencyStrategy::ReadOnly => {
                return Err(Error::immutable(region.name(), key));
            }
            Some(entry) => {
                if is_live_lock(&entry.lock_state, now, region.config().lock_timeout()) {
                    region.record(CacheOperation::Put, CacheActivity::Ignored);
                    return Ok(PutOutcome::Ignored);
                }
                let was_locked = matches!(entry.lock_state, LockState::SoftLocked { .. });
                if was_locked || version > entry.version {
                    PutOutcome::Replaced
                } else if version == entry.version {
                    region.record(CacheOperation::Put, CacheActivity::Ignored);
                    return Ok(PutOutcome::Ignored);
                } else {
                    return Err(Error::optimistic_conflict(format!(
                        "{key} is cached at {} and cannot move back to {version}",
                        entry.version
                    )));
                }
            }
        };

        let entry = CacheEntry::readable(key.clone(), snapshot, version, now);
        if !region.write(&region_key, CachedItem::Object(entry), CacheOperation::Put).await {
            return Ok(PutOutcome::Dropped);
        }

        let activity = if outcome == PutOutcome::Inserted {
            CacheActivity::Inserted
        } else {
            CacheActivity::Replaced
        };
        region.record(CacheOperation::Put, activity);
        Ok(outcome)
    }

    /// Takes the soft lock on `key` before its durable-store write.
    ///
    /// Fails fast if another writer holds a live lock; see
    /// [`soft_lock_within`](Self::soft_lock_within) for the waiting variant.
    /// Locks older than the region's lock timeout are taken over. Nonstrict
    /// regions hand out a token without locking anything.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::LockContention`] while another writer holds the lock.
    /// - [`ErrorKind::ProviderUnavailable`] if the lock could not be recorded;
    ///   the caller must then bypass the cache for this key.
    /// - [`ErrorKind::ImmutableCacheViolation`] for read-only regions.
    /// - [`ErrorKind::InvalidOperation`] for transactional regions.
    /// - [`ErrorKind::UnknownRegion`] if no such region is configured.
    pub async fn soft_lock(&self, region: &str, key: &CacheKey) -> Result<LockToken> {
        let region = self.regions.get(region)?;
        match region.config().strategy() {
            ConcurrencyStrategy::ReadOnly => Err(Error::immutable(region.name(), key)),
            ConcurrencyStrategy::Transactional => Err(Error::invalid_operation(format!(
                "region {} is transactional; stage writes instead of soft-locking",
                region.name()
            ))),
            ConcurrencyStrategy::NonstrictReadWrite => Ok(LockToken::next()),
            ConcurrencyStrategy::ReadWrite => Self::lock_entry(region, key).await,
        }
    }

    /// Like [`soft_lock`](Self::soft_lock), but retries on contention until
    /// `timeout` has passed.
    ///
    /// # Errors
    ///
    /// As [`soft_lock`](Self::soft_lock); contention is reported only once
    /// `timeout` has elapsed.
    pub async fn soft_lock_within(&self, region: &str, key: &CacheKey, timeout: Duration) -> Result<LockToken> {
        let clock = self.regions.get(region)?.clock().clone();
        let stopwatch = clock.stopwatch();
        loop {
            match self.soft_lock(region, key).await {
                Err(error) if error.kind() == ErrorKind::LockContention && stopwatch.elapsed() < timeout => {
                    clock.delay(LOCK_RETRY_BACKOFF.min(timeout.saturating_sub(stopwatch.elapsed()))).await;
                }
                result => return result,
            }
        }
    }

    async fn lock_entry(region: &Region<S>, key: &CacheKey) -> Result<LockToken> {
        let region_key = object_key(key);
        let _guard = region.lock_key(&region_key).await;
        let now = region.clock().system_time();
        let lock_timeout = region.config().lock_timeout();

        let expected = match region.read(&region_key, CacheOperation::SoftLock).await {
            Some(CachedItem::Object(entry)) => match &entry.lock_state {
                LockState::Unlocked => Some(entry.version),
                LockState::SoftLocked { expected, .. } => {
                    if is_live_lock(&entry.lock_state, now, lock_timeout) {
                        region.stats().contention();
                        region.record(CacheOperation::SoftLock, CacheActivity::Contended);
                        return Err(Error::lock_contention(key));
                    }
                    *expected
                }
            },
            _ => None,
        };

        let token = LockToken::next();
        let locked = CacheEntry::locked(key.clone(), token, expected, now);
        if !region.write(&region_key, CachedItem::Object(locked), CacheOperation::SoftLock).await {
            return Err(Error::provider_unavailable(region.name(), format!("could not record soft lock on {key}")));
        }
        region.record(CacheOperation::SoftLock, CacheActivity::Locked);
        Ok(token)
    }

    /// Releases the soft lock on `key` once its durable-store write finished.
    ///
    /// In read-write regions a successful write installs the new snapshot if
    /// `token` still owns the lock; a failed write leaves the key evicted. If
    /// the lock was lost in the meantime (it expired and another writer took
    /// it, or it was evicted) nothing is installed. Nonstrict regions evict the
    /// key whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::OptimisticConflict`] if the committed version does not
    ///   follow the version cached when the lock was taken. The key is left
    ///   evicted.
    /// - [`ErrorKind::ImmutableCacheViolation`] for read-only regions.
    /// - [`ErrorKind::InvalidOperation`] for transactional regions.
    /// - [`ErrorKind::UnknownRegion`] if no such region is configured.
    pub async fn soft_unlock(&self, region: &str, key: &CacheKey, token: LockToken, outcome: UnlockOutcome<S>) -> Result<()> {
        let region = self.regions.get(region)?;
        match region.config().strategy() {
            ConcurrencyStrategy::ReadOnly => Err(Error::immutable(region.name(), key)),
            ConcurrencyStrategy::Transactional => Err(Error::invalid_operation(format!(
                "region {} is transactional; commit through the coordinator",
                region.name()
            ))),
            ConcurrencyStrategy::NonstrictReadWrite => {
                Self::evict_from(region, key, CacheOperation::SoftUnlock).await;
                Ok(())
            }
            ConcurrencyStrategy::ReadWrite => Self::unlock_entry(region, key, token, outcome).await,
        }
    }

    async fn unlock_entry(region: &Region<S>, key: &CacheKey, token: LockToken, outcome: UnlockOutcome<S>) -> Result<()> {
        let region_key = object_key(key);
        let _guard = region.lock_key(&region_key).await;
        let now = region.clock().system_time();

        let current = match region.read(&region_key, CacheOperation::SoftUnlock).await {
            Some(CachedItem::Object(entry)) => Some(entry),
            _ => None,
        };

        let expected = match current.as_ref().map(|entry| &entry.lock_state) {
            Some(LockState::SoftLocked { token: holder, expected, .. }) if *holder == token => *expected,
            Some(lock_state @ LockState::SoftLocked { .. }) if is_live_lock(lock_state, now, region.config().lock_timeout()) => {
                tracing::warn!(cache.region = region.name(), cache.key = %key, "soft lock was taken over; leaving the new holder's lock in place");
                return Ok(());
            }
            Some(_) => {
                tracing::warn!(cache.region = region.name(), cache.key = %key, "soft lock was lost; evicting the key");
                region.remove(&region_key, CacheOperation::SoftUnlock).await;
                return Ok(());
            }
            None => {
                tracing::warn!(cache.region = region.name(), cache.key = %key, "soft lock was lost; nothing to install");
                return Ok(());
            }
        };

        match outcome {
            UnlockOutcome::Success { snapshot, version } => {
                if expected.is_some_and(|expected| version <= expected) {
                    region.remove(&region_key, CacheOperation::SoftUnlock).await;
                    region.record(CacheOperation::SoftUnlock, CacheActivity::Evicted);
                    return Err(Error::optimistic_conflict(format!(
                        "{key} was locked at {} but committed as {version}",
                        expected.unwrap_or_default()
                    )));
                }
                let entry = CacheEntry::readable(key.clone(), snapshot, version, now);
                let activity = if region.write(&region_key, CachedItem::Object(entry), CacheOperation::SoftUnlock).await {
                    CacheActivity::Unlocked
                } else {
                    CacheActivity::Ignored
                };
                region.record(CacheOperation::SoftUnlock, activity);
            }
            UnlockOutcome::Failure => {
                region.remove(&region_key, CacheOperation::SoftUnlock).await;
                region.record(CacheOperation::SoftUnlock, CacheActivity::Evicted);
            }
        }
        Ok(())
    }

    /// Removes `key` from `region`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::UnknownRegion`] if no such region is configured.
    pub async fn evict(&self, region: &str, key: &CacheKey) -> Result<()> {
        let region = self.regions.get(region)?;
        Self::evict_from(region, key, CacheOperation::Evict).await;
        Ok(())
    }

    /// Removes every entry of `region`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::UnknownRegion`] if no such region is configured.
    pub async fn evict_region(&self, region: &str) -> Result<()> {
        self.regions.get(region)?.clear().await;
        Ok(())
    }

    async fn evict_from(region: &Region<S>, key: &CacheKey, operation: CacheOperation) {
        let region_key = object_key(key);
        let _guard = region.lock_key(&region_key).await;
        if region.remove(&region_key, operation).await {
            region.record(operation, CacheActivity::Evicted);
        }
    }

    /// Stages `snapshot` as `version` of `key` under transaction `tx`.
    ///
    /// Nothing is visible to readers until the transaction commits. Staging
    /// the same key twice keeps the later snapshot.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::InvalidOperation`] if the region is not transactional or
    ///   `tx` was already prepared.
    /// - [`ErrorKind::UnknownRegion`] if no such region is configured.
    pub fn stage(&self, tx: TransactionId, region: &str, key: &CacheKey, snapshot: S, version: Version) -> Result<()> {
        let region = self.regions.get(region)?;
        if region.config().strategy() != ConcurrencyStrategy::Transactional {
            return Err(Error::invalid_operation(format!("region {} is not transactional", region.name())));
        }

        let mut transactions = self.transactions.lock();
        let transaction = transactions.entry(tx).or_default();
        if transaction.state != TransactionState::Active {
            return Err(Error::invalid_operation(format!("{tx} is already prepared")));
        }

        let region_name: Arc<str> = Arc::from(region.name());
        transaction
            .writes
            .retain(|write| !(write.region == region_name && &write.key == key));
        transaction.writes.push(StagedWrite {
            region: region_name,
            key: key.clone(),
            snapshot,
            version,
        });
        drop(transactions);

        region.record(CacheOperation::Stage, CacheActivity::Inserted);
        Ok(())
    }

    /// Validates every write staged under `tx` against the cached versions.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::OptimisticConflict`] if a staged version does not follow
    ///   the cached one. The transaction stays open for rollback.
    /// - [`ErrorKind::InvalidOperation`] if `tx` was already prepared.
    pub async fn prepare(&self, tx: TransactionId) -> Result<()> {
        let staged: Vec<(Arc<str>, CacheKey, Version)> = {
            let mut transactions = self.transactions.lock();
            let transaction = transactions.entry(tx).or_default();
            if transaction.state != TransactionState::Active {
                return Err(Error::invalid_operation(format!("{tx} is already prepared")));
            }
            transaction
                .writes
                .iter()
                .map(|write| (Arc::clone(&write.region), write.key.clone(), write.version))
                .collect()
        };

        for (region_name, key, version) in staged {
            let region = self.regions.get(&region_name)?;
            if let Some(CachedItem::Object(entry)) = region.read(&object_key(&key), CacheOperation::Prepare).await
                && entry.version >= version
            {
                region.record(CacheOperation::Prepare, CacheActivity::Error);
                return Err(Error::optimistic_conflict(format!(
                    "{tx} stages {key} as {version} but {} is already cached",
                    entry.version
                )));
            }
        }

        let mut transactions = self.transactions.lock();
        let Some(transaction) = transactions.get_mut(&tx) else {
            return Err(Error::invalid_operation(format!("{tx} ended while preparing")));
        };
        transaction.state = TransactionState::Prepared;
        Ok(())
    }

    /// Installs every write staged under the prepared transaction `tx`.
    ///
    /// A staged write that lost a race with a newer cached version evicts
    /// the key instead of moving it backwards.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidOperation`] unless `tx` was prepared.
    pub async fn commit(&self, tx: TransactionId) -> Result<()> {
        let transaction = {
            let mut transactions = self.transactions.lock();
            match transactions.remove(&tx) {
                Some(transaction) if transaction.state == TransactionState::Prepared => transaction,
                Some(transaction) => {
                    transactions.insert(tx, transaction);
                    return Err(Error::invalid_operation(format!("{tx} must be prepared before commit")));
                }
                None => return Err(Error::invalid_operation(format!("{tx} was never prepared"))),
            }
        };

        for write in transaction.writes {
            let region = self.regions.get(&write.region)?;
            let region_key = object_key(&write.key);
            let _guard = region.lock_key(&region_key).await;

            let newer_cached = matches!(
                region.read(&region_key, CacheOperation::Commit).await,
                Some(CachedItem::Object(entry)) if entry.version >= write.version
            );
            if newer_cached {
                region.remove(&region_key, CacheOperation::Commit).await;
                region.record(CacheOperation::Commit, CacheActivity::Evicted);
                continue;
            }

            let entry = CacheEntry::readable(write.key, write.snapshot, write.version, region.clock().system_time());
            if region.write(&region_key, CachedItem::Object(entry), CacheOperation::Commit).await {
                region.record(CacheOperation::Commit, CacheActivity::Replaced);
            }
        }
        Ok(())
    }

    /// Discards every write staged under `tx`. Rolling back an unknown
    /// transaction does nothing.
    pub fn rollback(&self, tx: TransactionId) {
        let removed = self.transactions.lock().remove(&tx);
        if let Some(transaction) = removed {
            for write in &transaction.writes {
                if let Some(region) = self.regions.find(&write.region) {
                    region.record(CacheOperation::Rollback, CacheActivity::Ignored);
                }
            }
        }
    }

    /// Number of transactions with staged or prepared writes.
    #[must_use]
    pub fn open_transactions(&self) -> usize {
        self.transactions.lock().len()
    }
}

impl<S> TransactionParticipant for SharedObjectCache<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn prepare(&self, tx: TransactionId) -> Result<()> {
        Self::prepare(self, tx).await
    }

    async fn commit(&self, tx: TransactionId) -> Result<()> {
        Self::commit(self, tx).await
    }

    async fn rollback(&self, tx: TransactionId) -> Result<()> {
        Self::rollback(self, tx);
        Ok(())
    }
}
