// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Two-phase participation in externally coordinated transactions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::Result;

/// Identifies one transaction driven by an external coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(u64);

static NEXT_TRANSACTION: AtomicU64 = AtomicU64::new(1);

impl TransactionId {
    /// Allocates an identifier unique within this process.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_TRANSACTION.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw identifier, for correlating with the coordinator's own ids.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for TransactionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// A resource enlisted in a two-phase commit.
///
/// The coordinator calls [`prepare`](Self::prepare) and then exactly one of
/// [`commit`](Self::commit) or [`rollback`](Self::rollback), once each, in
/// lockstep with the durable store. Committing without a successful prepare
/// fails with [`ErrorKind::InvalidOperation`](crate::ErrorKind::InvalidOperation).
pub trait TransactionParticipant: Send + Sync {
    /// Validates everything staged under `tx`. A failure means the
    /// coordinator must roll back.
    fn prepare(&self, tx: TransactionId) -> impl Future<Output = Result<()>> + Send;

    /// Makes everything staged under `tx` visible.
    fn commit(&self, tx: TransactionId) -> impl Future<Output = Result<()>> + Send;

    /// Discards everything staged under `tx`.
    fn rollback(&self, tx: TransactionId) -> impl Future<Output = Result<()>> + Send;
}
