// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache errors.

use std::fmt;

use recoverable::{Recovery, RecoveryInfo};

/// The category of a cache failure.
///
/// Identity and write-path kinds reach the caller because they point at a
/// program or data error. Provider failures normally never do: regions turn
/// them into misses and dropped writes. [`ErrorKind::ProviderUnavailable`]
/// only surfaces from operations that cannot degrade, such as a soft lock
/// that could not be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Two different objects were registered under one key in one unit of work.
    IdentityConflict,
    /// A write hit an existing entry in a read-only region.
    ImmutableCacheViolation,
    /// The version being written does not follow the version already committed.
    OptimisticConflict,
    /// The soft lock on a key is held by another writer.
    LockContention,
    /// The region's provider could not be reached.
    ProviderUnavailable,
    /// No region with the requested name is configured.
    UnknownRegion,
    /// The operation does not apply to the region's strategy or transaction state.
    InvalidOperation,
    /// The cache configuration is inconsistent.
    Configuration,
    /// The durable store failed.
    Store,
}

impl ErrorKind {
    /// Returns a stable lowercase name for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IdentityConflict => "identity_conflict",
            Self::ImmutableCacheViolation => "immutable_cache_violation",
            Self::OptimisticConflict => "optimistic_conflict",
            Self::LockContention => "lock_contention",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::UnknownRegion => "unknown_region",
            Self::InvalidOperation => "invalid_operation",
            Self::Configuration => "configuration",
            Self::Store => "store",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from a cache or unit-of-work operation.
///
/// Inspect [`Error::kind`] to branch on the failure, or use
/// [`Recovery::recovery`] to decide whether retrying can help.
///
/// ```
/// use larder::{Error, ErrorKind};
/// use recoverable::{Recovery, RecoveryKind};
///
/// let error = Error::lock_contention("Product#1");
/// assert_eq!(error.kind(), ErrorKind::LockContention);
/// assert_eq!(error.recovery().kind(), RecoveryKind::Retry);
/// ```
#[ohno::error]
#[display("cache error ({kind}): {detail}")]
pub struct Error {
    kind: ErrorKind,
    detail: String,
}

impl Error {
    /// The category of this failure.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// A different object is already registered under the key.
    pub fn identity_conflict(key: impl fmt::Display) -> Self {
        Self::new(ErrorKind::IdentityConflict, format!("another instance is already registered for {key}"))
    }

    /// A read-only region refused to overwrite the key.
    pub fn immutable(region: &str, key: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::ImmutableCacheViolation,
            format!("region {region} is read-only and already holds {key}"),
        )
    }

    /// The written version does not follow the current one.
    pub fn optimistic_conflict(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::OptimisticConflict, detail)
    }

    /// The soft lock on the key is held by someone else.
    pub fn lock_contention(key: impl fmt::Display) -> Self {
        Self::new(ErrorKind::LockContention, format!("{key} is soft-locked by another writer"))
    }

    /// The provider failed or timed out.
    pub fn provider_unavailable(region: &str, cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::ProviderUnavailable, format!("provider of region {region} is unavailable"), cause)
    }

    /// No region carries this name.
    pub fn unknown_region(region: &str) -> Self {
        Self::new(ErrorKind::UnknownRegion, format!("no region named {region}"))
    }

    /// The call does not fit the region strategy or transaction state.
    pub fn invalid_operation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidOperation, detail)
    }

    /// The configuration is inconsistent.
    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, detail)
    }

    /// The durable store failed.
    pub fn store(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Store, "durable store operation failed", cause)
    }
}

impl Recovery for Error {
    fn recovery(&self) -> RecoveryInfo {
        match self.kind {
            ErrorKind::OptimisticConflict | ErrorKind::LockContention => RecoveryInfo::retry(),
            ErrorKind::ProviderUnavailable => RecoveryInfo::unavailable(),
            ErrorKind::Store => RecoveryInfo::unknown(),
            ErrorKind::IdentityConflict
            | ErrorKind::ImmutableCacheViolation
            | ErrorKind::UnknownRegion
            | ErrorKind::InvalidOperation
            | ErrorKind::Configuration => RecoveryInfo::never(),
        }
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use recoverable::RecoveryKind;

    use super::*;

    #[test]
    fn display_names_kind_and_detail() {
        let error = Error::immutable("Country", "Country#FR");
        let display = error.to_string();
        assert!(display.contains("immutable_cache_violation"), "got: {display}");
        assert!(display.contains("Country#FR"), "got: {display}");
    }

    #[test]
    fn provider_unavailable_keeps_cause() {
        let error = Error::provider_unavailable("Product", "connection reset");
        assert_eq!(error.kind(), ErrorKind::ProviderUnavailable);
        assert!(format!("{error:?}").contains("connection reset"));
    }

    #[test]
    fn recovery_classification() {
        let cases = [
            (Error::optimistic_conflict("v1 < v2"), RecoveryKind::Retry),
            (Error::lock_contention("k"), RecoveryKind::Retry),
            (Error::provider_unavailable("r", "down"), RecoveryKind::Unavailable),
            (Error::store("io"), RecoveryKind::Unknown),
            (Error::identity_conflict("k"), RecoveryKind::Never),
            (Error::immutable("r", "k"), RecoveryKind::Never),
            (Error::unknown_region("r"), RecoveryKind::Never),
            (Error::invalid_operation("x"), RecoveryKind::Never),
            (Error::configuration("x"), RecoveryKind::Never),
        ];

        for (error, expected) in cases {
            assert_eq!(error.recovery().kind(), expected, "{:?}", error.kind());
        }
    }
}
