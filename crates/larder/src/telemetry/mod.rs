// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured logs and optional OpenTelemetry metrics for cache regions.
//!
//! Every region reports what it did as an (operation, activity) pair. Logs go
//! through `tracing` with stable field names; metrics are exported when the
//! `metrics` feature is enabled and a meter provider is configured. Neither
//! affects the always-on [`RegionStatistics`](crate::RegionStatistics).

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

pub(crate) mod attributes;
#[cfg(any(feature = "metrics", test))]
pub(crate) mod metrics;
#[cfg(test)]
pub(crate) mod testing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheOperation {
    Get,
    Put,
    Evict,
    Clear,
    SoftLock,
    SoftUnlock,
    Stage,
    Prepare,
    Commit,
    Rollback,
    QueryGet,
    QueryPut,
}

impl CacheOperation {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Get => "cache.get",
            Self::Put => "cache.put",
            Self::Evict => "cache.evict",
            Self::Clear => "cache.clear",
            Self::SoftLock => "cache.soft_lock",
            Self::SoftUnlock => "cache.soft_unlock",
            Self::Stage => "cache.stage",
            Self::Prepare => "cache.prepare",
            Self::Commit => "cache.commit",
            Self::Rollback => "cache.rollback",
            Self::QueryGet => "cache.query_get",
            Self::QueryPut => "cache.query_put",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheActivity {
    Hit,
    Miss,
    Expired,
    Inserted,
    Replaced,
    Ignored,
    Evicted,
    Locked,
    Contended,
    Unlocked,
    Stale,
    PassThrough,
    Recovered,
    Error,
}

impl CacheActivity {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "cache.hit",
            Self::Miss => "cache.miss",
            Self::Expired => "cache.expired",
            Self::Inserted => "cache.inserted",
            Self::Replaced => "cache.replaced",
            Self::Ignored => "cache.ignored",
            Self::Evicted => "cache.evicted",
            Self::Locked => "cache.locked",
            Self::Contended => "cache.contended",
            Self::Unlocked => "cache.unlocked",
            Self::Stale => "cache.stale",
            Self::PassThrough => "cache.pass_through",
            Self::Recovered => "cache.recovered",
            Self::Error => "cache.error",
        }
    }

    pub(crate) fn severity(self) -> Severity {
        match self {
            Self::Hit | Self::Miss | Self::Ignored | Self::Locked | Self::Unlocked | Self::Inserted | Self::Replaced => {
                Severity::Debug
            }
            Self::Expired | Self::Evicted | Self::Stale | Self::Recovered => Severity::Info,
            Self::Contended | Self::PassThrough => Severity::Warn,
            Self::Error => Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// Where region events go.
#[derive(Clone, Debug, Default)]
pub(crate) struct Telemetry {
    inner: Arc<TelemetryInner>,
}

#[derive(Debug, Default)]
struct TelemetryInner {
    logging_enabled: bool,
    #[cfg(any(feature = "metrics", test))]
    instruments: Option<metrics::Instruments>,
}

impl Telemetry {
    pub(crate) fn new(logging_enabled: bool) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                logging_enabled,
                #[cfg(any(feature = "metrics", test))]
                instruments: None,
            }),
        }
    }

    #[cfg(any(feature = "metrics", test))]
    pub(crate) fn with_meter(logging_enabled: bool, meter: &opentelemetry::metrics::Meter) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                logging_enabled,
                instruments: Some(metrics::Instruments::new(meter)),
            }),
        }
    }

    pub(crate) fn record(&self, region: &str, operation: CacheOperation, activity: CacheActivity, duration: Option<Duration>) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(instruments) = &self.inner.instruments {
            instruments.record(region, operation, activity, duration);
        }

        if self.inner.logging_enabled {
            emit(region, operation, activity, duration, None);
        }
    }

    /// Records a failed provider call along with its cause.
    pub(crate) fn record_failure(&self, region: &str, operation: CacheOperation, duration: Option<Duration>, cause: &dyn Display) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(instruments) = &self.inner.instruments {
            instruments.record(region, operation, CacheActivity::Error, duration);
        }

        if self.inner.logging_enabled {
            emit(region, operation, CacheActivity::Error, duration, Some(cause));
        }
    }

    pub(crate) fn record_size(&self, region: &str, size: u64) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(instruments) = &self.inner.instruments {
            instruments.record_size(region, size);
        }
        #[cfg(not(any(feature = "metrics", test)))]
        let _ = (region, size);
    }
}

fn emit(region: &str, operation: CacheOperation, activity: CacheActivity, duration: Option<Duration>, cause: Option<&dyn Display>) {
    let op = operation.as_str();
    let act = activity.as_str();
    let duration_ns = duration.map(|d| d.as_nanos());
    let cause = cause.map(tracing::field::display);

    // Field names must match attributes.rs.
    macro_rules! emit_event {
        ($level:ident) => {
            tracing::$level!(
                cache.region = region,
                cache.operation = op,
                cache.activity = act,
                cache.duration_ns = ?duration_ns,
                cache.cause = cause,
                "cache.event"
            )
        };
    }

    match activity.severity() {
        Severity::Debug => emit_event!(debug),
        Severity::Info => emit_event!(info),
        Severity::Warn => emit_event!(warn),
        Severity::Error => emit_event!(error),
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry::KeyValue;

    use super::testing::{LogCapture, MetricTester};
    use super::*;

    #[test]
    fn operation_and_activity_names() {
        assert_eq!(CacheOperation::SoftLock.as_str(), "cache.soft_lock");
        assert_eq!(CacheOperation::QueryGet.as_str(), "cache.query_get");
        assert_eq!(CacheActivity::PassThrough.as_str(), "cache.pass_through");
        assert_eq!(CacheActivity::Stale.as_str(), "cache.stale");
    }

    #[test]
    fn severities() {
        assert_eq!(CacheActivity::Hit.severity(), Severity::Debug);
        assert_eq!(CacheActivity::Miss.severity(), Severity::Debug);
        assert_eq!(CacheActivity::Evicted.severity(), Severity::Info);
        assert_eq!(CacheActivity::Stale.severity(), Severity::Info);
        assert_eq!(CacheActivity::Contended.severity(), Severity::Warn);
        assert_eq!(CacheActivity::PassThrough.severity(), Severity::Warn);
        assert_eq!(CacheActivity::Error.severity(), Severity::Error);
    }

    #[test]
    fn logs_carry_all_fields() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        emit(
            "Product",
            CacheOperation::Get,
            CacheActivity::Error,
            Some(Duration::from_nanos(4242)),
            Some(&"connection refused" as &dyn Display),
        );

        capture.assert_contains(attributes::CACHE_REGION);
        capture.assert_contains(attributes::CACHE_OPERATION);
        capture.assert_contains(attributes::CACHE_ACTIVITY);
        capture.assert_contains(attributes::CACHE_DURATION);
        capture.assert_contains(attributes::CACHE_EVENT);
        capture.assert_contains("Product");
        capture.assert_contains("connection refused");
        capture.assert_contains("4242");
        capture.assert_contains("ERROR");
    }

    #[test]
    fn log_level_follows_severity() {
        for (activity, level) in [
            (CacheActivity::Hit, "DEBUG"),
            (CacheActivity::Evicted, "INFO"),
            (CacheActivity::Contended, "WARN"),
            (CacheActivity::Error, "ERROR"),
        ] {
            let capture = LogCapture::new();
            let _guard = tracing::subscriber::set_default(capture.subscriber());
            emit("r", CacheOperation::Get, activity, None, None);
            capture.assert_contains(level);
        }
    }

    #[test]
    fn disabled_logging_is_silent() {
        let telemetry = Telemetry::new(false);
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        telemetry.record("r", CacheOperation::Get, CacheActivity::Hit, Some(Duration::from_secs(1)));
        telemetry.record_failure("r", CacheOperation::Put, None, &"boom");

        assert!(capture.output().is_empty());
    }

    #[test]
    fn metrics_carry_region_operation_and_activity() {
        let tester = MetricTester::new();
        let meter = metrics::create_meter(tester.meter_provider());
        let telemetry = Telemetry::with_meter(false, &meter);

        telemetry.record("Product", CacheOperation::Put, CacheActivity::Inserted, Some(Duration::from_millis(1)));
        telemetry.record_size("Product", 3);

        tester.assert_attributes_contain(&[
            KeyValue::new(attributes::CACHE_REGION, "Product"),
            KeyValue::new(attributes::CACHE_OPERATION, CacheOperation::Put.as_str()),
            KeyValue::new(attributes::CACHE_ACTIVITY, CacheActivity::Inserted.as_str()),
        ]);
    }
}
