// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Log and metric capture for telemetry tests.

use std::io::Write;
use std::sync::Arc;

use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::data::{AggregatedMetrics, Metric, MetricData, ResourceMetrics, ScopeMetrics};
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, SdkMeterProvider};
use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

/// Collects exported metrics in memory.
#[derive(Debug)]
pub(crate) struct MetricTester {
    exporter: InMemoryMetricExporter,
    provider: SdkMeterProvider,
}

impl MetricTester {
    pub(crate) fn new() -> Self {
        let exporter = InMemoryMetricExporter::default();
        Self {
            provider: SdkMeterProvider::builder().with_periodic_exporter(exporter.clone()).build(),
            exporter,
        }
    }

    pub(crate) fn meter_provider(&self) -> &SdkMeterProvider {
        &self.provider
    }

    pub(crate) fn assert_attributes_contain(&self, expected: &[KeyValue]) {
        self.provider.force_flush().expect("metrics flush failed");
        let collected: Vec<KeyValue> = self
            .exporter
            .get_finished_metrics()
            .expect("exporter holds metrics")
            .iter()
            .flat_map(ResourceMetrics::scope_metrics)
            .flat_map(ScopeMetrics::metrics)
            .flat_map(attributes_of)
            .collect();

        for attr in expected {
            assert!(collected.contains(attr), "attribute {attr:?} not found in {collected:?}");
        }
    }
}

fn attributes_of(metric: &Metric) -> Vec<KeyValue> {
    macro_rules! points {
        ($data:expr) => {
            match $data {
                MetricData::Gauge(data) => data.data_points().flat_map(|p| p.attributes().cloned()).collect(),
                MetricData::Sum(data) => data.data_points().flat_map(|p| p.attributes().cloned()).collect(),
                MetricData::Histogram(data) => data.data_points().flat_map(|p| p.attributes().cloned()).collect(),
                MetricData::ExponentialHistogram(data) => data.data_points().flat_map(|p| p.attributes().cloned()).collect(),
            }
        };
    }

    match metric.data() {
        AggregatedMetrics::F64(data) => points!(data),
        AggregatedMetrics::U64(data) => points!(data),
        AggregatedMetrics::I64(data) => points!(data),
    }
}

/// Captures formatted `tracing` output in a shared buffer.
#[derive(Debug, Clone, Default)]
pub(crate) struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    pub(crate) fn assert_contains(&self, expected: &str) {
        let output = self.output();
        assert!(output.contains(expected), "log output does not contain '{expected}', got:\n{output}");
    }

    /// A subscriber writing into this buffer; install it with `set_default`.
    pub(crate) fn subscriber(&self) -> impl tracing::Subscriber {
        use tracing_subscriber::layer::SubscriberExt;
        tracing_subscriber::registry().with(tracing_subscriber::fmt::layer().with_writer(self.clone()).with_ansi(false))
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

pub(crate) struct CaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
