// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use opentelemetry::{
    InstrumentationScope, KeyValue,
    metrics::{Counter, Gauge, Histogram, Meter, MeterProvider},
};

use super::{CacheActivity, CacheOperation, attributes};

const METER_NAME: &str = "larder";
const VERSION: &str = "v0.1.0";
const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.47.0";
const EVENT_COUNT_NAME: &str = "larder.event.count";
const OPERATION_DURATION_NAME: &str = "larder.operation.duration";
const REGION_SIZE_NAME: &str = "larder.region.size";

pub(crate) fn create_meter(meter_provider: &dyn MeterProvider) -> Meter {
    meter_provider.meter_with_scope(
        InstrumentationScope::builder(METER_NAME)
            .with_version(VERSION)
            .with_schema_url(SCHEMA_URL)
            .build(),
    )
}

#[derive(Debug)]
pub(crate) struct Instruments {
    events: Counter<u64>,
    duration: Histogram<f64>,
    size: Gauge<u64>,
}

impl Instruments {
    pub(crate) fn new(meter: &Meter) -> Self {
        Self {
            events: meter
                .u64_counter(EVENT_COUNT_NAME)
                .with_description("Cache region events")
                .with_unit("{event}")
                .build(),
            duration: meter
                .f64_histogram(OPERATION_DURATION_NAME)
                .with_description("Cache provider call duration")
                .with_unit("s")
                .build(),
            size: meter
                .u64_gauge(REGION_SIZE_NAME)
                .with_description("Number of entries held by a region")
                .with_unit("{entry}")
                .build(),
        }
    }

    pub(crate) fn record(&self, region: &str, operation: CacheOperation, activity: CacheActivity, duration: Option<Duration>) {
        let attrs = [
            KeyValue::new(attributes::CACHE_REGION, region.to_owned()),
            KeyValue::new(attributes::CACHE_OPERATION, operation.as_str()),
            KeyValue::new(attributes::CACHE_ACTIVITY, activity.as_str()),
        ];

        self.events.add(1, &attrs);
        if let Some(duration) = duration {
            self.duration.record(duration.as_secs_f64(), &attrs);
        }
    }

    pub(crate) fn record_size(&self, region: &str, size: u64) {
        self.size.record(size, &[KeyValue::new(attributes::CACHE_REGION, region.to_owned())]);
    }
}
