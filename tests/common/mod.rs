//! Common test utilities and fixtures.

#![allow(dead_code)]

use mittari::core::{Clock, ManualClock};
use mittari::metrics::{
    MeterProvider, MetricData, ResourceMetricsData, SummaryData, Temporality,
};
use mittari::PipelineConfig;
use std::sync::Arc;

/// Route pipeline diagnostics through the test harness so one-time
/// warnings show up when a test fails. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Build a provider driven by a manual clock starting at t=1000ns.
pub fn manual_provider() -> (MeterProvider, Arc<ManualClock>) {
    manual_provider_with_config(PipelineConfig::default())
}

/// Build a provider with a manual clock and a custom configuration.
pub fn manual_provider_with_config(
    config: PipelineConfig,
) -> (MeterProvider, Arc<ManualClock>) {
    init_tracing();
    let clock = Arc::new(ManualClock::starting_at(1_000));
    let provider = MeterProvider::builder()
        .with_clock(clock.clone() as Arc<dyn Clock>)
        .with_config(config)
        .build()
        .expect("default config is valid");
    (provider, clock)
}

/// Sum of every sum-point in the batch.
pub fn total_sum(batch: &ResourceMetricsData) -> f64 {
    batch
        .scopes
        .iter()
        .flat_map(|scope| scope.metrics.iter())
        .flat_map(|metric| metric.data.points())
        .map(|point| match point.summary {
            SummaryData::Sum { value } => value,
            _ => 0.0,
        })
        .sum()
}

/// Find the data for an instrument by name, panicking when absent.
pub fn metric_data<'a>(batch: &'a ResourceMetricsData, name: &str) -> &'a MetricData {
    batch
        .scopes
        .iter()
        .flat_map(|scope| scope.metrics.iter())
        .find(|metric| metric.instrument.name == name)
        .map(|metric| &metric.data)
        .unwrap_or_else(|| panic!("no metric named {}", name))
}

/// True when the batch carries data for the named instrument.
pub fn has_metric(batch: &ResourceMetricsData, name: &str) -> bool {
    batch
        .scopes
        .iter()
        .flat_map(|scope| scope.metrics.iter())
        .any(|metric| metric.instrument.name == name)
}

/// The temporality tag carried in the data, if any.
pub fn temporality_of(data: &MetricData) -> Option<Temporality> {
    match data {
        MetricData::Sum { temporality, .. } | MetricData::Histogram { temporality, .. } => {
            Some(*temporality)
        },
        MetricData::Gauge { .. } => None,
    }
}
