//! The metric stream subsystem.
//!
//! Measurements flow from instrument handles into per-stream aggregators,
//! are snapshotted into a delta ledger on collection, and fan out to any
//! number of readers, each at its own cadence and temporality:
//! - `aggregation`: fold/merge algorithms and the summary data model
//! - `aggregator`: live per-attribute aggregation state
//! - `delta`: the per-collection ledger with reader bitmask fan-out
//! - `stream`: the multi-reader collection state machine
//! - `meter`: instrument lifecycle, deduplication, reclamation
//! - `reader`: manual and periodic pull subscribers

pub mod aggregation;
pub(crate) mod aggregator;
pub(crate) mod delta;
pub mod exemplar;
pub mod instrument;
pub mod mask;
pub mod meter;
pub mod reader;
pub mod staleness;
pub mod stream;
pub mod view;

pub use aggregation::{
    Aggregation, Exemplar, Metric, MetricData, MetricPoint, SpanContext, SummaryData, Temporality,
};
pub use instrument::{Instrument, InstrumentKind, InstrumentationScope};
pub use meter::{
    Counter, Gauge, Histogram, Meter, MeterProvider, MeterProviderBuilder, ObservableCounter,
    ObservableGauge, ObservableUpDownCounter, UpDownCounter,
};
pub use reader::{
    ManualMetricReader, MetricRecord, PeriodicExportingMetricReader, ResourceMetricsData,
    ScopeMetricsData,
};
pub use staleness::{StalenessHandler, StalenessMode};
pub use stream::{AsyncMetricStream, MetricStream, ObservableCallback, Observer, SyncMetricStream};
pub use view::{AttributeProcessor, InstrumentSelector, View, ViewRegistry};
