//! Mittari - OpenTelemetry-style metrics pipeline core.
//!
//! Mittari implements the hard middle of a metrics SDK: live aggregation
//! of measurements, a delta ledger reconciling any number of concurrently
//! attached readers at differing temporalities and cadences, exemplar
//! sampling, staleness-driven instrument reclamation, and OTLP
//! serialization over pluggable transports.
//!
//! # Features
//!
//! - **Multi-reader fan-out**: every reader sees every delta exactly
//!   once, at its chosen temporality, regardless of collection order
//! - **Bounded state**: buffered deltas are capped by the slowest reader
//! - **Lock-free-adjacent hot path**: recording takes one short
//!   per-stream lock and never blocks on collection or export
//! - **OTLP wire compatibility**: protobuf, JSON, and NDJSON encodings
//!   with integer-valued enums as the OTLP JSON mapping requires
//!
//! # Architecture
//!
//! - `core`: clock, attribute canonicalization, errors, configuration
//! - `metrics`: aggregation, streams, meters, readers
//! - `export`: transports, exporters, OTLP conversion, serialization
//!
//! # Example
//!
//! ```
//! use mittari::core::AttributeSet;
//! use mittari::metrics::{InstrumentationScope, MeterProvider, Temporality};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = MeterProvider::builder().build()?;
//!     let reader = provider.manual_reader(Temporality::Cumulative);
//!
//!     let meter = provider.meter(InstrumentationScope::named("checkout"));
//!     let requests = meter.create_counter("requests", None, None)?;
//!     requests.add(1.0, AttributeSet::from_pairs([("code", 200i64)]), None);
//!
//!     let batch = reader.collect()?;
//!     assert!(!batch.is_empty());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod core;
pub mod export;
pub mod metrics;

pub use crate::core::{AttributeSet, AttributeValue, MetricsError, PipelineConfig, Result};
pub use crate::export::{InMemoryExporter, MetricExporter, Serializer, Transport, TransportExporter};
pub use crate::metrics::{InstrumentationScope, MeterProvider, Temporality};
