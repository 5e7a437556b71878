//! Live aggregation of measurements, partitioned by attribute set.
//!
//! The hot path is a single short mutex hold: canonicalized attributes in,
//! summary fold, optional exemplar offer. Collection swaps the working map
//! for a fresh one so producers never observe a torn snapshot.

use crate::core::attributes::warn_once;
use crate::core::AttributeSet;
use crate::metrics::aggregation::{Aggregation, Metric, MetricPoint, SpanContext};
use crate::metrics::exemplar::ExemplarReservoir;
use crate::metrics::view::AttributeProcessor;
use ahash::RandomState;
use parking_lot::Mutex;
use std::collections::HashMap;

type SummaryMap = HashMap<AttributeSet, crate::metrics::aggregation::SummaryData, RandomState>;

/// Folds measurements into per-attribute summaries.
#[derive(Debug)]
pub(crate) struct Aggregator {
    aggregation: Aggregation,
    processor: AttributeProcessor,
    instrument_name: String,
    points: Mutex<SummaryMap>,
    reservoir: Mutex<ExemplarReservoir>,
}

impl Aggregator {
    pub fn new(
        aggregation: Aggregation,
        processor: AttributeProcessor,
        instrument_name: String,
        reservoir_size: usize,
    ) -> Self {
        Self {
            aggregation,
            processor,
            instrument_name,
            points: Mutex::new(HashMap::default()),
            reservoir: Mutex::new(ExemplarReservoir::new(reservoir_size)),
        }
    }

    /// Fold one measurement. Never fails observably: invalid values are
    /// dropped with a one-time warning per instrument.
    pub fn record(
        &self,
        value: f64,
        attributes: AttributeSet,
        context: Option<&SpanContext>,
        timestamp: u64,
    ) {
        if !value.is_finite() {
            warn_once(&self.instrument_name, "non-finite measurement dropped");
            return;
        }
        if let Aggregation::Sum { monotonic: true } = self.aggregation {
            if value < 0.0 {
                warn_once(
                    &self.instrument_name,
                    "negative measurement on monotonic instrument dropped",
                );
                return;
            }
        }
        let key = self.processor.process(attributes.clone());
        {
            let mut points = self.points.lock();
            let summary = points
                .entry(key.clone())
                .or_insert_with(|| self.aggregation.new_summary());
            self.aggregation.fold(summary, value, timestamp);
        }
        self.reservoir
            .lock()
            .offer(&key, value, &attributes, context, timestamp);
    }

    /// Swap out the accumulated summaries as a [`Metric`] whose window
    /// starts at `window_start`. Exemplars are joined onto their points.
    pub fn collect(&self, window_start: u64) -> Metric {
        let drained = std::mem::take(&mut *self.points.lock());
        let exemplars = self.reservoir.lock().drain();

        let mut points: Vec<MetricPoint> = drained
            .into_iter()
            .map(|(attributes, summary)| MetricPoint {
                attributes,
                summary,
                exemplars: Vec::new(),
            })
            .collect();
        // Deterministic output order regardless of hash seed.
        points.sort_by(|a, b| a.attributes.cmp(&b.attributes));

        for entry in exemplars {
            if let Some(point) = points.iter_mut().find(|p| p.attributes == entry.key) {
                point.exemplars.push(entry.exemplar);
            }
        }

        Metric {
            points,
            timestamp: window_start,
        }
    }
}
