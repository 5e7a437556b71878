//! Aggregations and the summaries they produce.
//!
//! An [`Aggregation`] folds raw measurements into per-attribute
//! [`SummaryData`] and knows how to merge summaries across collection
//! windows. Three algorithms are supported: monotonic/non-monotonic sums,
//! last-value, and explicit-bucket histograms.

use crate::core::AttributeSet;

/// The temporal view a reader observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Temporality {
    /// Deltas since the reader's previous collection.
    Delta,
    /// Running totals since the stream started.
    Cumulative,
}

/// Span provenance attached to a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanContext {
    /// 16-byte trace identifier
    pub trace_id: [u8; 16],
    /// 8-byte span identifier
    pub span_id: [u8; 8],
}

/// A raw measurement retained as provenance for an aggregated value.
#[derive(Debug, Clone, PartialEq)]
pub struct Exemplar {
    /// The measured value
    pub value: f64,
    /// When the measurement was recorded, unix nanoseconds
    pub timestamp: u64,
    /// The measurement's full attribute set before view filtering
    pub attributes: AttributeSet,
    /// Trace id of the recording span, if any
    pub trace_id: Option<[u8; 16]>,
    /// Span id of the recording span, if any
    pub span_id: Option<[u8; 8]>,
}

/// Per-attribute statistical summary.
#[derive(Debug, Clone, PartialEq)]
pub enum SummaryData {
    /// Running sum of measurements
    Sum {
        /// Accumulated value
        value: f64,
    },
    /// Most recent measurement
    LastValue {
        /// Latest value
        value: f64,
        /// When the latest value was recorded
        timestamp: u64,
    },
    /// Explicit-bucket histogram. `bucket_counts.len() == boundaries.len() + 1`.
    Histogram {
        /// Number of recorded measurements
        count: u64,
        /// Sum of recorded measurements
        sum: f64,
        /// Smallest recorded measurement, `f64::INFINITY` when empty
        min: f64,
        /// Largest recorded measurement, `f64::NEG_INFINITY` when empty
        max: f64,
        /// Per-bucket observation counts
        bucket_counts: Vec<u64>,
    },
}

/// One attribute partition of a metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    /// Attribute set this summary is keyed by
    pub attributes: AttributeSet,
    /// Aggregated summary
    pub summary: SummaryData,
    /// Sampled raw measurements from the most recent window
    pub exemplars: Vec<Exemplar>,
}

/// A collected set of points sharing one window start.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Aggregated points, one per attribute set
    pub points: Vec<MetricPoint>,
    /// Window start, unix nanoseconds
    pub timestamp: u64,
}

impl Metric {
    /// A metric with no points at the given window start.
    pub fn empty(timestamp: u64) -> Self {
        Self {
            points: Vec::new(),
            timestamp,
        }
    }

    /// True when the metric carries no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Temporality-qualified data handed to readers and exporters.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricData {
    /// Sum aggregation output
    Sum {
        /// Aggregated points
        points: Vec<MetricPoint>,
        /// The reader's temporal view
        temporality: Temporality,
        /// True when the producing instrument only increases
        monotonic: bool,
        /// Window start, unix nanoseconds
        start: u64,
        /// Window end, unix nanoseconds
        end: u64,
    },
    /// Last-value aggregation output
    Gauge {
        /// Aggregated points
        points: Vec<MetricPoint>,
        /// Collection time, unix nanoseconds
        end: u64,
    },
    /// Explicit-bucket histogram output
    Histogram {
        /// Aggregated points
        points: Vec<MetricPoint>,
        /// The reader's temporal view
        temporality: Temporality,
        /// Bucket upper boundaries
        boundaries: Vec<f64>,
        /// Window start, unix nanoseconds
        start: u64,
        /// Window end, unix nanoseconds
        end: u64,
    },
}

impl MetricData {
    /// The points regardless of variant.
    pub fn points(&self) -> &[MetricPoint] {
        match self {
            Self::Sum { points, .. } | Self::Gauge { points, .. } | Self::Histogram { points, .. } => {
                points
            },
        }
    }

    /// True when no points were collected.
    pub fn is_empty(&self) -> bool {
        self.points().is_empty()
    }
}

/// Algorithm that folds measurements into summaries.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    /// Per-attribute addition
    Sum {
        /// Reject negative measurements and guarantee non-decreasing totals
        monotonic: bool,
    },
    /// Per-attribute most-recent value
    LastValue,
    /// Per-attribute explicit-bucket histogram
    ExplicitBucketHistogram {
        /// Bucket upper boundaries, strictly increasing
        boundaries: Vec<f64>,
        /// Track min/max alongside the buckets
        record_min_max: bool,
    },
}

impl Aggregation {
    /// A fresh summary in this aggregation's shape.
    pub fn new_summary(&self) -> SummaryData {
        match self {
            Self::Sum { .. } => SummaryData::Sum { value: 0.0 },
            Self::LastValue => SummaryData::LastValue {
                value: 0.0,
                timestamp: 0,
            },
            Self::ExplicitBucketHistogram { boundaries, .. } => SummaryData::Histogram {
                count: 0,
                sum: 0.0,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                bucket_counts: vec![0; boundaries.len() + 1],
            },
        }
    }

    /// Fold one measurement into a summary.
    pub fn fold(&self, summary: &mut SummaryData, value: f64, timestamp: u64) {
        match (self, summary) {
            (Self::Sum { .. }, SummaryData::Sum { value: acc }) => *acc += value,
            (Self::LastValue, SummaryData::LastValue { value: v, timestamp: ts }) => {
                *v = value;
                *ts = timestamp;
            },
            (
                Self::ExplicitBucketHistogram { boundaries, record_min_max },
                SummaryData::Histogram {
                    count,
                    sum,
                    min,
                    max,
                    bucket_counts,
                },
            ) => {
                // Upper-inclusive buckets: boundaries[i-1] < v <= boundaries[i].
                let bucket = boundaries.partition_point(|b| value > *b);
                bucket_counts[bucket] += 1;
                *count += 1;
                *sum += value;
                if *record_min_max {
                    *min = min.min(value);
                    *max = max.max(value);
                }
            },
            (aggregation, summary) => {
                debug_assert!(false, "summary shape mismatch: {:?} vs {:?}", aggregation, summary);
            },
        }
    }

    /// Merge `from` into `into`. Both summaries must match this aggregation.
    pub fn merge(&self, into: &mut SummaryData, from: &SummaryData) {
        match (self, into, from) {
            (Self::Sum { .. }, SummaryData::Sum { value: a }, SummaryData::Sum { value: b }) => {
                *a += b;
            },
            (
                Self::LastValue,
                SummaryData::LastValue { value: av, timestamp: ats },
                SummaryData::LastValue { value: bv, timestamp: bts },
            ) => {
                // The later-appended side merges second, so ties go to `from`.
                if *bts >= *ats {
                    *av = *bv;
                    *ats = *bts;
                }
            },
            (
                Self::ExplicitBucketHistogram { .. },
                SummaryData::Histogram {
                    count: ac,
                    sum: asum,
                    min: amin,
                    max: amax,
                    bucket_counts: abuckets,
                },
                SummaryData::Histogram {
                    count: bc,
                    sum: bsum,
                    min: bmin,
                    max: bmax,
                    bucket_counts: bbuckets,
                },
            ) => {
                *ac += bc;
                *asum += bsum;
                // Infinity sentinels mean a side with no observations never wins.
                *amin = amin.min(*bmin);
                *amax = amax.max(*bmax);
                for (a, b) in abuckets.iter_mut().zip(bbuckets.iter()) {
                    *a += b;
                }
            },
            (aggregation, into, from) => {
                debug_assert!(
                    false,
                    "merge shape mismatch: {:?} vs {:?} / {:?}",
                    aggregation, into, from
                );
            },
        }
    }

    /// Merge every point of `from` into `into`, matching by attribute set.
    pub fn merge_metric(&self, into: &mut Metric, from: Metric) {
        into.timestamp = into.timestamp.min(from.timestamp);
        for point in from.points {
            match into
                .points
                .iter_mut()
                .find(|p| p.attributes == point.attributes)
            {
                Some(existing) => {
                    self.merge(&mut existing.summary, &point.summary);
                    if !point.exemplars.is_empty() {
                        existing.exemplars = point.exemplars;
                    }
                },
                None => into.points.push(point),
            }
        }
    }

    /// Convert a collected metric into reader-facing data.
    pub fn to_data(
        &self,
        metric: Metric,
        start: u64,
        end: u64,
        temporality: Temporality,
    ) -> MetricData {
        match self {
            Self::Sum { monotonic } => MetricData::Sum {
                points: metric.points,
                temporality,
                monotonic: *monotonic,
                start,
                end,
            },
            Self::LastValue => MetricData::Gauge {
                points: metric.points,
                end,
            },
            Self::ExplicitBucketHistogram { boundaries, .. } => MetricData::Histogram {
                points: metric.points,
                temporality,
                boundaries: boundaries.clone(),
                start,
                end,
            },
        }
    }
}
