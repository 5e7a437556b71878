//! Metric streams: the multi-reader collection state machine.
//!
//! A stream owns one instrument's live aggregation state plus the delta
//! ledger that reconciles any number of concurrently attached readers,
//! each at its own cadence and temporality. Synchronous streams aggregate
//! recorded measurements; asynchronous streams pull observations from
//! registered callbacks at collection time.

use crate::core::attributes::warn_once;
use crate::core::AttributeSet;
use crate::metrics::aggregation::{
    Aggregation, Metric, MetricData, MetricPoint, SpanContext, SummaryData, Temporality,
};
use crate::metrics::aggregator::Aggregator;
use crate::metrics::delta::DeltaStorage;
use crate::metrics::instrument::{Instrument, InstrumentationScope};
use crate::metrics::mask::ReaderMask;
use crate::metrics::view::AttributeProcessor;
use ahash::RandomState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Reader ids at or past this point require a widened mask.
const WORD_CAPACITY: usize = u64::BITS as usize;

/// Common interface of synchronous and asynchronous streams.
pub trait MetricStream: Send + Sync {
    /// The instrument this stream aggregates for.
    fn instrument(&self) -> &Instrument;

    /// The instrumentation scope the instrument belongs to.
    fn scope(&self) -> &InstrumentationScope;

    /// Register a reader at the given temporality, returning its id.
    fn register_reader(&self, temporality: Temporality) -> usize;

    /// Drop a reader, draining and discarding its outstanding deltas.
    fn unregister_reader(&self, reader_id: usize);

    /// Collect for a reader. A non-null `timestamp` advances the stream
    /// (snapshotting current state into the delta ledger); `None` replays
    /// without advancing.
    fn collect(&self, reader_id: usize, timestamp: Option<u64>) -> MetricData;

    /// Mark the stream as removed from its meter. Readers drop their
    /// registration once a retired stream's ledger runs dry.
    fn retire(&self);

    /// True once [`MetricStream::retire`] has been called.
    fn is_retired(&self) -> bool;

    /// Number of buffered delta nodes, bounded by the slowest reader.
    fn pending_deltas(&self) -> usize;
}

struct CoreState {
    delta: DeltaStorage,
    timestamp: u64,
    readers: ReaderMask,
    cumulative: ReaderMask,
}

/// State shared by both stream kinds.
struct StreamCore {
    aggregation: Aggregation,
    instrument: Instrument,
    scope: InstrumentationScope,
    state: Mutex<CoreState>,
    wide_masks: bool,
    retired: AtomicBool,
}

impl StreamCore {
    fn new(
        aggregation: Aggregation,
        instrument: Instrument,
        scope: InstrumentationScope,
        start_timestamp: u64,
        wide_masks: bool,
    ) -> Self {
        Self {
            state: Mutex::new(CoreState {
                delta: DeltaStorage::new(aggregation.clone()),
                timestamp: start_timestamp,
                readers: ReaderMask::new(),
                cumulative: ReaderMask::new(),
            }),
            aggregation,
            instrument,
            scope,
            wide_masks,
            retired: AtomicBool::new(false),
        }
    }

    /// Register a reader. `snapshot` fences the registration: everything
    /// aggregated before this call is moved into the ledger under the old
    /// reader mask, so the new reader never observes it.
    fn register(&self, temporality: Temporality, snapshot: impl FnOnce(u64) -> Metric) -> usize {
        let mut st = self.state.lock();
        let fenced = snapshot(st.timestamp);
        let readers = st.readers.clone();
        st.delta.add(fenced, &readers);

        let id = st.readers.lowest_clear();
        if id >= WORD_CAPACITY && !self.wide_masks {
            warn_once(
                &self.instrument.name,
                "reader mask at word capacity, registration becomes a no-op sink",
            );
            return id;
        }
        st.readers.set(id);
        if temporality == Temporality::Cumulative {
            st.cumulative.set(id);
        }
        id
    }

    fn unregister(&self, reader_id: usize) {
        let mut st = self.state.lock();
        if !st.readers.test(reader_id) {
            return;
        }
        let cumulative = st.cumulative.test(reader_id);
        // Outstanding deltas are drained and discarded.
        let _ = st.delta.collect(reader_id, cumulative);
        st.delta.remove_reader(reader_id);
        st.readers.clear(reader_id);
        st.cumulative.clear(reader_id);
    }

    /// The shared collect sequence. `produce` builds this collection's
    /// delta from the given window start; it runs only when `timestamp`
    /// is non-null.
    fn collect_with(
        &self,
        reader_id: usize,
        timestamp: Option<u64>,
        produce: impl FnOnce(u64) -> Metric,
    ) -> MetricData {
        let mut st = self.state.lock();
        if let Some(ts) = timestamp {
            let metric = produce(st.timestamp);
            let readers = st.readers.clone();
            st.delta.add(metric, &readers);
            st.timestamp = ts;
        }
        let cumulative = st.cumulative.test(reader_id);
        let temporality = if cumulative {
            Temporality::Cumulative
        } else {
            Temporality::Delta
        };
        let end = st.timestamp;
        let (metric, start) = match st.delta.collect(reader_id, cumulative) {
            Some(metric) => {
                let start = metric.timestamp;
                (metric, start)
            },
            None => (Metric::empty(end), end),
        };
        self.aggregation.to_data(metric, start, end, temporality)
    }

    fn pending_deltas(&self) -> usize {
        self.state.lock().delta.len()
    }
}

/// Stream for synchronous instruments: measurements are recorded by
/// application threads and aggregated in place.
pub struct SyncMetricStream {
    core: StreamCore,
    aggregator: Aggregator,
}

impl SyncMetricStream {
    /// Create a stream starting its first window at `start_timestamp`.
    pub fn new(
        instrument: Instrument,
        scope: InstrumentationScope,
        aggregation: Aggregation,
        processor: AttributeProcessor,
        reservoir_size: usize,
        start_timestamp: u64,
        wide_masks: bool,
    ) -> Self {
        let aggregator = Aggregator::new(
            aggregation.clone(),
            processor,
            instrument.name.clone(),
            reservoir_size,
        );
        Self {
            core: StreamCore::new(aggregation, instrument, scope, start_timestamp, wide_masks),
            aggregator,
        }
    }

    /// Record one measurement. Lock-scoped to the aggregator only, so
    /// producers never contend with the collection path's ledger work.
    pub fn record(
        &self,
        value: f64,
        attributes: AttributeSet,
        context: Option<&SpanContext>,
        timestamp: u64,
    ) {
        self.aggregator.record(value, attributes, context, timestamp);
    }
}

impl MetricStream for SyncMetricStream {
    fn instrument(&self) -> &Instrument {
        &self.core.instrument
    }

    fn scope(&self) -> &InstrumentationScope {
        &self.core.scope
    }

    fn register_reader(&self, temporality: Temporality) -> usize {
        self.core.register(temporality, |window_start| {
            self.aggregator.collect(window_start)
        })
    }

    fn unregister_reader(&self, reader_id: usize) {
        self.core.unregister(reader_id);
    }

    fn collect(&self, reader_id: usize, timestamp: Option<u64>) -> MetricData {
        self.core
            .collect_with(reader_id, timestamp, |window_start| {
                self.aggregator.collect(window_start)
            })
    }

    fn retire(&self) {
        self.core.retired.store(true, Ordering::Release);
    }

    fn is_retired(&self) -> bool {
        self.core.retired.load(Ordering::Acquire)
    }

    fn pending_deltas(&self) -> usize {
        self.core.pending_deltas()
    }
}

/// Sink passed to observable callbacks.
pub struct Observer {
    measurements: Vec<(f64, AttributeSet)>,
}

impl Observer {
    /// Report the current value for an attribute set.
    pub fn observe(&mut self, value: f64, attributes: AttributeSet) {
        self.measurements.push((value, attributes));
    }
}

/// Callback registered on an asynchronous stream.
pub type ObservableCallback = Box<dyn Fn(&mut Observer) + Send + Sync>;

/// Stream for observable instruments: values are pulled from callbacks at
/// collection time. Gauges take the observation as-is; counters are
/// diffed against the previous observation per attribute set so the delta
/// ledger downstream works unchanged.
pub struct AsyncMetricStream {
    core: StreamCore,
    processor: AttributeProcessor,
    callbacks: Mutex<Vec<(u64, ObservableCallback)>>,
    next_callback_id: AtomicU64,
    previous: Mutex<HashMap<AttributeSet, f64, RandomState>>,
}

impl AsyncMetricStream {
    /// Create a stream starting its first window at `start_timestamp`.
    pub fn new(
        instrument: Instrument,
        scope: InstrumentationScope,
        aggregation: Aggregation,
        processor: AttributeProcessor,
        start_timestamp: u64,
        wide_masks: bool,
    ) -> Self {
        Self {
            core: StreamCore::new(aggregation, instrument, scope, start_timestamp, wide_masks),
            processor,
            callbacks: Mutex::new(Vec::new()),
            next_callback_id: AtomicU64::new(0),
            previous: Mutex::new(HashMap::default()),
        }
    }

    /// Register a callback invoked on every advancing collection.
    pub fn register_callback(&self, callback: ObservableCallback) -> u64 {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.lock().push((id, callback));
        id
    }

    /// Remove a previously registered callback.
    pub fn unregister_callback(&self, callback_id: u64) {
        self.callbacks.lock().retain(|(id, _)| *id != callback_id);
    }

    /// Run callbacks and turn observations into this window's summary.
    fn observe(&self, window_start: u64, now: u64) -> Metric {
        let mut observer = Observer {
            measurements: Vec::new(),
        };
        for (_, callback) in self.callbacks.lock().iter() {
            callback(&mut observer);
        }

        // Later observations for the same attribute set win.
        let mut latest: Vec<(AttributeSet, f64)> = Vec::new();
        for (value, attributes) in observer.measurements {
            if !value.is_finite() {
                warn_once(&self.core.instrument.name, "non-finite observation dropped");
                continue;
            }
            let key = self.processor.process(attributes);
            match latest.iter_mut().find(|(k, _)| *k == key) {
                Some((_, v)) => *v = value,
                None => latest.push((key, value)),
            }
        }

        let monotonic = matches!(self.core.aggregation, Aggregation::Sum { monotonic: true });
        let sum_semantics = matches!(self.core.aggregation, Aggregation::Sum { .. });
        let mut previous = self.previous.lock();
        let mut points = Vec::with_capacity(latest.len());
        for (attributes, value) in latest {
            let summary = if sum_semantics {
                let prior = previous.get(&attributes).copied().unwrap_or(0.0);
                // A monotonic total falling below its prior reading means
                // the source restarted; the new total is the delta.
                let delta = if monotonic && value < prior {
                    value
                } else {
                    value - prior
                };
                previous.insert(attributes.clone(), value);
                SummaryData::Sum { value: delta }
            } else {
                SummaryData::LastValue {
                    value,
                    timestamp: now,
                }
            };
            points.push(MetricPoint {
                attributes,
                summary,
                exemplars: Vec::new(),
            });
        }
        points.sort_by(|a, b| a.attributes.cmp(&b.attributes));
        Metric {
            points,
            timestamp: window_start,
        }
    }
}

impl MetricStream for AsyncMetricStream {
    fn instrument(&self) -> &Instrument {
        &self.core.instrument
    }

    fn scope(&self) -> &InstrumentationScope {
        &self.core.scope
    }

    fn register_reader(&self, temporality: Temporality) -> usize {
        // Observations only exist at collection time; there is nothing
        // accumulated to fence off.
        self.core.register(temporality, Metric::empty)
    }

    fn unregister_reader(&self, reader_id: usize) {
        self.core.unregister(reader_id);
    }

    fn collect(&self, reader_id: usize, timestamp: Option<u64>) -> MetricData {
        self.core
            .collect_with(reader_id, timestamp, |window_start| {
                self.observe(window_start, timestamp.unwrap_or(window_start))
            })
    }

    fn retire(&self) {
        self.core.retired.store(true, Ordering::Release);
    }

    fn is_retired(&self) -> bool {
        self.core.retired.load(Ordering::Acquire)
    }

    fn pending_deltas(&self) -> usize {
        self.core.pending_deltas()
    }
}
