//! Meter provider, meters, and user-facing instrument handles.
//!
//! Instruments are deduplicated per `(scope, name)`. Each handle holds a
//! reference on its staleness handler; dropping the last handle reclaims
//! the instrument, removing it from the meter and retiring its stream.
//! Readers keep draining a retired stream until its ledger runs dry.

use crate::core::attributes::warn_once;
use crate::core::{AttributeSet, AttributeValue, Clock, MetricsError, PipelineConfig, Result, SystemClock};
use crate::export::MetricExporter;
use crate::metrics::aggregation::{SpanContext, Temporality};
use crate::metrics::instrument::{Instrument, InstrumentKind, InstrumentationScope};
use crate::metrics::reader::{ManualMetricReader, PeriodicExportingMetricReader, ReaderCore};
use crate::metrics::staleness::{StalenessHandler, StalenessMode};
use crate::metrics::stream::{
    AsyncMetricStream, MetricStream, ObservableCallback, SyncMetricStream,
};
use crate::metrics::view::{View, ViewRegistry};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

enum StreamHandle {
    Sync(Arc<SyncMetricStream>),
    Async(Arc<AsyncMetricStream>),
}

impl StreamHandle {
    fn as_dyn(&self) -> Arc<dyn MetricStream> {
        match self {
            Self::Sync(stream) => Arc::clone(stream) as Arc<dyn MetricStream>,
            Self::Async(stream) => Arc::clone(stream) as Arc<dyn MetricStream>,
        }
    }
}

struct InstrumentEntry {
    instrument: Instrument,
    stream: StreamHandle,
    staleness: Arc<StalenessHandler>,
}

type InstrumentKey = (String, String);

pub(crate) struct ProviderInner {
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    views: ViewRegistry,
    resource: AttributeSet,
    instruments: DashMap<InstrumentKey, InstrumentEntry>,
    readers: Mutex<Vec<Weak<ReaderCore>>>,
    stale_handlers: Mutex<Vec<Weak<StalenessHandler>>>,
    shutdown: AtomicBool,
}

impl ProviderInner {
    fn staleness_mode(&self) -> StalenessMode {
        if self.config.staleness_delay.is_zero() {
            StalenessMode::Immediate
        } else {
            StalenessMode::Delayed(self.config.staleness_delay)
        }
    }

    fn attach_to_readers(&self, stream: Arc<dyn MetricStream>) {
        let mut readers = self.readers.lock();
        readers.retain(|weak| match weak.upgrade() {
            Some(core) => {
                core.attach(Arc::clone(&stream));
                true
            },
            None => false,
        });
    }
}

/// Entry point of the pipeline: scope-keyed meter factory plus reader and
/// lifecycle management.
#[derive(Clone)]
pub struct MeterProvider {
    inner: Arc<ProviderInner>,
}

/// Builder for [`MeterProvider`].
pub struct MeterProviderBuilder {
    config: PipelineConfig,
    clock: Option<Arc<dyn Clock>>,
    views: ViewRegistry,
    resource: AttributeSet,
}

impl MeterProviderBuilder {
    /// Use the given pipeline configuration.
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom clock; tests pass a [`crate::core::ManualClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Append a view rule.
    pub fn with_view(mut self, view: View) -> Self {
        self.views.push(view);
        self
    }

    /// Set process-level resource attributes carried into every batch.
    pub fn with_resource(mut self, resource: AttributeSet) -> Self {
        self.resource = resource;
        self
    }

    /// Validate the configuration and build the provider.
    pub fn build(self) -> Result<MeterProvider> {
        self.config.validate()?;
        Ok(MeterProvider {
            inner: Arc::new(ProviderInner {
                config: self.config,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
                views: self.views,
                resource: self.resource,
                instruments: DashMap::new(),
                readers: Mutex::new(Vec::new()),
                stale_handlers: Mutex::new(Vec::new()),
                shutdown: AtomicBool::new(false),
            }),
        })
    }
}

impl MeterProvider {
    /// Start building a provider.
    pub fn builder() -> MeterProviderBuilder {
        MeterProviderBuilder {
            config: PipelineConfig::default(),
            clock: None,
            views: ViewRegistry::new(),
            resource: AttributeSet::empty(),
        }
    }

    /// Obtain a meter for the given instrumentation scope.
    pub fn meter(&self, scope: InstrumentationScope) -> Meter {
        let scope_id = scope.identity();
        Meter {
            inner: Arc::clone(&self.inner),
            scope,
            scope_id,
        }
    }

    /// Attach a reader that collects only on demand.
    pub fn manual_reader(&self, temporality: Temporality) -> ManualMetricReader {
        ManualMetricReader::from_core(self.attach_reader(temporality, None))
    }

    /// Attach a manual reader that forwards each batch to an exporter.
    pub fn exporting_reader(
        &self,
        temporality: Temporality,
        exporter: Box<dyn MetricExporter>,
    ) -> ManualMetricReader {
        ManualMetricReader::from_core(self.attach_reader(temporality, Some(exporter)))
    }

    /// Attach a reader that collects and exports on a fixed interval.
    /// Must be called within a tokio runtime.
    pub fn periodic_reader(
        &self,
        temporality: Temporality,
        exporter: Box<dyn MetricExporter>,
        interval: Duration,
        timeout: Duration,
    ) -> PeriodicExportingMetricReader {
        let core = self.attach_reader(temporality, Some(exporter));
        PeriodicExportingMetricReader::spawn(core, interval, timeout)
    }

    fn attach_reader(
        &self,
        temporality: Temporality,
        exporter: Option<Box<dyn MetricExporter>>,
    ) -> Arc<ReaderCore> {
        let core = Arc::new(ReaderCore::new(
            temporality,
            Arc::clone(&self.inner.clock),
            self.inner.resource.clone(),
            exporter,
        ));
        for entry in self.inner.instruments.iter() {
            core.attach(entry.stream.as_dyn());
        }
        self.inner.readers.lock().push(Arc::downgrade(&core));
        core
    }

    /// Reap instruments whose delayed staleness deadline has passed.
    /// Returns the number reclaimed.
    pub fn reap_stale(&self) -> usize {
        let now = self.inner.clock.now();
        let mut handlers = self.inner.stale_handlers.lock();
        let mut reclaimed = 0;
        handlers.retain(|weak| match weak.upgrade() {
            Some(handler) => {
                if handler.reap(now) {
                    reclaimed += 1;
                }
                true
            },
            None => false,
        });
        reclaimed
    }

    /// Collect and flush every exporting reader immediately.
    pub fn force_flush(&self) -> Result<()> {
        self.reap_stale();
        let readers: Vec<_> = {
            let mut list = self.inner.readers.lock();
            list.retain(|weak| weak.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for core in readers {
            if core.has_exporter() {
                core.force_flush()?;
            }
        }
        Ok(())
    }

    /// Shut the pipeline down: exporting readers run a final export, all
    /// streams retire, and further instrument creation fails.
    pub fn shutdown(&self) -> Result<()> {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return Err(MetricsError::Shutdown);
        }
        for entry in self.inner.instruments.iter() {
            entry.stream.as_dyn().retire();
        }
        let readers: Vec<_> = self
            .inner
            .readers
            .lock()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect();
        let mut first_err = None;
        for core in readers {
            if core.has_exporter() {
                if let Err(err) = core.collect_and_export().and_then(|_| core.shutdown()) {
                    first_err.get_or_insert(err);
                }
            } else if let Err(err) = core.shutdown() {
                first_err.get_or_insert(err);
            }
        }
        self.inner.instruments.clear();
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Number of live instrument entries across all meters.
    pub fn instrument_count(&self) -> usize {
        self.inner.instruments.len()
    }
}

/// Factory for instruments within one instrumentation scope.
pub struct Meter {
    inner: Arc<ProviderInner>,
    scope: InstrumentationScope,
    scope_id: String,
}

impl Meter {
    /// Build a canonical attribute set honoring the configured depth limit.
    pub fn attributes<K, V, I>(&self, pairs: I) -> AttributeSet
    where
        K: Into<String>,
        V: Into<AttributeValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        AttributeSet::with_depth_limit(pairs, self.inner.config.attribute_depth_limit)
    }

    /// Create a monotonic counter.
    pub fn create_counter(
        &self,
        name: &str,
        unit: Option<&str>,
        description: Option<&str>,
    ) -> Result<Counter> {
        let writer = self.sync_writer(InstrumentKind::Counter, name, unit, description)?;
        Ok(Counter { writer })
    }

    /// Create a counter whose value may also decrease.
    pub fn create_up_down_counter(
        &self,
        name: &str,
        unit: Option<&str>,
        description: Option<&str>,
    ) -> Result<UpDownCounter> {
        let writer = self.sync_writer(InstrumentKind::UpDownCounter, name, unit, description)?;
        Ok(UpDownCounter { writer })
    }

    /// Create a histogram.
    pub fn create_histogram(
        &self,
        name: &str,
        unit: Option<&str>,
        description: Option<&str>,
    ) -> Result<Histogram> {
        let writer = self.sync_writer(InstrumentKind::Histogram, name, unit, description)?;
        Ok(Histogram { writer })
    }

    /// Create a synchronous last-value gauge.
    pub fn create_gauge(
        &self,
        name: &str,
        unit: Option<&str>,
        description: Option<&str>,
    ) -> Result<Gauge> {
        let writer = self.sync_writer(InstrumentKind::Gauge, name, unit, description)?;
        Ok(Gauge { writer })
    }

    /// Create an observable counter backed by `callback`.
    pub fn create_observable_counter(
        &self,
        name: &str,
        unit: Option<&str>,
        description: Option<&str>,
        callback: ObservableCallback,
    ) -> Result<ObservableCounter> {
        let registration =
            self.async_registration(InstrumentKind::ObservableCounter, name, unit, description, callback)?;
        Ok(ObservableCounter { registration })
    }

    /// Create an observable up-down counter backed by `callback`.
    pub fn create_observable_up_down_counter(
        &self,
        name: &str,
        unit: Option<&str>,
        description: Option<&str>,
        callback: ObservableCallback,
    ) -> Result<ObservableUpDownCounter> {
        let registration = self.async_registration(
            InstrumentKind::ObservableUpDownCounter,
            name,
            unit,
            description,
            callback,
        )?;
        Ok(ObservableUpDownCounter { registration })
    }

    /// Create an observable gauge backed by `callback`.
    pub fn create_observable_gauge(
        &self,
        name: &str,
        unit: Option<&str>,
        description: Option<&str>,
        callback: ObservableCallback,
    ) -> Result<ObservableGauge> {
        let registration =
            self.async_registration(InstrumentKind::ObservableGauge, name, unit, description, callback)?;
        Ok(ObservableGauge { registration })
    }

    fn check_live(&self) -> Result<()> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(MetricsError::Shutdown);
        }
        Ok(())
    }

    fn sync_writer(
        &self,
        kind: InstrumentKind,
        name: &str,
        unit: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<SyncWriter>> {
        self.check_live()?;
        let instrument = Instrument::new(kind, name, unit, description);
        let key = (self.scope_id.clone(), name.to_string());

        if let Some(entry) = self.inner.instruments.get(&key) {
            if entry.instrument != instrument {
                warn_once(
                    name,
                    "instrument re-registered with a conflicting descriptor, first registration wins",
                );
            }
            return Ok(match &entry.stream {
                StreamHandle::Sync(stream) => {
                    entry.staleness.acquire();
                    Some(SyncWriter {
                        stream: Arc::clone(stream),
                        staleness: Arc::clone(&entry.staleness),
                        clock: Arc::clone(&self.inner.clock),
                    })
                },
                StreamHandle::Async(_) => None,
            });
        }

        let (aggregation, processor) = self.inner.views.resolve(
            &instrument,
            &self.scope,
            &self.inner.config.default_histogram_boundaries,
        )?;
        tracing::debug!(
            instrument = %instrument.name,
            scope = %self.scope.name,
            "creating synchronous metric stream"
        );
        let stream = Arc::new(SyncMetricStream::new(
            instrument.clone(),
            self.scope.clone(),
            aggregation,
            processor,
            self.inner.config.exemplar_reservoir_size,
            self.inner.clock.now(),
            self.inner.config.wide_reader_masks,
        ));
        let staleness = self.new_staleness(&key, Arc::clone(&stream) as Arc<dyn MetricStream>);
        staleness.acquire();
        self.inner.attach_to_readers(Arc::clone(&stream) as Arc<dyn MetricStream>);
        self.inner.instruments.insert(
            key,
            InstrumentEntry {
                instrument,
                stream: StreamHandle::Sync(Arc::clone(&stream)),
                staleness: Arc::clone(&staleness),
            },
        );
        Ok(Some(SyncWriter {
            stream,
            staleness,
            clock: Arc::clone(&self.inner.clock),
        }))
    }

    fn async_registration(
        &self,
        kind: InstrumentKind,
        name: &str,
        unit: Option<&str>,
        description: Option<&str>,
        callback: ObservableCallback,
    ) -> Result<Option<AsyncRegistration>> {
        self.check_live()?;
        let instrument = Instrument::new(kind, name, unit, description);
        let key = (self.scope_id.clone(), name.to_string());

        if let Some(entry) = self.inner.instruments.get(&key) {
            if entry.instrument != instrument {
                warn_once(
                    name,
                    "instrument re-registered with a conflicting descriptor, first registration wins",
                );
            }
            return Ok(match &entry.stream {
                StreamHandle::Async(stream) => {
                    entry.staleness.acquire();
                    let callback_id = stream.register_callback(callback);
                    Some(AsyncRegistration {
                        stream: Arc::clone(stream),
                        callback_id,
                        staleness: Arc::clone(&entry.staleness),
                    })
                },
                StreamHandle::Sync(_) => None,
            });
        }

        let (aggregation, processor) = self.inner.views.resolve(
            &instrument,
            &self.scope,
            &self.inner.config.default_histogram_boundaries,
        )?;
        tracing::debug!(
            instrument = %instrument.name,
            scope = %self.scope.name,
            "creating observable metric stream"
        );
        let stream = Arc::new(AsyncMetricStream::new(
            instrument.clone(),
            self.scope.clone(),
            aggregation,
            processor,
            self.inner.clock.now(),
            self.inner.config.wide_reader_masks,
        ));
        let callback_id = stream.register_callback(callback);
        let staleness = self.new_staleness(&key, Arc::clone(&stream) as Arc<dyn MetricStream>);
        staleness.acquire();
        self.inner.attach_to_readers(Arc::clone(&stream) as Arc<dyn MetricStream>);
        self.inner.instruments.insert(
            key,
            InstrumentEntry {
                instrument,
                stream: StreamHandle::Async(Arc::clone(&stream)),
                staleness: Arc::clone(&staleness),
            },
        );
        Ok(Some(AsyncRegistration {
            stream,
            callback_id,
            staleness,
        }))
    }

    fn new_staleness(
        &self,
        key: &InstrumentKey,
        stream: Arc<dyn MetricStream>,
    ) -> Arc<StalenessHandler> {
        let handler = Arc::new(StalenessHandler::new(
            self.inner.staleness_mode(),
            Arc::clone(&self.inner.clock),
        ));
        // Weak references only: the callback must not keep the provider
        // or the instrument table alive.
        let provider = Arc::downgrade(&self.inner);
        let key = key.clone();
        handler.on_stale(move || {
            stream.retire();
            if let Some(inner) = provider.upgrade() {
                inner.instruments.remove(&key);
            }
        });
        self.inner
            .stale_handlers
            .lock()
            .push(Arc::downgrade(&handler));
        handler
    }
}

/// Shared recording state of a synchronous instrument handle.
struct SyncWriter {
    stream: Arc<SyncMetricStream>,
    staleness: Arc<StalenessHandler>,
    clock: Arc<dyn Clock>,
}

impl SyncWriter {
    fn record(&self, value: f64, attributes: AttributeSet, context: Option<&SpanContext>) {
        self.stream
            .record(value, attributes, context, self.clock.now());
    }
}

impl Clone for SyncWriter {
    fn clone(&self) -> Self {
        self.staleness.acquire();
        Self {
            stream: Arc::clone(&self.stream),
            staleness: Arc::clone(&self.staleness),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl Drop for SyncWriter {
    fn drop(&mut self) {
        self.staleness.release();
    }
}

/// Registration state of an observable instrument handle.
struct AsyncRegistration {
    stream: Arc<AsyncMetricStream>,
    callback_id: u64,
    staleness: Arc<StalenessHandler>,
}

impl Drop for AsyncRegistration {
    fn drop(&mut self) {
        self.stream.unregister_callback(self.callback_id);
        self.staleness.release();
    }
}

/// Monotonic counter handle.
///
/// A handle created under a conflicting registration is disabled: records
/// are dropped.
#[derive(Clone)]
pub struct Counter {
    writer: Option<SyncWriter>,
}

impl Counter {
    /// Add a non-negative increment.
    pub fn add(&self, value: f64, attributes: AttributeSet, context: Option<&SpanContext>) {
        if let Some(writer) = &self.writer {
            writer.record(value, attributes, context);
        }
    }
}

/// Counter handle whose total may decrease.
#[derive(Clone)]
pub struct UpDownCounter {
    writer: Option<SyncWriter>,
}

impl UpDownCounter {
    /// Add a signed delta.
    pub fn add(&self, value: f64, attributes: AttributeSet, context: Option<&SpanContext>) {
        if let Some(writer) = &self.writer {
            writer.record(value, attributes, context);
        }
    }
}

/// Histogram handle.
#[derive(Clone)]
pub struct Histogram {
    writer: Option<SyncWriter>,
}

impl Histogram {
    /// Record one value into the distribution.
    pub fn record(&self, value: f64, attributes: AttributeSet, context: Option<&SpanContext>) {
        if let Some(writer) = &self.writer {
            writer.record(value, attributes, context);
        }
    }
}

/// Synchronous last-value gauge handle.
#[derive(Clone)]
pub struct Gauge {
    writer: Option<SyncWriter>,
}

impl Gauge {
    /// Record the current value.
    pub fn record(&self, value: f64, attributes: AttributeSet, context: Option<&SpanContext>) {
        if let Some(writer) = &self.writer {
            writer.record(value, attributes, context);
        }
    }
}

/// Observable counter handle; dropping it unregisters the callback.
pub struct ObservableCounter {
    registration: Option<AsyncRegistration>,
}

/// Observable up-down counter handle.
pub struct ObservableUpDownCounter {
    registration: Option<AsyncRegistration>,
}

/// Observable gauge handle.
pub struct ObservableGauge {
    registration: Option<AsyncRegistration>,
}

impl ObservableCounter {
    /// False when this handle lost a registration conflict and observes
    /// nothing.
    pub fn is_enabled(&self) -> bool {
        self.registration.is_some()
    }
}

impl ObservableUpDownCounter {
    /// False when this handle lost a registration conflict and observes
    /// nothing.
    pub fn is_enabled(&self) -> bool {
        self.registration.is_some()
    }
}

impl ObservableGauge {
    /// False when this handle lost a registration conflict and observes
    /// nothing.
    pub fn is_enabled(&self) -> bool {
        self.registration.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use crate::metrics::aggregation::SummaryData;

    fn provider_with_clock() -> (MeterProvider, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let provider = MeterProvider::builder()
            .with_clock(clock.clone() as Arc<dyn Clock>)
            .build()
            .unwrap();
        (provider, clock)
    }

    fn total_of(batch: &crate::metrics::reader::ResourceMetricsData) -> f64 {
        batch
            .scopes
            .iter()
            .flat_map(|s| s.metrics.iter())
            .flat_map(|m| m.data.points())
            .map(|p| match p.summary {
                SummaryData::Sum { value } => value,
                _ => 0.0,
            })
            .sum()
    }

    #[test]
    fn test_instrument_deduplication() {
        let (provider, _clock) = provider_with_clock();
        let meter = provider.meter(InstrumentationScope::named("app"));
        let a = meter.create_counter("requests", None, None).unwrap();
        let b = meter.create_counter("requests", None, None).unwrap();
        assert_eq!(provider.instrument_count(), 1);

        let reader = provider.manual_reader(Temporality::Cumulative);
        a.add(1.0, AttributeSet::empty(), None);
        b.add(2.0, AttributeSet::empty(), None);
        let batch = reader.collect().unwrap();
        // Both handles fed the same stream.
        assert_eq!(total_of(&batch), 3.0);
    }

    #[test]
    fn test_conflicting_descriptor_returns_first_registration() {
        let (provider, _clock) = provider_with_clock();
        let meter = provider.meter(InstrumentationScope::named("app"));
        let _a = meter
            .create_counter("latency", Some("ms"), None)
            .unwrap();
        // Different unit: warned, but the original stream is shared.
        let b = meter.create_counter("latency", Some("s"), None).unwrap();
        assert!(b.writer.is_some());
        assert_eq!(provider.instrument_count(), 1);
    }

    #[test]
    fn test_kind_conflict_returns_existing_stream() {
        let (provider, _clock) = provider_with_clock();
        let meter = provider.meter(InstrumentationScope::named("app"));
        let reader = provider.manual_reader(Temporality::Cumulative);
        let counter = meter.create_counter("x", None, None).unwrap();
        // Conflicting kind on the same name: first registration wins and
        // the new handle writes into the existing stream.
        let histogram = meter.create_histogram("x", None, None).unwrap();
        assert!(histogram.writer.is_some());
        assert_eq!(provider.instrument_count(), 1);

        counter.add(2.0, AttributeSet::empty(), None);
        histogram.record(3.0, AttributeSet::empty(), None);
        let batch = reader.collect().unwrap();
        assert_eq!(total_of(&batch), 5.0);
    }

    #[test]
    fn test_sync_observable_conflict_disables_handle() {
        let (provider, _clock) = provider_with_clock();
        let meter = provider.meter(InstrumentationScope::named("app"));
        let _observable = meter
            .create_observable_counter(
                "x",
                None,
                None,
                Box::new(|observer| observer.observe(1.0, AttributeSet::empty())),
            )
            .unwrap();
        // A synchronous handle cannot write into an observable stream.
        let counter = meter.create_counter("x", None, None).unwrap();
        assert!(counter.writer.is_none());
        counter.add(1.0, AttributeSet::empty(), None);
        assert_eq!(provider.instrument_count(), 1);
    }

    #[test]
    fn test_scopes_do_not_collide() {
        let (provider, _clock) = provider_with_clock();
        let meter_a = provider.meter(InstrumentationScope::named("lib-a"));
        let meter_b = provider.meter(InstrumentationScope::named("lib-b"));
        let _a = meter_a.create_counter("requests", None, None).unwrap();
        let _b = meter_b.create_counter("requests", None, None).unwrap();
        assert_eq!(provider.instrument_count(), 2);
    }

    #[test]
    fn test_staleness_removes_entry() {
        let (provider, _clock) = provider_with_clock();
        let meter = provider.meter(InstrumentationScope::named("app"));
        let counter = meter.create_counter("requests", None, None).unwrap();
        assert_eq!(provider.instrument_count(), 1);
        drop(counter);
        assert_eq!(provider.instrument_count(), 0);
    }

    #[test]
    fn test_clone_keeps_instrument_alive() {
        let (provider, _clock) = provider_with_clock();
        let meter = provider.meter(InstrumentationScope::named("app"));
        let counter = meter.create_counter("requests", None, None).unwrap();
        let clone = counter.clone();
        drop(counter);
        assert_eq!(provider.instrument_count(), 1);
        drop(clone);
        assert_eq!(provider.instrument_count(), 0);
    }

    #[test]
    fn test_delayed_staleness_survives_churn() {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let provider = MeterProvider::builder()
            .with_clock(clock.clone() as Arc<dyn Clock>)
            .with_config(PipelineConfig {
                staleness_delay: Duration::from_nanos(500),
                ..Default::default()
            })
            .build()
            .unwrap();
        let meter = provider.meter(InstrumentationScope::named("app"));
        let counter = meter.create_counter("requests", None, None).unwrap();
        drop(counter);
        // Still present: delay has not elapsed.
        assert_eq!(provider.instrument_count(), 1);

        // Churn: re-create before the deadline, deadline is cancelled.
        let counter = meter.create_counter("requests", None, None).unwrap();
        clock.advance(10_000);
        assert_eq!(provider.reap_stale(), 0);
        assert_eq!(provider.instrument_count(), 1);

        drop(counter);
        clock.advance(10_000);
        assert_eq!(provider.reap_stale(), 1);
        assert_eq!(provider.instrument_count(), 0);
    }

    #[test]
    fn test_shutdown_rejects_new_instruments() {
        let (provider, _clock) = provider_with_clock();
        let meter = provider.meter(InstrumentationScope::named("app"));
        provider.shutdown().unwrap();
        assert!(matches!(
            meter.create_counter("x", None, None),
            Err(MetricsError::Shutdown)
        ));
        assert!(matches!(provider.shutdown(), Err(MetricsError::Shutdown)));
    }

    #[test]
    fn test_observable_counter_via_meter() {
        let (provider, _clock) = provider_with_clock();
        let meter = provider.meter(InstrumentationScope::named("app"));
        let reader = provider.manual_reader(Temporality::Delta);
        let observable = meter
            .create_observable_counter(
                "io_bytes",
                Some("By"),
                None,
                Box::new(|observer| observer.observe(128.0, AttributeSet::empty())),
            )
            .unwrap();
        assert!(observable.is_enabled());
        let batch = reader.collect().unwrap();
        assert_eq!(total_of(&batch), 128.0);
    }

    #[test]
    fn test_view_configuration_error_propagates() {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let provider = MeterProvider::builder()
            .with_clock(clock as Arc<dyn Clock>)
            .with_view(
                View::new(crate::metrics::view::InstrumentSelector::any())
                    .with_aggregation(crate::metrics::aggregation::Aggregation::LastValue),
            )
            .build()
            .unwrap();
        let meter = provider.meter(InstrumentationScope::named("app"));
        assert!(matches!(
            meter.create_counter("requests", None, None),
            Err(MetricsError::Configuration(_))
        ));
    }
}
