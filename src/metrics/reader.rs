//! Metric readers: pull-based subscribers that drain streams.
//!
//! A reader owns one registration per stream and a chosen temporality.
//! `ManualMetricReader` collects on demand; `PeriodicExportingMetricReader`
//! drives collection from a tokio interval and hands batches to its
//! exporter under a timeout.

use crate::core::{AttributeSet, Clock, MetricsError, Result};
use crate::export::MetricExporter;
use crate::metrics::aggregation::{MetricData, Temporality};
use crate::metrics::instrument::{Instrument, InstrumentationScope};
use crate::metrics::stream::MetricStream;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// One instrument's collected data.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    /// The producing instrument
    pub instrument: Instrument,
    /// Temporality-qualified points
    pub data: MetricData,
}

/// All metrics collected for one instrumentation scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeMetricsData {
    /// The instrumentation scope
    pub scope: InstrumentationScope,
    /// Collected instruments
    pub metrics: Vec<MetricRecord>,
}

/// A full collection batch: resource plus per-scope metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceMetricsData {
    /// Resource attributes of the producing process
    pub resource: AttributeSet,
    /// Per-scope collections
    pub scopes: Vec<ScopeMetricsData>,
}

impl ResourceMetricsData {
    /// True when no scope produced any points.
    pub fn is_empty(&self) -> bool {
        self.scopes.iter().all(|s| s.metrics.is_empty())
    }
}

struct Registration {
    stream: Arc<dyn MetricStream>,
    reader_id: usize,
}

/// Shared reader state: registrations, temporality, optional exporter.
pub(crate) struct ReaderCore {
    temporality: Temporality,
    clock: Arc<dyn Clock>,
    resource: AttributeSet,
    registrations: Mutex<Vec<Registration>>,
    exporter: Option<Box<dyn MetricExporter>>,
    shutdown: AtomicBool,
}

impl ReaderCore {
    pub fn new(
        temporality: Temporality,
        clock: Arc<dyn Clock>,
        resource: AttributeSet,
        exporter: Option<Box<dyn MetricExporter>>,
    ) -> Self {
        Self {
            temporality,
            clock,
            resource,
            registrations: Mutex::new(Vec::new()),
            exporter,
            shutdown: AtomicBool::new(false),
        }
    }

    /// True when this reader forwards batches to an exporter.
    pub fn has_exporter(&self) -> bool {
        self.exporter.is_some()
    }

    /// Register on a stream. New streams are attached as the meter
    /// creates them; the registration fence guarantees this reader only
    /// observes measurements from here on.
    pub fn attach(&self, stream: Arc<dyn MetricStream>) {
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        let reader_id = stream.register_reader(self.temporality);
        self.registrations.lock().push(Registration { stream, reader_id });
    }

    /// Advance and drain every registered stream.
    pub fn collect(&self) -> Result<ResourceMetricsData> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(MetricsError::Shutdown);
        }
        let now = self.clock.now();
        let mut scopes: Vec<ScopeMetricsData> = Vec::new();
        let mut registrations = self.registrations.lock();
        registrations.retain(|registration| {
            let data = registration
                .stream
                .collect(registration.reader_id, Some(now));
            // Retired streams are dropped once their ledger runs dry.
            // Cumulative temporality keeps replaying its running total,
            // so emptiness of the returned data is not the signal.
            let keep = !(registration.stream.is_retired()
                && registration.stream.pending_deltas() == 0);
            if !keep {
                registration.stream.unregister_reader(registration.reader_id);
            }
            if !data.is_empty() {
                let scope = registration.stream.scope();
                let record = MetricRecord {
                    instrument: registration.stream.instrument().clone(),
                    data,
                };
                match scopes.iter_mut().find(|s| s.scope == *scope) {
                    Some(entry) => entry.metrics.push(record),
                    None => scopes.push(ScopeMetricsData {
                        scope: scope.clone(),
                        metrics: vec![record],
                    }),
                }
            }
            keep
        });
        Ok(ResourceMetricsData {
            resource: self.resource.clone(),
            scopes,
        })
    }

    /// Collect and forward to the exporter when one is configured.
    pub fn collect_and_export(&self) -> Result<ResourceMetricsData> {
        let batch = self.collect()?;
        if let Some(exporter) = &self.exporter {
            if !batch.is_empty() {
                exporter.export(&batch)?;
            }
        }
        Ok(batch)
    }

    /// Flush the exporter after a final collection.
    pub fn force_flush(&self) -> Result<()> {
        self.collect_and_export()?;
        if let Some(exporter) = &self.exporter {
            exporter.force_flush()?;
        }
        Ok(())
    }

    /// Final export, then unregister from every stream.
    pub fn shutdown(&self) -> Result<()> {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return Err(MetricsError::Shutdown);
        }
        for registration in self.registrations.lock().drain(..) {
            registration.stream.unregister_reader(registration.reader_id);
        }
        if let Some(exporter) = &self.exporter {
            exporter.shutdown()?;
        }
        Ok(())
    }
}

/// Reader that collects only when asked.
pub struct ManualMetricReader {
    core: Arc<ReaderCore>,
}

impl ManualMetricReader {
    pub(crate) fn from_core(core: Arc<ReaderCore>) -> Self {
        Self { core }
    }

    /// Pull from every stream, exporting when an exporter is attached.
    pub fn collect(&self) -> Result<ResourceMetricsData> {
        self.core.collect_and_export()
    }

    /// Collect and flush the exporter.
    pub fn force_flush(&self) -> Result<()> {
        self.core.force_flush()
    }

    /// Drain, export, and detach from all streams.
    pub fn shutdown(&self) -> Result<()> {
        let _ = self.core.collect_and_export();
        self.core.shutdown()
    }
}

/// Reader that collects on a fixed interval and exports each batch.
pub struct PeriodicExportingMetricReader {
    core: Arc<ReaderCore>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl PeriodicExportingMetricReader {
    /// Spawn the collection loop. Must be called within a tokio runtime.
    pub(crate) fn spawn(core: Arc<ReaderCore>, interval: Duration, timeout: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let loop_core = Arc::clone(&core);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so the first
            // window spans a full interval.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let core = Arc::clone(&loop_core);
                        let work = tokio::task::spawn_blocking(move || core.collect_and_export());
                        match tokio::time::timeout(timeout, work).await {
                            Ok(Ok(Err(err))) => {
                                tracing::warn!(error = %err, "periodic metric export failed");
                            },
                            Ok(Err(join_err)) => {
                                tracing::warn!(error = %join_err, "periodic metric export panicked");
                            },
                            Err(_) => {
                                tracing::warn!("periodic metric export timed out");
                            },
                            Ok(Ok(Ok(_))) => {},
                        }
                    },
                    _ = &mut shutdown_rx => break,
                }
            }
        });
        Self {
            core,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Trigger an immediate out-of-band collection.
    pub fn force_flush(&self) -> Result<()> {
        self.core.force_flush()
    }

    /// Stop the loop, run a final export, and detach from all streams.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        let _ = self.core.collect_and_export();
        self.core.shutdown()
    }
}
