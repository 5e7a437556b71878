//! Export surface: transport and exporter contracts, OTLP conversion,
//! and wire serialization.

pub mod otlp;
pub mod serializer;

use crate::core::Result;
use crate::metrics::reader::ResourceMetricsData;
use parking_lot::Mutex;
use std::sync::Arc;

pub use serializer::{Serializer, CONTENT_TYPE_JSON, CONTENT_TYPE_NDJSON, CONTENT_TYPE_PROTOBUF};

/// Byte sink with a negotiated content type.
///
/// Transports own all network concerns: connection management, retry,
/// backoff. The pipeline hands them fully serialized payloads and never
/// holds a lock across `send`.
pub trait Transport: Send + Sync {
    /// The content type this transport carries, see [`serializer`].
    fn content_type(&self) -> &str;

    /// Ship one serialized payload.
    fn send(&self, bytes: &[u8]) -> Result<()>;
}

/// Sink for collected metric batches.
pub trait MetricExporter: Send + Sync {
    /// Export one batch. Failures are surfaced to the reader; the
    /// pipeline never retries.
    fn export(&self, batch: &ResourceMetricsData) -> Result<()>;

    /// Flush any buffered state.
    fn force_flush(&self) -> Result<()> {
        Ok(())
    }

    /// Release resources. Subsequent exports may fail.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Exporter that serializes batches as OTLP and ships them over a
/// [`Transport`].
pub struct TransportExporter {
    transport: Box<dyn Transport>,
    serializer: Serializer,
}

impl TransportExporter {
    /// Create an exporter for the transport's content type.
    ///
    /// Fails with a configuration error for unsupported content types.
    pub fn new(transport: Box<dyn Transport>) -> Result<Self> {
        let serializer = Serializer::for_content_type(transport.content_type())?;
        Ok(Self {
            transport,
            serializer,
        })
    }
}

impl MetricExporter for TransportExporter {
    fn export(&self, batch: &ResourceMetricsData) -> Result<()> {
        let request = otlp::export_request(batch);
        let payload = self.serializer.serialize(&request)?;
        self.transport.send(&payload)
    }
}

/// Exporter that retains batches in memory, for tests and local tooling.
#[derive(Clone, Default)]
pub struct InMemoryExporter {
    batches: Arc<Mutex<Vec<ResourceMetricsData>>>,
}

impl InMemoryExporter {
    /// Create an empty exporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// All batches exported so far.
    pub fn batches(&self) -> Vec<ResourceMetricsData> {
        self.batches.lock().clone()
    }
}

impl MetricExporter for InMemoryExporter {
    fn export(&self, batch: &ResourceMetricsData) -> Result<()> {
        self.batches.lock().push(batch.clone());
        Ok(())
    }
}
