//! Serialization round-trip and OTLP JSON compliance tests.
//!
//! Covers the three content types, the hydrate(serialize(m)) == m law,
//! and the integer-enum requirement of the OTLP JSON mapping.

use mittari::core::AttributeSet;
use mittari::metrics::{InstrumentationScope, Temporality};
use mittari::{InMemoryExporter, Serializer};
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::trace::v1::{span::SpanKind, status, Span, Status};
use serde_json::Value;

mod common;
use common::*;

/// Build a realistic request by running a counter and a histogram through
/// the pipeline and converting the collected batch.
fn sample_request() -> ExportMetricsServiceRequest {
    let (provider, clock) = manual_provider();
    let meter = provider.meter(InstrumentationScope::named("app"));
    let reader = provider.manual_reader(Temporality::Delta);

    let counter = meter.create_counter("requests", Some("1"), Some("served")).unwrap();
    let histogram = meter.create_histogram("latency", Some("ms"), None).unwrap();
    counter.add(5.0, meter.attributes([("code", 200i64)]), None);
    histogram.record(12.5, AttributeSet::empty(), None);
    clock.advance(100);

    let batch = reader.collect().unwrap();
    mittari::export::otlp::export_request(&batch)
}

#[test]
fn test_protobuf_round_trip() {
    let request = sample_request();
    let serializer = Serializer::Protobuf;
    let bytes = serializer.serialize(&request).unwrap();
    let mut decoded = ExportMetricsServiceRequest::default();
    serializer.hydrate(&mut decoded, &bytes).unwrap();
    assert_eq!(decoded, request);
}

#[test]
fn test_json_round_trip() {
    let request = sample_request();
    let serializer = Serializer::Json;
    let bytes = serializer.serialize(&request).unwrap();
    let mut decoded = ExportMetricsServiceRequest::default();
    serializer.hydrate(&mut decoded, &bytes).unwrap();
    assert_eq!(decoded, request);
}

#[test]
fn test_ndjson_round_trip() {
    let request = sample_request();
    let serializer = Serializer::NdJson;
    let bytes = serializer.serialize(&request).unwrap();
    assert_eq!(*bytes.last().unwrap(), b'\n');
    let mut decoded = ExportMetricsServiceRequest::default();
    serializer.hydrate(&mut decoded, &bytes).unwrap();
    assert_eq!(decoded, request);
}

/// Every enum field in the JSON output is integer-typed.
#[test]
fn test_json_enums_are_integers() {
    let request = sample_request();
    let bytes = Serializer::Json.serialize(&request).unwrap();
    let tree: Value = serde_json::from_slice(&bytes).unwrap();

    let metrics = locate_metrics(&tree);
    let mut temporalities = 0;
    for metric in metrics {
        for key in ["sum", "histogram"] {
            let data = metric
                .get(key)
                .or_else(|| metric.get("data").and_then(|d| d.get(key)));
            if let Some(data) = data {
                let field = data
                    .get("aggregationTemporality")
                    .or_else(|| data.get("aggregation_temporality"))
                    .expect("temporality present");
                assert!(field.is_number(), "expected integer enum, got {}", field);
                temporalities += 1;
            }
        }
    }
    assert_eq!(temporalities, 2);
}

/// Scenario: a server span serializes with `kind` as the integer 2.
#[test]
fn test_span_kind_serialized_as_integer() {
    let span = Span {
        name: "GET /users".to_string(),
        kind: SpanKind::Server as i32,
        status: Some(Status {
            message: String::new(),
            code: status::StatusCode::Ok as i32,
        }),
        ..Default::default()
    };
    let bytes = Serializer::Json.serialize(&span).unwrap();
    let tree: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(tree["kind"], Value::from(2));
    let code = &tree["status"]["code"];
    assert!(code.is_number());
}

/// Payloads carrying symbolic enum names hydrate into integer values.
#[test]
fn test_hydrate_symbolic_enum_names() {
    let payload = br#"{"name":"GET /users","kind":"SPAN_KIND_SERVER","status":{"code":"STATUS_CODE_ERROR"}}"#;
    let mut span = Span::default();
    Serializer::Json.hydrate(&mut span, payload).unwrap();
    assert_eq!(span.kind, SpanKind::Server as i32);
    assert_eq!(span.status.unwrap().code, status::StatusCode::Error as i32);
    assert_eq!(span.name, "GET /users");
}

/// Hydration merges: later payloads override scalar fields and fill in
/// missing ones.
#[test]
fn test_json_hydrate_merges() {
    let mut span = Span {
        name: "original".to_string(),
        kind: SpanKind::Internal as i32,
        ..Default::default()
    };
    Serializer::Json
        .hydrate(&mut span, br#"{"kind":"SPAN_KIND_CLIENT"}"#)
        .unwrap();
    assert_eq!(span.name, "original");
    assert_eq!(span.kind, SpanKind::Client as i32);
}

#[test]
fn test_ndjson_hydrates_line_wise() {
    let payload = b"{\"name\":\"first\"}\n{\"kind\":\"SPAN_KIND_SERVER\"}\n";
    let mut span = Span::default();
    Serializer::NdJson.hydrate(&mut span, payload).unwrap();
    assert_eq!(span.name, "first");
    assert_eq!(span.kind, SpanKind::Server as i32);
}

/// The exporter path produces the same batches the reader saw.
#[test]
fn test_in_memory_exporter_round_trip() {
    let (provider, clock) = manual_provider();
    let meter = provider.meter(InstrumentationScope::named("app"));
    let exporter = InMemoryExporter::new();
    let reader = provider.exporting_reader(Temporality::Cumulative, Box::new(exporter.clone()));
    let counter = meter.create_counter("requests", None, None).unwrap();

    counter.add(2.0, AttributeSet::empty(), None);
    clock.advance(100);
    let batch = reader.collect().unwrap();
    assert_eq!(exporter.batches(), vec![batch]);
}

/// Walk to the metric objects regardless of field-name casing.
fn locate_metrics(tree: &Value) -> Vec<&Value> {
    let resource_metrics = tree
        .get("resourceMetrics")
        .or_else(|| tree.get("resource_metrics"))
        .and_then(Value::as_array)
        .expect("resource metrics present");
    resource_metrics
        .iter()
        .flat_map(|rm| {
            rm.get("scopeMetrics")
                .or_else(|| rm.get("scope_metrics"))
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
        })
        .flat_map(|sm| {
            sm.get("metrics")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
        })
        .collect()
}
