//! Wire serialization: protobuf, JSON, and newline-delimited JSON.
//!
//! The OTLP JSON mapping requires enum fields to carry their integer
//! values, but symbolic names show up in payloads produced by other SDKs
//! and in hand-written fixtures. Serialization and hydration therefore
//! normalize the JSON tree against bundled per-message field tables,
//! replacing any symbolic enum name with the integer from the generated
//! enum's value map. Message types without a registered table pass
//! through unchanged.

use crate::core::{MetricsError, Result};
use opentelemetry_proto::tonic::metrics::v1::AggregationTemporality;
use opentelemetry_proto::tonic::trace::v1::span::SpanKind;
use opentelemetry_proto::tonic::trace::v1::status::StatusCode;
use prost::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

/// OTLP binary protobuf.
pub const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";
/// OTLP JSON.
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// One OTLP JSON object per line.
pub const CONTENT_TYPE_NDJSON: &str = "application/x-ndjson";

/// Encodes and decodes OTLP messages for one content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serializer {
    /// Protobuf wire bytes
    Protobuf,
    /// JSON object
    Json,
    /// JSON object terminated by a newline
    NdJson,
}

impl Serializer {
    /// Select the serializer for a transport's content type.
    pub fn for_content_type(content_type: &str) -> Result<Self> {
        match content_type {
            CONTENT_TYPE_PROTOBUF => Ok(Self::Protobuf),
            CONTENT_TYPE_JSON => Ok(Self::Json),
            CONTENT_TYPE_NDJSON => Ok(Self::NdJson),
            other => Err(MetricsError::configuration(format!(
                "Not supported content type: {}",
                other
            ))),
        }
    }

    /// The content type this serializer produces.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Protobuf => CONTENT_TYPE_PROTOBUF,
            Self::Json => CONTENT_TYPE_JSON,
            Self::NdJson => CONTENT_TYPE_NDJSON,
        }
    }

    /// Encode a 16-byte trace id: raw bytes for protobuf, lowercase hex
    /// for the JSON encodings.
    pub fn serialize_trace_id(&self, trace_id: &[u8; 16]) -> Vec<u8> {
        match self {
            Self::Protobuf => trace_id.to_vec(),
            Self::Json | Self::NdJson => hex::encode(trace_id).into_bytes(),
        }
    }

    /// Encode an 8-byte span id: raw bytes for protobuf, lowercase hex
    /// for the JSON encodings.
    pub fn serialize_span_id(&self, span_id: &[u8; 8]) -> Vec<u8> {
        match self {
            Self::Protobuf => span_id.to_vec(),
            Self::Json | Self::NdJson => hex::encode(span_id).into_bytes(),
        }
    }

    /// Serialize a message.
    pub fn serialize<M>(&self, message: &M) -> Result<Vec<u8>>
    where
        M: Message + Serialize,
    {
        match self {
            Self::Protobuf => Ok(message.encode_to_vec()),
            Self::Json => self.to_normalized_json(message),
            Self::NdJson => {
                let mut bytes = self.to_normalized_json(message)?;
                bytes.push(b'\n');
                Ok(bytes)
            },
        }
    }

    /// Merge a serialized payload into an existing message.
    pub fn hydrate<M>(&self, target: &mut M, payload: &[u8]) -> Result<()>
    where
        M: Message + Serialize + DeserializeOwned + Default,
    {
        match self {
            Self::Protobuf => {
                target.merge(payload)?;
                Ok(())
            },
            Self::Json => self.hydrate_json(target, payload),
            Self::NdJson => {
                for line in payload.split(|b| *b == b'\n') {
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    self.hydrate_json(target, line)?;
                }
                Ok(())
            },
        }
    }

    fn to_normalized_json<M>(&self, message: &M) -> Result<Vec<u8>>
    where
        M: Message + Serialize,
    {
        let mut tree = serde_json::to_value(message)?;
        coerce_enums(&mut tree, message_key::<M>());
        Ok(serde_json::to_vec(&tree)?)
    }

    fn hydrate_json<M>(&self, target: &mut M, payload: &[u8]) -> Result<()>
    where
        M: Message + Serialize + DeserializeOwned,
    {
        let mut incoming: Value = serde_json::from_slice(payload)?;
        coerce_enums(&mut incoming, message_key::<M>());
        let mut base = serde_json::to_value(&*target)?;
        json_merge(&mut base, incoming);
        *target = serde_json::from_value(base)?;
        Ok(())
    }
}

/// Recursive JSON merge: objects merge key-wise, everything else is
/// replaced by the incoming value.
fn json_merge(base: &mut Value, incoming: Value) {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                match base_map.get_mut(&key) {
                    Some(existing) => json_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    },
                }
            }
        },
        (base, incoming) => *base = incoming,
    }
}

type EnumLookup = fn(&str) -> Option<i32>;

enum FieldKind {
    Enum(EnumLookup),
    Message(&'static str),
}

struct FieldDescriptor {
    name: &'static str,
    kind: FieldKind,
}

/// Derive the registry key for a generated message type from its Rust
/// path, e.g. `...::tonic::metrics::v1::Metric` -> `metrics::v1::Metric`.
fn message_key<M>() -> &'static str {
    let full = std::any::type_name::<M>();
    match full.split_once("::tonic::") {
        Some((_, key)) => key,
        None => full,
    }
}

fn span_kind_value(name: &str) -> Option<i32> {
    SpanKind::from_str_name(name).map(|v| v as i32)
}

fn status_code_value(name: &str) -> Option<i32> {
    StatusCode::from_str_name(name).map(|v| v as i32)
}

fn temporality_value(name: &str) -> Option<i32> {
    AggregationTemporality::from_str_name(name).map(|v| v as i32)
}

/// Field tables for every message on the export paths. The generated
/// `from_str_name` functions are the compile-time enum value maps.
fn descriptor_registry() -> &'static HashMap<&'static str, Vec<FieldDescriptor>> {
    static REGISTRY: OnceLock<HashMap<&'static str, Vec<FieldDescriptor>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = HashMap::new();
        registry.insert(
            "collector::metrics::v1::ExportMetricsServiceRequest",
            vec![FieldDescriptor {
                name: "resource_metrics",
                kind: FieldKind::Message("metrics::v1::ResourceMetrics"),
            }],
        );
        registry.insert(
            "metrics::v1::ResourceMetrics",
            vec![FieldDescriptor {
                name: "scope_metrics",
                kind: FieldKind::Message("metrics::v1::ScopeMetrics"),
            }],
        );
        registry.insert(
            "metrics::v1::ScopeMetrics",
            vec![FieldDescriptor {
                name: "metrics",
                kind: FieldKind::Message("metrics::v1::Metric"),
            }],
        );
        registry.insert(
            "metrics::v1::Metric",
            vec![
                FieldDescriptor {
                    name: "sum",
                    kind: FieldKind::Message("metrics::v1::Sum"),
                },
                FieldDescriptor {
                    name: "histogram",
                    kind: FieldKind::Message("metrics::v1::Histogram"),
                },
            ],
        );
        registry.insert(
            "metrics::v1::Sum",
            vec![FieldDescriptor {
                name: "aggregation_temporality",
                kind: FieldKind::Enum(temporality_value),
            }],
        );
        registry.insert(
            "metrics::v1::Histogram",
            vec![FieldDescriptor {
                name: "aggregation_temporality",
                kind: FieldKind::Enum(temporality_value),
            }],
        );
        registry.insert(
            "collector::trace::v1::ExportTraceServiceRequest",
            vec![FieldDescriptor {
                name: "resource_spans",
                kind: FieldKind::Message("trace::v1::ResourceSpans"),
            }],
        );
        registry.insert(
            "trace::v1::ResourceSpans",
            vec![FieldDescriptor {
                name: "scope_spans",
                kind: FieldKind::Message("trace::v1::ScopeSpans"),
            }],
        );
        registry.insert(
            "trace::v1::ScopeSpans",
            vec![FieldDescriptor {
                name: "spans",
                kind: FieldKind::Message("trace::v1::Span"),
            }],
        );
        registry.insert(
            "trace::v1::Span",
            vec![
                FieldDescriptor {
                    name: "kind",
                    kind: FieldKind::Enum(span_kind_value),
                },
                FieldDescriptor {
                    name: "status",
                    kind: FieldKind::Message("trace::v1::Status"),
                },
            ],
        );
        registry.insert(
            "trace::v1::Status",
            vec![FieldDescriptor {
                name: "code",
                kind: FieldKind::Enum(status_code_value),
            }],
        );
        registry
    })
}

/// Convert a `snake_case` descriptor field name to the `camelCase` name
/// used in the JSON payload.
fn snake_to_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Walk the JSON tree of `message_key`, replacing symbolic enum names
/// with their integer values and recursing into message-typed fields
/// (element-wise for repeated fields). Oneof payloads may appear either
/// inline or nested under a `data` wrapper; both shapes are handled.
fn coerce_enums(value: &mut Value, message_key: &str) {
    let Some(fields) = descriptor_registry().get(message_key) else {
        return;
    };
    match value {
        Value::Array(items) => {
            for item in items {
                coerce_enums(item, message_key);
            }
        },
        Value::Object(map) => {
            for field in fields {
                let camel = snake_to_camel(field.name);
                if map.contains_key(camel.as_str()) || map.contains_key(field.name) {
                    if let Some(slot) = field_slot(map, &camel, field.name) {
                        apply_field(slot, &field.kind);
                    }
                } else if let Some(data) = map.get_mut("data").and_then(|v| v.as_object_mut()) {
                    if let Some(slot) = field_slot(data, &camel, field.name) {
                        apply_field(slot, &field.kind);
                    }
                }
            }
        },
        _ => {},
    }
}

fn field_slot<'a>(
    map: &'a mut serde_json::Map<String, Value>,
    camel: &str,
    snake: &str,
) -> Option<&'a mut Value> {
    if map.contains_key(camel) {
        return map.get_mut(camel);
    }
    map.get_mut(snake)
}

fn apply_field(slot: &mut Value, kind: &FieldKind) {
    match kind {
        FieldKind::Enum(lookup) => coerce_enum_value(slot, *lookup),
        FieldKind::Message(child_key) => coerce_enums(slot, child_key),
    }
}

fn coerce_enum_value(value: &mut Value, lookup: EnumLookup) {
    match value {
        Value::String(name) => {
            if let Some(number) = lookup(name) {
                *value = Value::from(number);
            }
        },
        Value::Array(items) => {
            for item in items {
                coerce_enum_value(item, lookup);
            }
        },
        _ => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_type_selection() {
        assert_eq!(
            Serializer::for_content_type("application/x-protobuf").unwrap(),
            Serializer::Protobuf
        );
        assert_eq!(
            Serializer::for_content_type("application/json").unwrap(),
            Serializer::Json
        );
        assert_eq!(
            Serializer::for_content_type("application/x-ndjson").unwrap(),
            Serializer::NdJson
        );
        let err = Serializer::for_content_type("text/plain").unwrap_err();
        assert!(err.to_string().contains("Not supported content type"));
    }

    #[test]
    fn test_snake_to_camel() {
        assert_eq!(snake_to_camel("aggregation_temporality"), "aggregationTemporality");
        assert_eq!(snake_to_camel("kind"), "kind");
        assert_eq!(snake_to_camel("start_time_unix_nano"), "startTimeUnixNano");
    }

    #[test]
    fn test_trace_id_encodings() {
        let trace_id = [0xABu8; 16];
        let span_id = [0x01u8; 8];
        assert_eq!(Serializer::Protobuf.serialize_trace_id(&trace_id), trace_id.to_vec());
        assert_eq!(
            Serializer::Json.serialize_trace_id(&trace_id),
            b"abababababababababababababababab".to_vec()
        );
        assert_eq!(
            Serializer::NdJson.serialize_span_id(&span_id),
            b"0101010101010101".to_vec()
        );
        assert_eq!(Serializer::Protobuf.serialize_span_id(&span_id), span_id.to_vec());
    }

    #[test]
    fn test_symbolic_span_kind_coerced() {
        let mut tree = json!({
            "name": "GET /users",
            "kind": "SPAN_KIND_SERVER",
            "status": { "code": "STATUS_CODE_ERROR" }
        });
        coerce_enums(&mut tree, "trace::v1::Span");
        assert_eq!(tree["kind"], json!(2));
        assert_eq!(tree["status"]["code"], json!(2));
    }

    #[test]
    fn test_symbolic_temporality_coerced_through_nesting() {
        let mut tree = json!({
            "resourceMetrics": [{
                "scopeMetrics": [{
                    "metrics": [{
                        "name": "requests",
                        "sum": {
                            "aggregationTemporality": "AGGREGATION_TEMPORALITY_DELTA"
                        }
                    }]
                }]
            }]
        });
        coerce_enums(&mut tree, "collector::metrics::v1::ExportMetricsServiceRequest");
        assert_eq!(
            tree["resourceMetrics"][0]["scopeMetrics"][0]["metrics"][0]["sum"]
                ["aggregationTemporality"],
            json!(1)
        );
    }

    #[test]
    fn test_oneof_under_data_wrapper() {
        let mut tree = json!({
            "name": "requests",
            "data": {
                "sum": { "aggregationTemporality": "AGGREGATION_TEMPORALITY_CUMULATIVE" }
            }
        });
        coerce_enums(&mut tree, "metrics::v1::Metric");
        assert_eq!(tree["data"]["sum"]["aggregationTemporality"], json!(2));
    }

    #[test]
    fn test_unknown_message_passes_through() {
        let mut tree = json!({ "kind": "SPAN_KIND_SERVER" });
        let original = tree.clone();
        coerce_enums(&mut tree, "unknown::v1::Message");
        assert_eq!(tree, original);
    }

    #[test]
    fn test_unknown_enum_name_left_alone() {
        let mut tree = json!({ "kind": "SPAN_KIND_FANCY" });
        coerce_enums(&mut tree, "trace::v1::Span");
        assert_eq!(tree["kind"], json!("SPAN_KIND_FANCY"));
    }

    #[test]
    fn test_integer_enum_untouched() {
        let mut tree = json!({ "kind": 2 });
        coerce_enums(&mut tree, "trace::v1::Span");
        assert_eq!(tree["kind"], json!(2));
    }

    #[test]
    fn test_json_merge_semantics() {
        let mut base = json!({ "a": { "x": 1, "y": 2 }, "keep": true });
        json_merge(&mut base, json!({ "a": { "y": 3 }, "new": "v" }));
        assert_eq!(base, json!({ "a": { "x": 1, "y": 3 }, "keep": true, "new": "v" }));
    }

    #[test]
    fn test_message_key_strips_crate_path() {
        assert_eq!(
            message_key::<opentelemetry_proto::tonic::metrics::v1::Metric>(),
            "metrics::v1::Metric"
        );
    }
}
