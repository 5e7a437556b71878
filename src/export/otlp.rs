//! Conversion from collected pipeline data to OTLP protobuf structs.

use crate::core::{AttributeSet, AttributeValue};
use crate::metrics::aggregation::{Exemplar, MetricData, MetricPoint, SummaryData, Temporality};
use crate::metrics::reader::{MetricRecord, ResourceMetricsData, ScopeMetricsData};
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::common::v1::{
    any_value, AnyValue, ArrayValue, InstrumentationScope, KeyValue,
};
use opentelemetry_proto::tonic::metrics::v1::{
    exemplar, metric, number_data_point, AggregationTemporality, Exemplar as ProtoExemplar, Gauge,
    Histogram, HistogramDataPoint, Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics, Sum,
};
use opentelemetry_proto::tonic::resource::v1::Resource;

/// Build an OTLP export request from one collected batch.
pub fn export_request(batch: &ResourceMetricsData) -> ExportMetricsServiceRequest {
    ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: Some(Resource {
                attributes: key_values(&batch.resource),
                dropped_attributes_count: 0,
            }),
            scope_metrics: batch.scopes.iter().map(scope_metrics).collect(),
            schema_url: String::new(),
        }],
    }
}

fn scope_metrics(scope: &ScopeMetricsData) -> ScopeMetrics {
    ScopeMetrics {
        scope: Some(InstrumentationScope {
            name: scope.scope.name.clone(),
            version: scope.scope.version.clone().unwrap_or_default(),
            attributes: key_values(&scope.scope.attributes),
            dropped_attributes_count: 0,
        }),
        metrics: scope.metrics.iter().map(metric).collect(),
        schema_url: scope.scope.schema_url.clone().unwrap_or_default(),
    }
}

fn metric(record: &MetricRecord) -> Metric {
    let data = match &record.data {
        MetricData::Sum {
            points,
            temporality,
            monotonic,
            start,
            end,
        } => metric::Data::Sum(Sum {
            data_points: points
                .iter()
                .map(|p| number_data_point(p, *start, *end, None))
                .collect(),
            aggregation_temporality: aggregation_temporality(*temporality) as i32,
            is_monotonic: *monotonic,
        }),
        MetricData::Gauge { points, end } => metric::Data::Gauge(Gauge {
            data_points: points
                .iter()
                .map(|p| {
                    let timestamp = match p.summary {
                        SummaryData::LastValue { timestamp, .. } => timestamp,
                        _ => *end,
                    };
                    number_data_point(p, 0, timestamp, Some(last_value_of(p)))
                })
                .collect(),
        }),
        MetricData::Histogram {
            points,
            temporality,
            boundaries,
            start,
            end,
        } => metric::Data::Histogram(Histogram {
            data_points: points
                .iter()
                .map(|p| histogram_data_point(p, boundaries, *start, *end))
                .collect(),
            aggregation_temporality: aggregation_temporality(*temporality) as i32,
        }),
    };
    Metric {
        name: record.instrument.name.clone(),
        description: record.instrument.description.clone().unwrap_or_default(),
        unit: record.instrument.unit.clone().unwrap_or_default(),
        metadata: Vec::new(),
        data: Some(data),
    }
}

fn last_value_of(point: &MetricPoint) -> f64 {
    match point.summary {
        SummaryData::LastValue { value, .. } => value,
        SummaryData::Sum { value } => value,
        _ => 0.0,
    }
}

fn number_data_point(
    point: &MetricPoint,
    start: u64,
    end: u64,
    value_override: Option<f64>,
) -> NumberDataPoint {
    let value = value_override.unwrap_or(match point.summary {
        SummaryData::Sum { value } => value,
        SummaryData::LastValue { value, .. } => value,
        _ => 0.0,
    });
    NumberDataPoint {
        attributes: key_values(&point.attributes),
        start_time_unix_nano: start,
        time_unix_nano: end,
        exemplars: point
            .exemplars
            .iter()
            .map(|e| otlp_exemplar(e, &point.attributes))
            .collect(),
        flags: 0,
        value: Some(number_data_point::Value::AsDouble(value)),
    }
}

fn histogram_data_point(
    point: &MetricPoint,
    boundaries: &[f64],
    start: u64,
    end: u64,
) -> HistogramDataPoint {
    let (count, sum, min, max, bucket_counts) = match &point.summary {
        SummaryData::Histogram {
            count,
            sum,
            min,
            max,
            bucket_counts,
        } => (*count, *sum, *min, *max, bucket_counts.clone()),
        _ => (0, 0.0, f64::INFINITY, f64::NEG_INFINITY, Vec::new()),
    };
    HistogramDataPoint {
        attributes: key_values(&point.attributes),
        start_time_unix_nano: start,
        time_unix_nano: end,
        count,
        sum: Some(sum),
        bucket_counts,
        explicit_bounds: boundaries.to_vec(),
        exemplars: point
            .exemplars
            .iter()
            .map(|e| otlp_exemplar(e, &point.attributes))
            .collect(),
        flags: 0,
        min: (count > 0).then_some(min),
        max: (count > 0).then_some(max),
    }
}

fn otlp_exemplar(source: &Exemplar, point_attributes: &AttributeSet) -> ProtoExemplar {
    // Exemplars carry only the attributes the point's key dropped.
    let filtered_attributes = source
        .attributes
        .iter()
        .filter(|&(key, value)| point_attributes.get(key) != Some(value))
        .map(|(key, value)| key_value(key, value))
        .collect();
    ProtoExemplar {
        filtered_attributes,
        time_unix_nano: source.timestamp,
        span_id: source.span_id.map(|id| id.to_vec()).unwrap_or_default(),
        trace_id: source.trace_id.map(|id| id.to_vec()).unwrap_or_default(),
        value: Some(exemplar::Value::AsDouble(source.value)),
    }
}

fn aggregation_temporality(temporality: Temporality) -> AggregationTemporality {
    match temporality {
        Temporality::Delta => AggregationTemporality::Delta,
        Temporality::Cumulative => AggregationTemporality::Cumulative,
    }
}

fn key_values(attributes: &AttributeSet) -> Vec<KeyValue> {
    attributes
        .iter()
        .map(|(key, value)| key_value(key, value))
        .collect()
}

fn key_value(key: &str, value: &AttributeValue) -> KeyValue {
    KeyValue {
        key: key.to_owned(),
        value: Some(any_value(value)),
    }
}

fn any_value(value: &AttributeValue) -> AnyValue {
    let value = match value {
        AttributeValue::Str(s) => any_value::Value::StringValue(s.clone()),
        AttributeValue::Bool(b) => any_value::Value::BoolValue(*b),
        AttributeValue::I64(i) => any_value::Value::IntValue(*i),
        AttributeValue::F64(f) => any_value::Value::DoubleValue(*f),
        AttributeValue::Array(values) => any_value::Value::ArrayValue(ArrayValue {
            values: values.iter().map(any_value).collect(),
        }),
    };
    AnyValue { value: Some(value) }
}
