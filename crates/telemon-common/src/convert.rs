//! Conversions between the protobuf schema and the domain types.

use crate::proto::{MetricKind as ProtoKind, MetricProto};
use crate::types::{Metric, MetricDto, MetricKind, MetricValue};

impl From<MetricKind> for ProtoKind {
    fn from(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Gauge => ProtoKind::Gauge,
            MetricKind::Counter => ProtoKind::Counter,
        }
    }
}

/// Maps a raw protobuf kind onto the wire string; anything that is not a
/// known kind becomes an empty string and fails validation downstream.
pub fn kind_name(raw: i32) -> String {
    match ProtoKind::try_from(raw) {
        Ok(ProtoKind::Gauge) => MetricKind::Gauge.to_string(),
        Ok(ProtoKind::Counter) => MetricKind::Counter.to_string(),
        _ => String::new(),
    }
}

impl From<&Metric> for MetricProto {
    fn from(metric: &Metric) -> Self {
        let (gauge_value, counter_value) = match metric.value {
            MetricValue::Gauge(v) => (Some(v), None),
            MetricValue::Counter(v) => (None, Some(v)),
        };
        MetricProto {
            id: metric.name.clone(),
            kind: ProtoKind::from(metric.kind()) as i32,
            gauge_value,
            counter_value,
        }
    }
}

impl From<MetricProto> for MetricDto {
    fn from(proto: MetricProto) -> Self {
        MetricDto {
            kind: kind_name(proto.kind),
            id: proto.id,
            gauge_value: proto.gauge_value,
            counter_value: proto.counter_value,
        }
    }
}
