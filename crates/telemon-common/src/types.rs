use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors raised while validating an incoming metric.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("metric name must not be empty")]
    EmptyName,

    #[error("unknown metric kind: {0:?}")]
    UnknownKind(String),

    #[error("metric {id:?} of kind {kind} has no {kind} value")]
    MissingValue { id: String, kind: MetricKind },

    #[error("invalid {kind} value: {value:?}")]
    InvalidValue { kind: MetricKind, value: String },
}

/// The two metric semantics understood by the pipeline.
///
/// # Examples
///
/// ```
/// use telemon_common::types::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(kind.to_string(), "counter");
/// assert!("histogram".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            _ => Err(ValidationError::UnknownKind(s.to_string())),
        }
    }
}

/// A metric value. The variant is the kind tag, so a value slot that
/// disagrees with its kind cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Parses a textual value as the type `kind` demands: `i64` for
    /// counters, finite `f64` for gauges.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidValue {
            kind,
            value: raw.to_string(),
        };
        match kind {
            MetricKind::Gauge => raw
                .parse::<f64>()
                .map_err(|_| invalid())
                .and_then(|v| MetricValue::gauge_checked(v).map_err(|_| invalid())),
            MetricKind::Counter => raw.parse::<i64>().map(MetricValue::Counter).map_err(|_| invalid()),
        }
    }

    /// NaN and infinities have no JSON or SQL representation and are refused.
    pub fn gauge_checked(value: f64) -> Result<Self, ValidationError> {
        if value.is_finite() {
            Ok(MetricValue::Gauge(value))
        } else {
            Err(ValidationError::InvalidValue {
                kind: MetricKind::Gauge,
                value: value.to_string(),
            })
        }
    }

    /// Composes a stored value with an incoming one.
    ///
    /// Counters add (wrapping on `i64` overflow), gauges are replaced, and a
    /// kind change replaces the value outright.
    ///
    /// # Examples
    ///
    /// ```
    /// use telemon_common::types::MetricValue;
    ///
    /// assert_eq!(MetricValue::Counter(3).merge(MetricValue::Counter(4)), MetricValue::Counter(7));
    /// assert_eq!(MetricValue::Gauge(1.0).merge(MetricValue::Gauge(2.5)), MetricValue::Gauge(2.5));
    /// assert_eq!(MetricValue::Gauge(1.1).merge(MetricValue::Counter(2)), MetricValue::Counter(2));
    /// ```
    pub fn merge(self, new: MetricValue) -> MetricValue {
        match (self, new) {
            (MetricValue::Counter(old), MetricValue::Counter(delta)) => {
                MetricValue::Counter(old.wrapping_add(delta))
            }
            (_, new) => new,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(v) => write!(f, "{v}"),
        }
    }
}

/// A named metric as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MetricRecord", into = "MetricRecord")]
pub struct Metric {
    pub name: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Counter(delta),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    pub fn gauge_value(&self) -> Option<f64> {
        match self.value {
            MetricValue::Gauge(v) => Some(v),
            MetricValue::Counter(_) => None,
        }
    }

    pub fn counter_value(&self) -> Option<i64> {
        match self.value {
            MetricValue::Counter(v) => Some(v),
            MetricValue::Gauge(_) => None,
        }
    }

    /// Returns the metric that results from applying `new` on top of `self`.
    pub fn merge(&self, new: &Metric) -> Metric {
        Metric {
            name: new.name.clone(),
            value: self.value.merge(new.value),
        }
    }
}

/// A JSON number that may have been written as either an integer or a float.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(v) => v as f64,
            Number::Float(v) => v,
        }
    }

    fn as_i64(self) -> i64 {
        match self {
            Number::Int(v) => v,
            Number::Float(v) => v as i64,
        }
    }
}

/// Persisted shape of a [`Metric`]: the kind tag plus one value slot.
/// Numbers are coerced to the slot type the tag demands.
#[derive(Debug, Serialize, Deserialize)]
struct MetricRecord {
    name: String,
    kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gauge_value: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    counter_value: Option<Number>,
}

impl TryFrom<MetricRecord> for Metric {
    type Error = ValidationError;

    fn try_from(record: MetricRecord) -> Result<Self, Self::Error> {
        if record.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        let missing = || ValidationError::MissingValue {
            id: record.name.clone(),
            kind: record.kind,
        };
        let value = match record.kind {
            MetricKind::Gauge => MetricValue::Gauge(record.gauge_value.ok_or_else(missing)?.as_f64()),
            MetricKind::Counter => {
                MetricValue::Counter(record.counter_value.ok_or_else(missing)?.as_i64())
            }
        };
        Ok(Metric {
            name: record.name,
            value,
        })
    }
}

impl From<Metric> for MetricRecord {
    fn from(metric: Metric) -> Self {
        let kind = metric.kind();
        let (gauge_value, counter_value) = match metric.value {
            MetricValue::Gauge(v) => (Some(Number::Float(v)), None),
            MetricValue::Counter(v) => (None, Some(Number::Int(v))),
        };
        MetricRecord {
            name: metric.name,
            kind,
            gauge_value,
            counter_value,
        }
    }
}

/// Wire envelope for a single metric, as exchanged over HTTP.
///
/// `kind` stays a plain string so an unknown kind is reported as a
/// validation failure rather than a decode failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDto {
    pub id: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gauge_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_value: Option<i64>,
}

impl MetricDto {
    /// Checks kind, id, and value slot, and returns the domain metric.
    ///
    /// # Examples
    ///
    /// ```
    /// use telemon_common::types::{Metric, MetricDto};
    ///
    /// let dto = MetricDto {
    ///     id: "hits".into(),
    ///     kind: "counter".into(),
    ///     gauge_value: None,
    ///     counter_value: Some(3),
    /// };
    /// assert_eq!(dto.validate().unwrap(), Metric::counter("hits", 3));
    /// ```
    pub fn validate(&self) -> Result<Metric, ValidationError> {
        let kind: MetricKind = self.kind.parse()?;
        if self.id.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        let missing = || ValidationError::MissingValue {
            id: self.id.clone(),
            kind,
        };
        let value = match kind {
            MetricKind::Gauge => MetricValue::gauge_checked(self.gauge_value.ok_or_else(missing)?)?,
            MetricKind::Counter => MetricValue::Counter(self.counter_value.ok_or_else(missing)?),
        };
        Ok(Metric {
            name: self.id.clone(),
            value,
        })
    }
}

impl From<&Metric> for MetricDto {
    fn from(metric: &Metric) -> Self {
        MetricDto {
            id: metric.name.clone(),
            kind: metric.kind().to_string(),
            gauge_value: metric.gauge_value(),
            counter_value: metric.counter_value(),
        }
    }
}

impl From<Metric> for MetricDto {
    fn from(metric: Metric) -> Self {
        MetricDto::from(&metric)
    }
}

/// Body of a single-metric lookup (`POST /value/`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub id: String,
    pub kind: String,
}
