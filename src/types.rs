use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Timestamp type (milliseconds since epoch).
pub type Timestamp = u64;

/// Dense dictionary id assigned to a dimension value within one segment.
pub type DictId = u32;

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Interval {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Intersection of two intervals; `None` when they do not overlap.
    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start < end {
            Some(Interval { start, end })
        } else {
            None
        }
    }
}

/// Numeric kind of a metric column. Fixed for the life of the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericKind {
    Long,
    Double,
}

impl std::fmt::Display for NumericKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NumericKind::Long => write!(f, "long"),
            NumericKind::Double => write!(f, "double"),
        }
    }
}

/// A single metric value carried by an ingested row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Long(i64),
    Double(f64),
}

impl MetricValue {
    pub fn kind(&self) -> NumericKind {
        match self {
            MetricValue::Long(_) => NumericKind::Long,
            MetricValue::Double(_) => NumericKind::Double,
        }
    }

    /// Value coerced to a long.
    pub fn as_long(&self) -> i64 {
        match *self {
            MetricValue::Long(v) => v,
            MetricValue::Double(v) => v as i64,
        }
    }

    /// Value coerced to a double.
    pub fn as_double(&self) -> f64 {
        match *self {
            MetricValue::Long(v) => v as f64,
            MetricValue::Double(v) => v,
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Long(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Double(v)
    }
}

/// One ingested event row: a timestamp, string-valued dimensions (possibly
/// multi-valued), and numeric metrics.
///
/// Rows may arrive with out-of-order timestamps; segments preserve insertion
/// order and time ordering is imposed by the bucketed cursors at query time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub timestamp: Timestamp,
    #[serde(default)]
    pub dimensions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricValue>,
}

impl Row {
    pub fn new(timestamp: Timestamp) -> Self {
        Row {
            timestamp,
            dimensions: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }

    /// Adds a single-valued dimension.
    pub fn dim(mut self, name: &str, value: &str) -> Self {
        self.dimensions
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    /// Adds a multi-valued dimension.
    pub fn dims(mut self, name: &str, values: &[&str]) -> Self {
        self.dimensions
            .entry(name.to_string())
            .or_default()
            .extend(values.iter().map(|v| v.to_string()));
        self
    }

    /// Adds a metric value.
    pub fn metric(mut self, name: &str, value: impl Into<MetricValue>) -> Self {
        self.metrics.insert(name.to_string(), value.into());
        self
    }
}
