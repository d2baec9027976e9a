//! The pipeline's in-memory telemetry representation: metric points, log
//! records, and the batch/resource/scope grouping every receiver produces
//! and every processor mutates in place.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A scalar attribute value. Kept small and Copy-ish so attribute maps stay
/// cheap to clone across processor stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

impl AttributeValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(i) => Some(*i as f64),
            AttributeValue::Double(d) => Some(*d),
            AttributeValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            AttributeValue::String(s) => s.parse().ok(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Double(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

pub type AttributeMap = HashMap<String, AttributeValue>;

/// Numeric value of a metric point, kept as int or double per source column
/// typing rather than forcing a lossy conversion at ingest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberValue {
    Int(i64),
    Double(f64),
}

impl NumberValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            NumberValue::Int(i) => *i as f64,
            NumberValue::Double(d) => *d,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramValue {
    pub sum: f64,
    pub count: u64,
    /// Count per bucket, in bound order.
    pub bucket_counts: Vec<u64>,
    /// Upper bound of each bucket except the implicit +Inf final bucket.
    pub explicit_bounds: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryValue {
    pub sum: f64,
    pub count: u64,
    /// (quantile in [0,1], value) pairs as reported by the source.
    pub quantiles: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Temporality {
    Cumulative,
    Delta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricKind {
    Gauge,
    Sum {
        temporality: Temporality,
        is_monotonic: bool,
    },
    Histogram(HistogramValue),
    Summary(SummaryValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub value: NumberValue,
    pub attributes: AttributeMap,
    pub kind: MetricKind,
}

impl MetricPoint {
    pub fn gauge(name: impl Into<String>, value: impl Into<NumberValue>) -> Self {
        Self {
            name: name.into(),
            timestamp: chrono::Utc::now(),
            value: value.into(),
            attributes: AttributeMap::new(),
            kind: MetricKind::Gauge,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl From<i64> for NumberValue {
    fn from(v: i64) -> Self {
        NumberValue::Int(v)
    }
}

impl From<f64> for NumberValue {
    fn from(v: f64) -> Self {
        NumberValue::Double(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Unspecified,
}

impl Severity {
    /// Maps the fixed table from §4.4: case-insensitive source severity
    /// strings to the enumerated severity, unknown values falling back to
    /// `Unspecified`.
    pub fn from_source(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "TRACE" => Severity::Trace,
            "DEBUG" => Severity::Debug,
            "INFO" => Severity::Info,
            "WARN" | "WARNING" => Severity::Warn,
            "ERROR" => Severity::Error,
            "FATAL" | "PANIC" => Severity::Fatal,
            _ => Severity::Unspecified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogBody {
    Text(String),
    Structured(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub severity: Severity,
    pub body: LogBody,
    pub attributes: AttributeMap,
}

/// A span record is carried through the pipeline untouched; no processor in
/// scope inspects or mutates span payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    pub name: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub attributes: AttributeMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Metric(MetricPoint),
    Log(LogRecord),
    Span(SpanRecord),
}

impl Record {
    pub fn attributes(&self) -> &AttributeMap {
        match self {
            Record::Metric(m) => &m.attributes,
            Record::Log(l) => &l.attributes,
            Record::Span(s) => &s.attributes,
        }
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeMap {
        match self {
            Record::Metric(m) => &mut m.attributes,
            Record::Log(l) => &mut l.attributes,
            Record::Span(s) => &mut s.attributes,
        }
    }

    pub fn timestamp(&self) -> chrono::DateTime<chrono::Utc> {
        match self {
            Record::Metric(m) => m.timestamp,
            Record::Log(l) => l.timestamp,
            Record::Span(s) => s.timestamp,
        }
    }
}

/// Instrumentation scope: a sequence of records sharing a common producer
/// identity. Record order within a scope is preserved end to end (§5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    pub version: String,
    pub records: Vec<Record>,
}

/// Identity of the producing entity (service, host, database instance).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resource {
    pub attributes: AttributeMap,
    pub scopes: Vec<Scope>,
}

impl Resource {
    /// Adds a resource attribute if and only if it is not already present;
    /// invariant §3.2 forbids downstream processors from ever deleting one.
    pub fn add_attribute_if_absent(&mut self, key: &str, value: AttributeValue) {
        self.attributes.entry(key.to_string()).or_insert(value);
    }

    pub fn record_count(&self) -> usize {
        self.scopes.iter().map(|s| s.records.len()).sum()
    }
}

/// The unit a receiver produces and an exporter consumes: a set of
/// resources, each carrying scopes of records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Batch {
    pub resources: Vec<Resource>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single_resource(resource: Resource) -> Self {
        Self {
            resources: vec![resource],
        }
    }

    pub fn record_count(&self) -> usize {
        self.resources.iter().map(|r| r.record_count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    /// Drops scopes left empty by a processor, honoring the
    /// throughput-preserving property from §4.7.
    pub fn prune_empty_scopes(&mut self) {
        for resource in &mut self.resources {
            resource.scopes.retain(|s| !s.records.is_empty());
        }
    }

    pub fn for_each_record_mut(&mut self, mut f: impl FnMut(&mut Record)) {
        for resource in &mut self.resources {
            for scope in &mut resource.scopes {
                for record in &mut scope.records {
                    f(record);
                }
            }
        }
    }

    pub fn retain_records(&mut self, mut keep: impl FnMut(&Record) -> bool) {
        for resource in &mut self.resources {
            for scope in &mut resource.scopes {
                scope.records.retain(|r| keep(r));
            }
        }
        self.prune_empty_scopes();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadKind {
    Metrics,
    Logs,
    Traces,
}

impl Batch {
    /// The payload kind present in this batch, used for pipeline-construction
    /// time compatibility checks (§9 dynamic dispatch across processors).
    /// A mixed batch reports the kind of its first record; pipelines built
    /// from this core only ever construct single-kind batches per receiver.
    pub fn payload_kind(&self) -> Option<PayloadKind> {
        self.resources
            .iter()
            .flat_map(|r| &r.scopes)
            .flat_map(|s| &s.records)
            .next()
            .map(|r| match r {
                Record::Metric(_) => PayloadKind::Metrics,
                Record::Log(_) => PayloadKind::Logs,
                Record::Span(_) => PayloadKind::Traces,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_maps_known_and_unknown_values() {
        assert_eq!(Severity::from_source("warning"), Severity::Warn);
        assert_eq!(Severity::from_source("WARN"), Severity::Warn);
        assert_eq!(Severity::from_source("whatever"), Severity::Unspecified);
    }

    #[test]
    fn prune_empty_scopes_removes_drained_scopes() {
        let mut batch = Batch::single_resource(Resource {
            attributes: AttributeMap::new(),
            scopes: vec![Scope {
                name: "s".into(),
                version: "1".into(),
                records: vec![],
            }],
        });
        batch.prune_empty_scopes();
        assert!(batch.resources[0].scopes.is_empty());
    }

    #[test]
    fn resource_attribute_is_never_overwritten() {
        let mut r = Resource::default();
        r.add_attribute_if_absent("db.system", "postgresql".into());
        r.add_attribute_if_absent("db.system", "mysql".into());
        assert_eq!(
            r.attributes.get("db.system").and_then(|v| v.as_str()),
            Some("postgresql")
        );
    }
}
