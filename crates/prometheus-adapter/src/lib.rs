//! The Prometheus-scrape exporter adapter (C14): an in-process registry
//! keyed by `(metric_name, attribute_set)`, refreshed on every `export`
//! call and rendered as Prometheus text exposition by whoever owns the
//! `/metrics` route (the self-metrics HTTP surface in the binary crate, or
//! a dedicated listener wired the same way).

use async_trait::async_trait;
use dbintel_core::pdata::{Batch, MetricKind, MetricPoint, Record};
use dbintel_core::retry::{DeliveryMetrics, DeliverySnapshot, RetryPolicy};
use dbintel_core::PipelineError;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// A registry key: metric name plus its attributes rendered as sorted
/// `key="value"` pairs, the same grouping Prometheus itself uses for a
/// distinct series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SeriesKey {
    metric: String,
    labels: Vec<(String, String)>,
}

fn series_key(point: &MetricPoint) -> SeriesKey {
    let mut labels: Vec<(String, String)> = point
        .attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.as_str().map(|s| s.to_string()).unwrap_or_else(|| format!("{:?}", v))))
        .collect();
    labels.sort();
    SeriesKey {
        metric: sanitize_metric_name(&point.name),
        labels,
    }
}

fn sanitize_metric_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect()
}

fn render_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let rendered = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", v.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{rendered}}}")
}

#[derive(Debug, Clone, Copy)]
enum SeriesValue {
    Gauge(f64),
    Counter(f64),
}

pub struct PrometheusExporterConfig {
    pub namespace: Option<String>,
    pub retry_policy: RetryPolicy,
}

impl Default for PrometheusExporterConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Scrape-style exporter: `export` just updates the registry in place, it
/// never pushes anywhere. The retry policy and delivery metrics still apply
/// to the (rare) case a consumer pulls and the registry lock is contended
/// past budget; in practice every `export` succeeds synchronously.
pub struct PrometheusExporter {
    config: PrometheusExporterConfig,
    registry: Mutex<BTreeMap<SeriesKey, SeriesValue>>,
    delivery: DeliveryMetrics,
}

impl PrometheusExporter {
    pub fn new(config: PrometheusExporterConfig) -> Self {
        Self {
            config,
            registry: Mutex::new(BTreeMap::new()),
            delivery: DeliveryMetrics::default(),
        }
    }

    fn qualify(&self, metric: &str) -> String {
        match &self.config.namespace {
            Some(ns) => format!("{ns}_{metric}"),
            None => metric.to_string(),
        }
    }

    fn ingest_point(&self, point: &MetricPoint) {
        let key = series_key(point);
        let mut registry = self.registry.lock();
        match &point.kind {
            MetricKind::Gauge => {
                registry.insert(key, SeriesValue::Gauge(point.value.as_f64()));
            }
            MetricKind::Sum { is_monotonic, .. } => {
                let value = if *is_monotonic {
                    SeriesValue::Counter(point.value.as_f64())
                } else {
                    SeriesValue::Gauge(point.value.as_f64())
                };
                registry.insert(key, value);
            }
            MetricKind::Histogram(h) => {
                let mut sum_key = key.clone();
                sum_key.metric = format!("{}_sum", key.metric);
                registry.insert(sum_key, SeriesValue::Counter(h.sum));
                let mut count_key = key.clone();
                count_key.metric = format!("{}_count", key.metric);
                registry.insert(count_key, SeriesValue::Counter(h.count as f64));
                let mut cumulative = 0u64;
                for (bound, count) in h.explicit_bounds.iter().zip(h.bucket_counts.iter()) {
                    cumulative += count;
                    let mut bucket_key = key.clone();
                    bucket_key.metric = format!("{}_bucket", key.metric);
                    bucket_key.labels.push(("le".to_string(), bound.to_string()));
                    registry.insert(bucket_key, SeriesValue::Counter(cumulative as f64));
                }
                let mut inf_key = key.clone();
                inf_key.metric = format!("{}_bucket", key.metric);
                inf_key.labels.push(("le".to_string(), "+Inf".to_string()));
                registry.insert(inf_key, SeriesValue::Counter(h.count as f64));
            }
            MetricKind::Summary(s) => {
                let mut sum_key = key.clone();
                sum_key.metric = format!("{}_sum", key.metric);
                registry.insert(sum_key, SeriesValue::Counter(s.sum));
                let mut count_key = key.clone();
                count_key.metric = format!("{}_count", key.metric);
                registry.insert(count_key, SeriesValue::Counter(s.count as f64));
                for (quantile, value) in &s.quantiles {
                    let mut q_key = key.clone();
                    q_key.labels.push(("quantile".to_string(), quantile.to_string()));
                    registry.insert(q_key, SeriesValue::Gauge(*value));
                }
            }
        }
    }

    /// Renders the current registry as Prometheus text exposition.
    pub fn render(&self) -> String {
        let registry = self.registry.lock();
        let mut out = String::new();
        for (key, value) in registry.iter() {
            let name = self.qualify(&key.metric);
            let labels = render_labels(&key.labels);
            let rendered = match value {
                SeriesValue::Gauge(v) => *v,
                SeriesValue::Counter(v) => *v,
            };
            let _ = writeln!(out, "{name}{labels} {rendered}");
        }
        out
    }

    pub fn delivery_snapshot(&self) -> DeliverySnapshot {
        self.delivery.snapshot()
    }

    pub fn series_count(&self) -> usize {
        self.registry.lock().len()
    }
}

#[async_trait]
impl dbintel_core::traits::Exporter for PrometheusExporter {
    async fn start(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn export(&mut self, batch: &Batch) -> Result<(), PipelineError> {
        for resource in &batch.resources {
            for scope in &resource.scopes {
                for record in &scope.records {
                    if let Record::Metric(point) = record {
                        self.ingest_point(point);
                    }
                }
            }
        }
        self.delivery.record_sent();
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "prometheus"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbintel_core::pdata::{AttributeMap, MetricPoint, Resource, Scope};
    use dbintel_core::traits::Exporter;

    fn metric_batch(point: MetricPoint) -> Batch {
        Batch::single_resource(Resource {
            attributes: AttributeMap::new(),
            scopes: vec![Scope {
                name: "s".into(),
                version: "1".into(),
                records: vec![Record::Metric(point)],
            }],
        })
    }

    #[tokio::test]
    async fn gauge_export_updates_the_registry() {
        let mut exporter = PrometheusExporter::new(PrometheusExporterConfig::default());
        let point = MetricPoint::gauge("db_connections", 5i64).with_attribute("database", "orders");
        exporter.export(&metric_batch(point)).await.unwrap();
        let text = exporter.render();
        assert!(text.contains("db_connections{database=\"orders\"} 5"));
    }

    #[tokio::test]
    async fn namespace_prefixes_every_series_name() {
        let mut exporter = PrometheusExporter::new(PrometheusExporterConfig {
            namespace: Some("dbintel".to_string()),
            ..Default::default()
        });
        exporter.export(&metric_batch(MetricPoint::gauge("up", 1i64))).await.unwrap();
        assert!(exporter.render().contains("dbintel_up "));
    }

    #[tokio::test]
    async fn histogram_export_produces_bucket_sum_and_count_series() {
        let mut exporter = PrometheusExporter::new(PrometheusExporterConfig::default());
        let point = MetricPoint {
            name: "query_latency".into(),
            timestamp: chrono::Utc::now(),
            value: 0i64.into(),
            attributes: AttributeMap::new(),
            kind: MetricKind::Histogram(dbintel_core::pdata::HistogramValue {
                sum: 12.0,
                count: 4,
                bucket_counts: vec![1, 2, 1],
                explicit_bounds: vec![1.0, 5.0],
            }),
        };
        exporter.export(&metric_batch(point)).await.unwrap();
        let text = exporter.render();
        assert!(text.contains("query_latency_sum"));
        assert!(text.contains("query_latency_count"));
        assert!(text.contains("le=\"+Inf\""));
    }
}
