//! C12: OHI transform. Converts OTLP-shaped metric points into the flat,
//! event-shaped records the legacy New Relic integration protocol expects,
//! expanding histograms and summaries into one record per bucket/quantile
//! plus any configured percentiles interpolated from them (§4.12).

use dbintel_core::pdata::{
    AttributeMap, AttributeValue, Batch, LogBody, LogRecord, MetricKind, MetricPoint, Record, Severity,
};

pub struct OhiTransformConfig {
    /// Requested percentiles in [0, 1], interpolated from histogram buckets
    /// or summary quantiles when not already present verbatim.
    pub percentiles: Vec<f64>,
}

impl Default for OhiTransformConfig {
    fn default() -> Self {
        Self {
            percentiles: vec![0.5, 0.95, 0.99],
        }
    }
}

pub struct OhiTransform {
    config: OhiTransformConfig,
}

fn event_type_for(metric_name: &str) -> String {
    metric_name
        .split(|c: char| c == '.' || c == '_')
        .filter(|s| !s.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<String>()
}

fn log_event(event_type: &str, mut attributes: AttributeMap, timestamp: chrono::DateTime<chrono::Utc>) -> Record {
    attributes.insert("eventType".to_string(), AttributeValue::String(event_type.to_string()));
    Record::Log(LogRecord {
        timestamp,
        severity: Severity::Info,
        body: LogBody::Text(event_type.to_string()),
        attributes,
    })
}

/// The last bucket's upper bound is always unbounded, so a quantile landing
/// there can't be linearly interpolated toward infinity. Falls back to the
/// midpoint of the last finite bucket instead of extrapolating past its
/// upper bound or clamping to it directly.
fn last_finite_bucket_midpoint(explicit_bounds: &[f64], fallback: f64) -> f64 {
    match explicit_bounds.len() {
        0 => fallback,
        1 => explicit_bounds[0] / 2.0,
        n => (explicit_bounds[n - 2] + explicit_bounds[n - 1]) / 2.0,
    }
}

/// Linear interpolation over cumulative histogram bucket boundaries. Each
/// bucket's cumulative fraction of `count` is used to locate the two
/// boundaries the requested quantile falls between.
fn interpolate_histogram_percentile(bucket_counts: &[u64], explicit_bounds: &[f64], count: u64, quantile: f64) -> Option<f64> {
    if count == 0 || bucket_counts.is_empty() {
        return None;
    }
    let target = quantile * count as f64;
    let mut cumulative = 0u64;
    let mut prev_bound = 0.0f64;
    for (i, bucket_count) in bucket_counts.iter().enumerate() {
        let upper_bound = explicit_bounds.get(i).copied().unwrap_or(f64::INFINITY);
        let next_cumulative = cumulative + bucket_count;
        if (next_cumulative as f64) >= target {
            if upper_bound.is_infinite() {
                return Some(last_finite_bucket_midpoint(explicit_bounds, prev_bound));
            }
            if *bucket_count == 0 {
                return Some(prev_bound);
            }
            let fraction = (target - cumulative as f64) / *bucket_count as f64;
            return Some(prev_bound + fraction * (upper_bound - prev_bound));
        }
        cumulative = next_cumulative;
        prev_bound = upper_bound;
    }
    Some(last_finite_bucket_midpoint(explicit_bounds, prev_bound))
}

/// Linear interpolation between the two reported quantiles bracketing the
/// requested one; falls back to the nearest edge quantile outside the
/// reported range.
fn interpolate_summary_percentile(quantiles: &[(f64, f64)], target: f64) -> Option<f64> {
    if quantiles.is_empty() {
        return None;
    }
    let mut sorted = quantiles.to_vec();
    sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    if let Some((_, v)) = sorted.iter().find(|(q, _)| (*q - target).abs() < 1e-9) {
        return Some(*v);
    }
    if target <= sorted[0].0 {
        return Some(sorted[0].1);
    }
    if target >= sorted[sorted.len() - 1].0 {
        return Some(sorted[sorted.len() - 1].1);
    }
    for window in sorted.windows(2) {
        let (q_lo, v_lo) = window[0];
        let (q_hi, v_hi) = window[1];
        if target >= q_lo && target <= q_hi {
            let fraction = (target - q_lo) / (q_hi - q_lo);
            return Some(v_lo + fraction * (v_hi - v_lo));
        }
    }
    None
}

impl OhiTransform {
    pub fn new(config: OhiTransformConfig) -> Self {
        Self { config }
    }

    fn transform_point(&self, point: MetricPoint) -> Vec<Record> {
        let event_type = event_type_for(&point.name);
        match point.kind {
            MetricKind::Gauge | MetricKind::Sum { .. } => {
                let mut attrs = point.attributes.clone();
                attrs.insert("value".to_string(), AttributeValue::Double(point.value.as_f64()));
                vec![log_event(&event_type, attrs, point.timestamp)]
            }
            MetricKind::Histogram(ref h) => {
                let mut records = Vec::new();
                let mut summary_attrs = point.attributes.clone();
                summary_attrs.insert("sum".to_string(), AttributeValue::Double(h.sum));
                summary_attrs.insert("count".to_string(), AttributeValue::Int(h.count as i64));
                for p in &self.config.percentiles {
                    if let Some(value) = interpolate_histogram_percentile(&h.bucket_counts, &h.explicit_bounds, h.count, *p) {
                        summary_attrs.insert(format!("p{}", (*p * 100.0) as u32), AttributeValue::Double(value));
                    }
                }
                records.push(log_event(&event_type, summary_attrs, point.timestamp));

                let mut lower = 0.0f64;
                for (i, bucket_count) in h.bucket_counts.iter().enumerate() {
                    let upper = h.explicit_bounds.get(i).copied().unwrap_or(f64::INFINITY);
                    let mut attrs = point.attributes.clone();
                    attrs.insert("bucket_lower_bound".to_string(), AttributeValue::Double(lower));
                    attrs.insert("bucket_upper_bound".to_string(), AttributeValue::Double(upper));
                    attrs.insert("bucket_count".to_string(), AttributeValue::Int(*bucket_count as i64));
                    records.push(log_event(&format!("{event_type}Bucket"), attrs, point.timestamp));
                    lower = upper;
                }
                records
            }
            MetricKind::Summary(ref s) => {
                let mut records = Vec::new();
                let mut summary_attrs = point.attributes.clone();
                summary_attrs.insert("sum".to_string(), AttributeValue::Double(s.sum));
                summary_attrs.insert("count".to_string(), AttributeValue::Int(s.count as i64));
                for p in &self.config.percentiles {
                    if let Some(value) = interpolate_summary_percentile(&s.quantiles, *p) {
                        summary_attrs.insert(format!("p{}", (*p * 100.0) as u32), AttributeValue::Double(value));
                    }
                }
                records.push(log_event(&event_type, summary_attrs, point.timestamp));

                for (quantile, value) in &s.quantiles {
                    let mut attrs = point.attributes.clone();
                    attrs.insert("quantile".to_string(), AttributeValue::Double(*quantile));
                    attrs.insert("value".to_string(), AttributeValue::Double(*value));
                    records.push(log_event(&format!("{event_type}Quantile"), attrs, point.timestamp));
                }
                records
            }
        }
    }

    /// Replaces every metric record in `batch` with its OHI-shaped event
    /// expansion, leaving log and span records untouched.
    pub fn transform(&self, batch: &mut Batch) {
        for resource in &mut batch.resources {
            for scope in &mut resource.scopes {
                let mut expanded = Vec::with_capacity(scope.records.len());
                for record in scope.records.drain(..) {
                    match record {
                        Record::Metric(point) => expanded.extend(self.transform_point(point)),
                        other => expanded.push(other),
                    }
                }
                scope.records = expanded;
            }
        }
        batch.prune_empty_scopes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbintel_core::pdata::{HistogramValue, NumberValue, Resource, Scope, SummaryValue};

    fn wrap(records: Vec<Record>) -> Batch {
        Batch::single_resource(Resource {
            attributes: Default::default(),
            scopes: vec![Scope {
                name: "db".into(),
                version: "1".into(),
                records,
            }],
        })
    }

    #[test]
    fn gauge_becomes_single_flat_event() {
        let transform = OhiTransform::new(OhiTransformConfig::default());
        let mut batch = wrap(vec![Record::Metric(MetricPoint::gauge("db.connections.active", 5i64))]);
        transform.transform(&mut batch);
        assert_eq!(batch.record_count(), 1);
        if let Record::Log(log) = &batch.resources[0].scopes[0].records[0] {
            assert_eq!(
                log.attributes.get("eventType").and_then(|v| v.as_str()),
                Some("DbConnectionsActive")
            );
        } else {
            panic!("expected a log record");
        }
    }

    #[test]
    fn histogram_expands_into_summary_and_bucket_records_with_percentiles() {
        let transform = OhiTransform::new(OhiTransformConfig {
            percentiles: vec![0.5, 0.95],
        });
        let point = MetricPoint {
            name: "db.query.latency".into(),
            timestamp: chrono::Utc::now(),
            value: NumberValue::Double(0.0),
            attributes: Default::default(),
            kind: MetricKind::Histogram(HistogramValue {
                sum: 550.0,
                count: 100,
                bucket_counts: vec![50, 30, 20],
                explicit_bounds: vec![10.0, 50.0],
            }),
        };
        let mut batch = wrap(vec![Record::Metric(point)]);
        transform.transform(&mut batch);
        assert_eq!(batch.record_count(), 4);
        if let Record::Log(summary) = &batch.resources[0].scopes[0].records[0] {
            assert!(summary.attributes.contains_key("p50"));
            assert!(summary.attributes.contains_key("p95"));
        } else {
            panic!("expected summary record first");
        }
    }

    #[test]
    fn histogram_percentile_landing_in_the_unbounded_tail_uses_last_finite_bucket_midpoint() {
        let p95 = interpolate_histogram_percentile(&[10, 30, 40, 20], &[10.0, 50.0, 100.0], 100, 0.95).unwrap();
        assert_eq!(p95, 75.0);
    }

    #[test]
    fn summary_quantile_interpolation_falls_between_reported_points() {
        let quantiles = vec![(0.5, 10.0), (0.99, 100.0)];
        let interpolated = interpolate_summary_percentile(&quantiles, 0.75).unwrap();
        assert!(interpolated > 10.0 && interpolated < 100.0);
    }

    #[test]
    fn summary_expands_into_one_record_per_quantile() {
        let transform = OhiTransform::new(OhiTransformConfig::default());
        let point = MetricPoint {
            name: "db.query.latency".into(),
            timestamp: chrono::Utc::now(),
            value: NumberValue::Double(0.0),
            attributes: Default::default(),
            kind: MetricKind::Summary(SummaryValue {
                sum: 100.0,
                count: 10,
                quantiles: vec![(0.5, 5.0), (0.99, 20.0)],
            }),
        };
        let mut batch = wrap(vec![Record::Metric(point)]);
        transform.transform(&mut batch);
        assert_eq!(batch.record_count(), 3);
    }
}
