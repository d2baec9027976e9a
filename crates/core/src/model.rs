//! Per-component state shapes shared across crates: feature sets, query
//! definitions, pool descriptors, sampling rules, circuit state, cost
//! counters, parsed plans, correlation entries and rate-limiter buckets.
//! Each mirrors its §3 data-model entry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-probe failure recorded during feature detection (§4.1). Detection
/// keeps going after one of these as long as version and extension probes
/// succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionError {
    pub phase: String,
    pub message: String,
}

/// Per-database document describing what the server can do. Immutable once
/// published; a refresh replaces the whole value atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSet {
    pub server_version: String,
    pub extensions: HashMap<String, String>,
    pub capabilities: HashMap<String, CapabilityValue>,
    pub cloud_provider: Option<String>,
    pub detected_at: chrono::DateTime<chrono::Utc>,
    pub errors: Vec<DetectionError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Bool(bool),
    Text(String),
}

impl FeatureSet {
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains_key(name)
    }

    pub fn capability_bool(&self, name: &str) -> bool {
        matches!(self.capabilities.get(name), Some(CapabilityValue::Bool(true)))
    }

    /// Numeric per-dotted-segment comparison with shorter versions
    /// implicitly zero-padded, per §4.1.
    pub fn version_at_least(&self, required: &str) -> bool {
        compare_versions(&self.server_version, required) != std::cmp::Ordering::Less
    }
}

pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let pa: Vec<u64> = a.split('.').map(|s| s.parse().unwrap_or(0)).collect();
    let pb: Vec<u64> = b.split('.').map(|s| s.parse().unwrap_or(0)).collect();
    let len = pa.len().max(pb.len());
    for i in 0..len {
        let va = pa.get(i).copied().unwrap_or(0);
        let vb = pb.get(i).copied().unwrap_or(0);
        match va.cmp(&vb) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

/// Requirements a query definition places on the detected `FeatureSet`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequirements {
    pub required_extensions: Vec<String>,
    pub required_capabilities: Vec<String>,
    pub minimum_version: Option<String>,
}

impl QueryRequirements {
    pub fn satisfied_by(&self, features: &FeatureSet) -> bool {
        self.required_extensions.iter().all(|e| features.has_extension(e))
            && self.required_capabilities.iter().all(|c| features.capability_bool(c))
            && self
                .minimum_version
                .as_deref()
                .map(|v| features.version_at_least(v))
                .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryParameter {
    pub name: String,
    pub param_type: String,
    pub default: Option<String>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricColumnMapping {
    pub metric_name: String,
    pub value_column: String,
    pub attribute_columns: Vec<String>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogColumnMapping {
    pub body_column: String,
    pub severity_column: Option<String>,
    pub attribute_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueryOutputSpec {
    Metrics(Vec<MetricColumnMapping>),
    Logs(LogColumnMapping),
}

/// A named, prioritized SQL query with positional parameters and the
/// requirements that gate its selection (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDefinition {
    pub name: String,
    pub category: String,
    pub sql: String,
    pub requirements: QueryRequirements,
    pub priority: i32,
    pub fallback: Option<String>,
    pub output: QueryOutputSpec,
    pub parameters: Vec<QueryParameter>,
    pub timeout_secs: u64,
}

/// Identity + health of a connection pool (§3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolKey {
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}/{}", self.driver, self.host, self.port, self.database)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub open: u32,
    pub in_use: u32,
    pub idle: u32,
    pub wait_count: u64,
    pub wait_duration_ms: u64,
    pub healthy: bool,
    pub last_health_check: Option<chrono::DateTime<chrono::Utc>>,
}

/// A sampling rule evaluated in declaration order; first match wins (§3,
/// §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingRule {
    pub name: String,
    pub condition: String,
    pub sample_rate_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitState {
    pub phase: CircuitPhase,
    pub state_changed_at: chrono::DateTime<chrono::Utc>,
    pub half_open_attempt_count: u32,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self {
            phase: CircuitPhase::Closed,
            state_changed_at: chrono::Utc::now(),
            half_open_attempt_count: 0,
        }
    }
}

/// Rolling request/error counters plus the cardinality and budget ledgers
/// cost control enforces (§3, §4.9).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostCounters {
    pub request_count: u64,
    pub error_count: u64,
    pub last_reset: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BudgetPeriod {
    Hour,
    Day,
    Month,
}

/// A plan parsed from `EXPLAIN (FORMAT JSON)` output (§3, §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedPlan {
    pub hash: String,
    pub parsed_at: chrono::DateTime<chrono::Utc>,
    pub total_cost: f64,
    pub node_count: usize,
    pub has_seq_scan: bool,
    pub indexes_used: Vec<String>,
    pub join_types: Vec<String>,
    pub estimated_rows: f64,
    pub attributes: HashMap<String, String>,
}

/// Query fingerprint → correlation stats (§3, §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCorrelationEntry {
    pub fingerprint: String,
    pub call_count: u64,
    pub last_seen: chrono::DateTime<chrono::Utc>,
    pub tables: Vec<String>,
    pub databases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub start_hour: u8,
    pub end_hour: u8,
    pub rps: f64,
    pub burst: u32,
}

/// Per-database rate-limiter bucket state (§3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterBucket {
    pub database: String,
    pub rps: f64,
    pub burst: u32,
    pub success_count: u64,
    pub reject_count: u64,
    pub last_adjusted: chrono::DateTime<chrono::Utc>,
    pub schedule: Vec<ScheduleWindow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_comparison_zero_pads_shorter_segments() {
        assert_eq!(compare_versions("14", "14.0.0"), std::cmp::Ordering::Equal);
        assert_eq!(compare_versions("14.2", "14.10"), std::cmp::Ordering::Less);
        assert_eq!(compare_versions("15", "14.9"), std::cmp::Ordering::Greater);
    }

    #[test]
    fn requirements_satisfied_only_when_all_conditions_hold() {
        let mut features = FeatureSet {
            server_version: "14.2".into(),
            extensions: HashMap::new(),
            capabilities: HashMap::new(),
            cloud_provider: None,
            detected_at: chrono::Utc::now(),
            errors: vec![],
        };
        features.extensions.insert("pg_stat_statements".into(), "1.9".into());
        features
            .capabilities
            .insert("track_io_timing".into(), CapabilityValue::Bool(false));

        let reqs = QueryRequirements {
            required_extensions: vec!["pg_stat_statements".into()],
            required_capabilities: vec!["track_io_timing".into()],
            minimum_version: Some("13".into()),
        };
        assert!(!reqs.satisfied_by(&features));

        features
            .capabilities
            .insert("track_io_timing".into(), CapabilityValue::Bool(true));
        assert!(reqs.satisfied_by(&features));
    }
}
