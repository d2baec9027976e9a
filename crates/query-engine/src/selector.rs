//! C2: picks the best `QueryDefinition` per category given a `FeatureSet`,
//! memoizing the choice until the feature set is refreshed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dbintel_core::{FeatureSet, QueryDefinition};
use tokio::sync::RwLock;
use tracing::warn;

const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(300);

struct Memo {
    definition: Arc<QueryDefinition>,
    detected_at: chrono::DateTime<chrono::Utc>,
    cached_at: Instant,
}

pub struct QuerySelector {
    library: HashMap<String, Vec<Arc<QueryDefinition>>>,
    memo: RwLock<HashMap<String, Memo>>,
    cache_duration: Duration,
}

impl QuerySelector {
    pub fn new(definitions: Vec<QueryDefinition>) -> Self {
        let mut library: HashMap<String, Vec<Arc<QueryDefinition>>> = HashMap::new();
        for def in definitions {
            library.entry(def.category.clone()).or_default().push(Arc::new(def));
        }
        for candidates in library.values_mut() {
            candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
        }
        Self {
            library,
            memo: RwLock::new(HashMap::new()),
            cache_duration: DEFAULT_CACHE_DURATION,
        }
    }

    /// Sorts candidates by descending priority and returns the first whose
    /// requirements are satisfied. If none qualify, returns the
    /// lowest-priority entry as a fallback (never errors on a non-empty
    /// library).
    pub async fn select(&self, category: &str, features: &FeatureSet) -> Option<Arc<QueryDefinition>> {
        if let Some(memo) = self.memo.read().await.get(category) {
            if memo.detected_at == features.detected_at && memo.cached_at.elapsed() < self.cache_duration {
                return Some(memo.definition.clone());
            }
        }

        let candidates = self.library.get(category)?;
        let chosen = candidates
            .iter()
            .find(|def| def.requirements.satisfied_by(features))
            .cloned()
            .or_else(|| {
                if let Some(fallback) = candidates.last() {
                    warn!(
                        category,
                        query = %fallback.name,
                        "no candidate satisfied detected features, using lowest-priority fallback"
                    );
                }
                candidates.last().cloned()
            })?;

        self.memo.write().await.insert(
            category.to_string(),
            Memo {
                definition: chosen.clone(),
                detected_at: features.detected_at,
                cached_at: Instant::now(),
            },
        );

        Some(chosen)
    }

    /// Invalidates every memoized selection; called whenever feature
    /// detection publishes a new `FeatureSet`.
    pub async fn invalidate(&self) {
        self.memo.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbintel_core::{QueryOutputSpec, QueryRequirements};
    use std::collections::HashMap as Map;

    fn def(name: &str, priority: i32, requires_io_timing: bool) -> QueryDefinition {
        QueryDefinition {
            name: name.to_string(),
            category: "slow_queries".to_string(),
            sql: "select 1".to_string(),
            requirements: QueryRequirements {
                required_extensions: if name.contains("monitor") {
                    vec!["pg_stat_monitor".to_string()]
                } else {
                    vec!["pg_stat_statements".to_string()]
                },
                required_capabilities: if requires_io_timing {
                    vec!["track_io_timing".to_string()]
                } else {
                    vec![]
                },
                minimum_version: None,
            },
            priority,
            fallback: None,
            output: QueryOutputSpec::Metrics(vec![]),
            parameters: vec![],
            timeout_secs: 30,
        }
    }

    fn features(extensions: &[&str], io_timing: bool) -> FeatureSet {
        let mut caps = Map::new();
        caps.insert(
            "track_io_timing".to_string(),
            dbintel_core::CapabilityValue::Bool(io_timing),
        );
        FeatureSet {
            server_version: "14.2".to_string(),
            extensions: extensions.iter().map(|e| (e.to_string(), "1.0".to_string())).collect(),
            capabilities: caps,
            cloud_provider: None,
            detected_at: chrono::Utc::now(),
            errors: vec![],
        }
    }

    #[tokio::test]
    async fn s1_selects_basic_when_monitor_absent_and_io_timing_off() {
        let selector = QuerySelector::new(vec![
            def("pg_stat_monitor_slow_queries", 100, false),
            def("pg_stat_statements_io_timing", 90, true),
            def("pg_stat_statements_basic", 50, false),
            def("pg_stat_activity_fallback", 10, false),
        ]);
        let fs = features(&["pg_stat_statements"], false);
        let chosen = selector.select("slow_queries", &fs).await.unwrap();
        assert_eq!(chosen.name, "pg_stat_statements_basic");
        assert_eq!(chosen.priority, 50);
    }

    #[tokio::test]
    async fn falls_back_to_lowest_priority_when_nothing_matches() {
        let selector = QuerySelector::new(vec![def("pg_stat_monitor_slow_queries", 100, false)]);
        let fs = features(&[], false);
        let chosen = selector.select("slow_queries", &fs).await.unwrap();
        assert_eq!(chosen.name, "pg_stat_monitor_slow_queries");
    }
}
