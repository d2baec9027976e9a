//! C11: query correlator. Maintains a bounded fingerprint -> correlation
//! map, evicting by least-recently-seen once full, with a periodic cleanup
//! task dropping entries stale past a configurable age (§4.11).

use std::collections::HashMap;
use std::time::Duration;

use dbintel_core::QueryCorrelationEntry;
use parking_lot::Mutex;
use tokio::time::interval;
use tracing::info;

pub struct CorrelatorConfig {
    pub max_entries: usize,
    pub stale_after: chrono::Duration,
    pub cleanup_interval: Duration,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            max_entries: 50_000,
            stale_after: chrono::Duration::hours(6),
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

pub struct QueryCorrelator {
    config: CorrelatorConfig,
    entries: Mutex<HashMap<String, QueryCorrelationEntry>>,
}

impl QueryCorrelator {
    pub fn new(config: CorrelatorConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Records one observation of `fingerprint`, touching `table`/`database`
    /// into its dedup'd attribute lists. Evicts the least-recently-seen
    /// entry when inserting a new fingerprint would exceed `max_entries`.
    pub fn observe(&self, fingerprint: &str, table: Option<&str>, database: &str) {
        let mut entries = self.entries.lock();

        if !entries.contains_key(fingerprint) && entries.len() >= self.config.max_entries {
            if let Some(oldest_key) = entries
                .iter()
                .min_by_key(|(_, v)| v.last_seen)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest_key);
            }
        }

        let entry = entries.entry(fingerprint.to_string()).or_insert_with(|| QueryCorrelationEntry {
            fingerprint: fingerprint.to_string(),
            call_count: 0,
            last_seen: chrono::Utc::now(),
            tables: Vec::new(),
            databases: Vec::new(),
        });
        entry.call_count += 1;
        entry.last_seen = chrono::Utc::now();
        if let Some(table) = table {
            if !entry.tables.iter().any(|t| t == table) {
                entry.tables.push(table.to_string());
            }
        }
        if !entry.databases.iter().any(|d| d == database) {
            entry.databases.push(database.to_string());
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<QueryCorrelationEntry> {
        self.entries.lock().get(fingerprint).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Long-lived task: periodically drops entries not observed within
    /// `stale_after`, independent of the size-based eviction in `observe`.
    pub async fn run_cleanup(&self) {
        let mut ticker = interval(self.config.cleanup_interval);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|_, entry| now - entry.last_seen < self.config.stale_after);
            let removed = before - entries.len();
            if removed > 0 {
                info!(removed, "correlator cleanup removed stale fingerprints");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_observations_accumulate_call_count() {
        let correlator = QueryCorrelator::new(CorrelatorConfig::default());
        correlator.observe("fp1", Some("orders"), "db1");
        correlator.observe("fp1", Some("orders"), "db1");
        let entry = correlator.get("fp1").unwrap();
        assert_eq!(entry.call_count, 2);
        assert_eq!(entry.tables, vec!["orders".to_string()]);
    }

    #[test]
    fn eviction_removes_least_recently_seen_entry_when_full() {
        let correlator = QueryCorrelator::new(CorrelatorConfig {
            max_entries: 2,
            ..Default::default()
        });
        correlator.observe("fp1", None, "db1");
        std::thread::sleep(std::time::Duration::from_millis(5));
        correlator.observe("fp2", None, "db1");
        std::thread::sleep(std::time::Duration::from_millis(5));
        correlator.observe("fp3", None, "db1");
        assert_eq!(correlator.len(), 2);
        assert!(correlator.get("fp1").is_none());
        assert!(correlator.get("fp3").is_some());
    }

    #[test]
    fn distinct_tables_and_databases_are_deduplicated() {
        let correlator = QueryCorrelator::new(CorrelatorConfig::default());
        correlator.observe("fp1", Some("orders"), "db1");
        correlator.observe("fp1", Some("orders"), "db1");
        correlator.observe("fp1", Some("line_items"), "db2");
        let entry = correlator.get("fp1").unwrap();
        assert_eq!(entry.tables, vec!["orders".to_string(), "line_items".to_string()]);
        assert_eq!(entry.databases, vec!["db1".to_string(), "db2".to_string()]);
    }
}
