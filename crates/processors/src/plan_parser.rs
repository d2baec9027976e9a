//! C10: execution plan parser with an MD5-keyed LRU cache and a bounded
//! worker pool for the actual JSON walk (§4.10).

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use dbintel_core::{ParsedPlan, PipelineError};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::warn;

pub struct PlanParserConfig {
    pub max_cache_entries: usize,
    pub cache_ttl: Duration,
    pub max_plan_bytes: usize,
    pub parse_timeout: Duration,
    pub max_concurrent_parses: usize,
}

impl Default for PlanParserConfig {
    fn default() -> Self {
        Self {
            max_cache_entries: 500,
            cache_ttl: Duration::from_secs(60 * 60),
            max_plan_bytes: 256 * 1024,
            parse_timeout: Duration::from_millis(500),
            max_concurrent_parses: 4,
        }
    }
}

struct CacheEntry {
    plan: ParsedPlan,
    cached_at: Instant,
}

struct Cache {
    entries: HashMap<String, CacheEntry>,
    /// Most-recently-used key at the back; eviction pops from the front.
    order: VecDeque<String>,
}

impl Cache {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }
}

pub struct PlanParser {
    config: PlanParserConfig,
    cache: Mutex<Cache>,
    semaphore: Semaphore,
}

fn hash_plan_text(plan_json: &str) -> String {
    format!("{:x}", md5::compute(plan_json.as_bytes()))
}

fn walk(node: &Value, plan: &mut ParsedPlan) {
    plan.node_count += 1;
    if let Some(node_type) = node.get("Node Type").and_then(Value::as_str) {
        if node_type == "Seq Scan" {
            plan.has_seq_scan = true;
        }
        if node_type.contains("Index") {
            if let Some(index_name) = node.get("Index Name").and_then(Value::as_str) {
                plan.indexes_used.push(index_name.to_string());
            }
        }
        if node_type.contains("Join") {
            plan.join_types.push(node_type.to_string());
        }
    }
    if let Some(children) = node.get("Plans").and_then(Value::as_array) {
        for child in children {
            walk(child, plan);
        }
    }
}

fn parse_plan_json(plan_json: &str, hash: String) -> Result<ParsedPlan, PipelineError> {
    let parsed: Value = serde_json::from_str(plan_json).map_err(|e| PipelineError::Data(e.to_string()))?;
    let root = parsed
        .as_array()
        .and_then(|arr| arr.first())
        .and_then(|v| v.get("Plan"))
        .ok_or_else(|| PipelineError::Data("plan JSON missing top-level Plan node".into()))?;

    let mut plan = ParsedPlan {
        hash,
        parsed_at: chrono::Utc::now(),
        total_cost: root.get("Total Cost").and_then(Value::as_f64).unwrap_or(0.0),
        node_count: 0,
        has_seq_scan: false,
        indexes_used: Vec::new(),
        join_types: Vec::new(),
        estimated_rows: root.get("Plan Rows").and_then(Value::as_f64).unwrap_or(0.0),
        attributes: HashMap::new(),
    };
    walk(root, &mut plan);
    Ok(plan)
}

impl PlanParser {
    pub fn new(config: PlanParserConfig) -> Self {
        let max_concurrent_parses = config.max_concurrent_parses;
        Self {
            config,
            cache: Mutex::new(Cache {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            semaphore: Semaphore::new(max_concurrent_parses),
        }
    }

    /// Oversized plans are rejected outright rather than parsed or cached.
    /// A cache hit within `cache_ttl` skips parsing entirely; an expired
    /// entry is treated as a miss and reparsed.
    pub async fn parse(&self, plan_json: &str) -> Result<ParsedPlan, PipelineError> {
        if plan_json.len() > self.config.max_plan_bytes {
            return Err(PipelineError::ResourceExhausted(format!(
                "plan of {} bytes exceeds max_plan_bytes={}",
                plan_json.len(),
                self.config.max_plan_bytes
            )));
        }

        let hash = hash_plan_text(plan_json);
        {
            let mut cache = self.cache.lock();
            if let Some(entry) = cache.entries.get(&hash) {
                if entry.cached_at.elapsed() < self.config.cache_ttl {
                    let plan = entry.plan.clone();
                    cache.touch(&hash);
                    return Ok(plan);
                }
            }
        }

        let _permit = tokio::time::timeout(self.config.parse_timeout, self.semaphore.acquire())
            .await
            .map_err(|_| PipelineError::TransientIo("timed out waiting for a parse worker".into()))?
            .map_err(|_| PipelineError::Panic {
                task: "plan_parser".into(),
                message: "semaphore closed".into(),
            })?;

        let json = plan_json.to_string();
        let hash_for_parse = hash.clone();
        let parsed = tokio::time::timeout(
            self.config.parse_timeout,
            tokio::task::spawn_blocking(move || parse_plan_json(&json, hash_for_parse)),
        )
        .await
        .map_err(|_| PipelineError::TransientIo("plan parse exceeded parse_timeout".into()))?
        .map_err(|e| PipelineError::Panic {
            task: "plan_parser".into(),
            message: e.to_string(),
        })??;

        let mut cache = self.cache.lock();
        if cache.entries.len() >= self.config.max_cache_entries && !cache.entries.contains_key(&hash) {
            if let Some(oldest) = cache.order.pop_front() {
                cache.entries.remove(&oldest);
                warn!(evicted = %oldest, "plan cache evicted oldest entry");
            }
        }
        cache.entries.insert(
            hash.clone(),
            CacheEntry {
                plan: parsed.clone(),
                cached_at: Instant::now(),
            },
        );
        cache.touch(&hash);
        Ok(parsed)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEQ_SCAN_PLAN: &str = r#"[{"Plan":{"Node Type":"Seq Scan","Relation Name":"orders","Total Cost":123.45,"Plan Rows":1000}}]"#;
    const INDEX_JOIN_PLAN: &str = r#"[{"Plan":{"Node Type":"Hash Join","Total Cost":50.0,"Plan Rows":10,"Plans":[{"Node Type":"Index Scan","Index Name":"orders_pkey","Total Cost":1.0,"Plan Rows":1},{"Node Type":"Seq Scan","Total Cost":2.0,"Plan Rows":5}]}}]"#;

    #[tokio::test]
    async fn detects_seq_scan_and_cost() {
        let parser = PlanParser::new(PlanParserConfig::default());
        let plan = parser.parse(SEQ_SCAN_PLAN).await.unwrap();
        assert!(plan.has_seq_scan);
        assert_eq!(plan.total_cost, 123.45);
        assert_eq!(plan.node_count, 1);
    }

    #[tokio::test]
    async fn collects_index_names_and_join_types_from_children() {
        let parser = PlanParser::new(PlanParserConfig::default());
        let plan = parser.parse(INDEX_JOIN_PLAN).await.unwrap();
        assert_eq!(plan.indexes_used, vec!["orders_pkey".to_string()]);
        assert_eq!(plan.join_types, vec!["Hash Join".to_string()]);
        assert_eq!(plan.node_count, 3);
    }

    #[tokio::test]
    async fn identical_plan_text_is_served_from_cache() {
        let parser = PlanParser::new(PlanParserConfig::default());
        parser.parse(SEQ_SCAN_PLAN).await.unwrap();
        parser.parse(SEQ_SCAN_PLAN).await.unwrap();
        assert_eq!(parser.cache_len(), 1);
    }

    #[tokio::test]
    async fn oversized_plan_is_rejected_without_parsing() {
        let parser = PlanParser::new(PlanParserConfig {
            max_plan_bytes: 10,
            ..Default::default()
        });
        let result = parser.parse(SEQ_SCAN_PLAN).await;
        assert!(matches!(result, Err(PipelineError::ResourceExhausted(_))));
    }

    #[tokio::test]
    async fn cache_evicts_oldest_entry_once_full() {
        let parser = PlanParser::new(PlanParserConfig {
            max_cache_entries: 1,
            ..Default::default()
        });
        parser.parse(SEQ_SCAN_PLAN).await.unwrap();
        parser.parse(INDEX_JOIN_PLAN).await.unwrap();
        assert_eq!(parser.cache_len(), 1);
    }
}
