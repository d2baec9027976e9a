//! C7: adaptive sampler. Rules are evaluated in declaration order, first
//! match wins; `ERROR`/`FATAL` severities always pass regardless of rule
//! outcome (§4.7).

use std::sync::atomic::{AtomicU64, Ordering};

use dbintel_core::{pdata::Record, SamplingRule};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;
use tracing::debug;

fn severity_always_keeps(record: &Record) -> bool {
    match record {
        Record::Log(log) => matches!(
            log.severity,
            dbintel_core::pdata::Severity::Error | dbintel_core::pdata::Severity::Fatal
        ),
        _ => false,
    }
}

/// Two-char operators are checked before their single-char prefixes so `>=`
/// and `<=` aren't swallowed by `>`/`<`.
const OPERATORS: &[&str] = &[">=", "<=", "==", "!=", ">", "<", "="];

/// Resolves a rule's `condition` string against a record's attributes.
/// Grammar: `<identifier> <op> <literal>` with
/// `op in {>, <, >=, <=, ==, =, !=}`, plus the bare wildcard `*`. When the
/// literal parses as a number, comparison is numeric against the
/// attribute's `as_f64()`; otherwise `==`/`=`/`!=` fall back to string
/// equality and ordering operators never match.
fn condition_matches(condition: &str, record: &Record) -> bool {
    let condition = condition.trim();
    if condition == "*" {
        return true;
    }

    let attrs = record.attributes();
    let Some((key, op, literal)) = split_condition(condition) else {
        return false;
    };
    let Some(value) = attrs.get(key) else {
        return op == "!=";
    };

    if let Ok(literal_num) = literal.parse::<f64>() {
        if let Some(value_num) = value.as_f64() {
            return match op {
                ">" => value_num > literal_num,
                "<" => value_num < literal_num,
                ">=" => value_num >= literal_num,
                "<=" => value_num <= literal_num,
                "==" | "=" => value_num == literal_num,
                "!=" => value_num != literal_num,
                _ => false,
            };
        }
    }

    match op {
        "==" | "=" => value.as_str() == Some(literal),
        "!=" => value.as_str() != Some(literal),
        _ => false,
    }
}

/// Splits `<identifier> <op> <literal>` on the first operator found,
/// preferring the longest match at that position.
fn split_condition(condition: &str) -> Option<(&str, &str, &str)> {
    let mut best: Option<(usize, &str)> = None;
    for op in OPERATORS {
        if let Some(idx) = condition.find(op) {
            match best {
                Some((best_idx, best_op)) if best_idx < idx || (best_idx == idx && best_op.len() >= op.len()) => {}
                _ => best = Some((idx, op)),
            }
        }
    }
    let (idx, op) = best?;
    let key = condition[..idx].trim();
    let literal = condition[idx + op.len()..].trim();
    if key.is_empty() || literal.is_empty() {
        return None;
    }
    Some((key, op, literal))
}

pub struct AdaptiveSampler {
    rules: Vec<SamplingRule>,
    default_rate_percent: f64,
    rng: Mutex<StdRng>,
    kept: AtomicU64,
    dropped: AtomicU64,
}

impl AdaptiveSampler {
    pub fn new(rules: Vec<SamplingRule>, default_rate_percent: f64, seed: u64) -> Self {
        Self {
            rules,
            default_rate_percent,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            kept: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn set_rules(&mut self, rules: Vec<SamplingRule>) {
        self.rules = rules;
    }

    /// Deterministic given the seeded PRNG: same seed and same sequence of
    /// decisions reproduce the same keep/drop outcomes.
    pub async fn should_keep(&self, record: &Record) -> bool {
        if severity_always_keeps(record) {
            self.kept.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        let rate = self
            .rules
            .iter()
            .find(|rule| condition_matches(&rule.condition, record))
            .map(|rule| rule.sample_rate_percent)
            .unwrap_or(self.default_rate_percent);

        if rate >= 100.0 {
            self.kept.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        if rate <= 0.0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let roll: f64 = {
            let mut rng = self.rng.lock().await;
            rng.gen_range(0.0..100.0)
        };
        let keep = roll < rate;
        if keep {
            self.kept.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        debug!(rate, roll, keep, "sampling decision");
        keep
    }

    pub fn counters(&self) -> (u64, u64) {
        (self.kept.load(Ordering::Relaxed), self.dropped.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbintel_core::pdata::{AttributeValue, LogBody, LogRecord, Severity};

    fn log(severity: Severity, attrs: &[(&str, &str)]) -> Record {
        let mut record = LogRecord {
            timestamp: chrono::Utc::now(),
            severity,
            body: LogBody::Text("x".into()),
            attributes: Default::default(),
        };
        for (k, v) in attrs {
            record
                .attributes
                .insert(k.to_string(), AttributeValue::String(v.to_string()));
        }
        Record::Log(record)
    }

    #[tokio::test]
    async fn error_severity_is_always_kept_regardless_of_rule_outcome() {
        let sampler = AdaptiveSampler::new(
            vec![SamplingRule {
                name: "drop-all".into(),
                condition: "*".into(),
                sample_rate_percent: 0.0,
            }],
            0.0,
            42,
        );
        let record = log(Severity::Error, &[]);
        assert!(sampler.should_keep(&record).await);
    }

    #[tokio::test]
    async fn first_matching_rule_wins_over_later_rules() {
        let sampler = AdaptiveSampler::new(
            vec![
                SamplingRule {
                    name: "keep-slow".into(),
                    condition: "slow=true".into(),
                    sample_rate_percent: 100.0,
                },
                SamplingRule {
                    name: "drop-rest".into(),
                    condition: "*".into(),
                    sample_rate_percent: 0.0,
                },
            ],
            0.0,
            1,
        );
        let record = log(Severity::Info, &[("slow", "true")]);
        assert!(sampler.should_keep(&record).await);
    }

    #[tokio::test]
    async fn same_seed_reproduces_same_decisions() {
        let rules = vec![SamplingRule {
            name: "half".into(),
            condition: "*".into(),
            sample_rate_percent: 50.0,
        }];
        let a = AdaptiveSampler::new(rules.clone(), 50.0, 7);
        let b = AdaptiveSampler::new(rules, 50.0, 7);
        let record = log(Severity::Info, &[]);
        let mut decisions_a = Vec::new();
        let mut decisions_b = Vec::new();
        for _ in 0..20 {
            decisions_a.push(a.should_keep(&record).await);
            decisions_b.push(b.should_keep(&record).await);
        }
        assert_eq!(decisions_a, decisions_b);
    }

    fn log_with_duration(mean_exec_time: f64) -> Record {
        let mut record = LogRecord {
            timestamp: chrono::Utc::now(),
            severity: Severity::Info,
            body: LogBody::Text("x".into()),
            attributes: Default::default(),
        };
        record
            .attributes
            .insert("mean_exec_time".to_string(), AttributeValue::Double(mean_exec_time));
        Record::Log(record)
    }

    #[tokio::test]
    async fn numeric_greater_than_condition_routes_slow_queries_to_their_own_rate() {
        let sampler = AdaptiveSampler::new(
            vec![SamplingRule {
                name: "slow-queries".into(),
                condition: "mean_exec_time > 1000".into(),
                sample_rate_percent: 100.0,
            }],
            10.0,
            99,
        );

        let mut slow_kept = 0;
        for _ in 0..100 {
            if sampler.should_keep(&log_with_duration(1500.0)).await {
                slow_kept += 1;
            }
        }
        assert_eq!(slow_kept, 100, "every record above the threshold matches the rule and is kept at 100%");

        let mut fast_kept = 0;
        for _ in 0..100 {
            if sampler.should_keep(&log_with_duration(100.0)).await {
                fast_kept += 1;
            }
        }
        assert!(
            fast_kept < 100,
            "records below the threshold fall through to the default rate, not the rule's 100%"
        );
    }

    #[test]
    fn all_six_operators_parse() {
        let record = log_with_duration(50.0);
        assert!(condition_matches("mean_exec_time >= 50", &record));
        assert!(condition_matches("mean_exec_time <= 50", &record));
        assert!(condition_matches("mean_exec_time == 50", &record));
        assert!(condition_matches("mean_exec_time != 10", &record));
        assert!(condition_matches("mean_exec_time < 100", &record));
        assert!(!condition_matches("mean_exec_time > 100", &record));
    }
}
