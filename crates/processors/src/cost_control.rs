//! C9: cardinality and volume budget enforcement. Tracks a rolling
//! attribute-combination ledger per metric and a request/byte budget per
//! period (§4.9).

use std::collections::{HashMap, HashSet};

use dbintel_core::pdata::{Batch, Record};
use dbintel_core::BudgetPeriod;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

/// Attributes known to carry unbounded cardinality. Warned on ingest;
/// stripped first when a record needs to shed attributes to fit the
/// cardinality cap.
pub const HIGH_CARDINALITY_ATTRS: &[&str] = &["user.id", "session.id", "request.id", "trace.id", "span.id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostControlMode {
    /// Strip the offending high-cardinality attribute(s) and keep the
    /// record. Falls back to a whole-record drop only when no such
    /// attribute is present to strip.
    PerAttribute,
    /// Drop the whole record once its metric's cardinality cap is hit.
    Strict,
}

impl Default for CostControlMode {
    fn default() -> Self {
        CostControlMode::PerAttribute
    }
}

pub struct CostControlConfig {
    pub max_cardinality_per_metric: usize,
    pub budget_period: BudgetPeriod,
    pub max_records_per_period: u64,
    pub mode: CostControlMode,
    pub seed: u64,
}

impl Default for CostControlConfig {
    fn default() -> Self {
        Self {
            max_cardinality_per_metric: 10_000,
            budget_period: BudgetPeriod::Hour,
            max_records_per_period: 1_000_000,
            mode: CostControlMode::PerAttribute,
            seed: 0,
        }
    }
}

#[derive(Default)]
struct Ledger {
    seen_combinations: HashMap<String, HashSet<String>>,
    records_this_period: u64,
    period_started: Option<chrono::DateTime<chrono::Utc>>,
    warned_attrs: HashSet<String>,
}

pub struct CostControl {
    config: CostControlConfig,
    ledger: Mutex<Ledger>,
    rng: Mutex<StdRng>,
}

fn attribute_fingerprint(record: &Record) -> String {
    let mut pairs: Vec<String> = record
        .attributes()
        .iter()
        .map(|(k, v)| format!("{k}={v:?}"))
        .collect();
    pairs.sort();
    pairs.join(",")
}

fn period_duration(period: BudgetPeriod) -> chrono::Duration {
    match period {
        BudgetPeriod::Hour => chrono::Duration::hours(1),
        BudgetPeriod::Day => chrono::Duration::days(1),
        BudgetPeriod::Month => chrono::Duration::days(30),
    }
}

fn period_elapsed(started: chrono::DateTime<chrono::Utc>, period: BudgetPeriod) -> bool {
    chrono::Utc::now() - started >= period_duration(period)
}

impl CostControl {
    pub fn new(config: CostControlConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            ledger: Mutex::new(Ledger::default()),
            rng: Mutex::new(rng),
        }
    }

    fn warn_high_cardinality_attrs(&self, ledger: &mut Ledger, record: &Record) {
        for key in HIGH_CARDINALITY_ATTRS {
            if record.attributes().contains_key(*key) && ledger.warned_attrs.insert(key.to_string()) {
                warn!(attribute = key, "high-cardinality attribute observed on ingest");
            }
        }
    }

    /// Fits a record under the cardinality cap for its metric, stripping
    /// high-cardinality attributes first in `PerAttribute` mode. Returns
    /// `false` if the record must be dropped entirely.
    fn fit_cardinality(&self, ledger: &mut Ledger, record: &mut Record) -> bool {
        let Record::Metric(metric) = record else {
            return true;
        };
        let max_card = self.config.max_cardinality_per_metric;
        let fingerprint = attribute_fingerprint(record);
        {
            let set = ledger.seen_combinations.entry(metric.name.clone()).or_default();
            if set.contains(&fingerprint) || set.len() < max_card {
                set.insert(fingerprint);
                return true;
            }
        }

        if self.config.mode == CostControlMode::Strict {
            return false;
        }

        let mut stripped_any = false;
        for key in HIGH_CARDINALITY_ATTRS {
            if record.attributes_mut().remove(*key).is_some() {
                stripped_any = true;
            }
        }
        if !stripped_any {
            return false;
        }

        let Record::Metric(metric) = record else {
            return true;
        };
        let fingerprint = attribute_fingerprint(record);
        let set = ledger.seen_combinations.entry(metric.name.clone()).or_default();
        if set.contains(&fingerprint) || set.len() < max_card {
            set.insert(fingerprint);
            true
        } else {
            false
        }
    }

    /// `true` if volume shedding should admit this record right now. Once
    /// the admitted fraction of the period's budget runs ahead of the
    /// elapsed fraction of the period, records are sampled out with a
    /// ratio proportional to how far ahead of pace we are, rather than
    /// being cut off hard — this spreads the remaining budget across the
    /// rest of the period instead of going silent once the cap is hit.
    fn admit_for_volume(
        &self,
        admitted_so_far: u64,
        period_started: chrono::DateTime<chrono::Utc>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> bool {
        let max_records = self.config.max_records_per_period;
        if max_records == 0 {
            return false;
        }
        let elapsed_fraction = (now - period_started).num_milliseconds() as f64
            / period_duration(self.config.budget_period).num_milliseconds().max(1) as f64;
        let elapsed_fraction = elapsed_fraction.clamp(0.0, 1.0);
        let admitted_fraction = admitted_so_far as f64 / max_records as f64;

        if admitted_fraction <= elapsed_fraction {
            return true;
        }
        let ratio = (elapsed_fraction / admitted_fraction).clamp(0.0, 1.0);
        let roll: f64 = self.rng.lock().gen_range(0.0..1.0);
        roll < ratio
    }

    /// Enforces cardinality and volume budgets on a batch in place.
    /// Cardinality is never retroactively reduced: combinations already
    /// admitted keep counting even after drops begin.
    pub fn enforce(&self, batch: &mut Batch) {
        let mut ledger = self.ledger.lock();
        let now = chrono::Utc::now();
        if ledger.period_started.map(|s| period_elapsed(s, self.config.budget_period)).unwrap_or(true) {
            ledger.period_started = Some(now);
            ledger.records_this_period = 0;
        }

        batch.for_each_record_mut(|record| self.warn_high_cardinality_attrs(&mut ledger, record));

        let mut dropped_cardinality = 0u64;
        let mut cardinality_keep = Vec::new();
        batch.for_each_record_mut(|record| {
            let keep = self.fit_cardinality(&mut ledger, record);
            if !keep {
                dropped_cardinality += 1;
            }
            cardinality_keep.push(keep);
        });

        let period_started = ledger.period_started.unwrap_or(now);
        let mut admitted = ledger.records_this_period;
        let mut dropped_volume = 0u64;
        let mut idx = 0usize;
        batch.retain_records(|_record| {
            let keep_cardinality = cardinality_keep[idx];
            idx += 1;
            if !keep_cardinality {
                return false;
            }
            if self.admit_for_volume(admitted, period_started, now) {
                admitted += 1;
                true
            } else {
                dropped_volume += 1;
                false
            }
        });
        ledger.records_this_period = admitted;

        if dropped_cardinality > 0 {
            warn!(dropped_cardinality, "dropped records exceeding cardinality budget");
        }
        if dropped_volume > 0 {
            warn!(dropped_volume, "sampled out records to stay within the volume budget");
        }
    }

    pub fn records_this_period(&self) -> u64 {
        self.ledger.lock().records_this_period
    }

    pub fn cardinality_of(&self, metric: &str) -> usize {
        self.ledger
            .lock()
            .seen_combinations
            .get(metric)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbintel_core::pdata::{MetricPoint, Resource, Scope};

    fn batch_of(points: Vec<MetricPoint>) -> Batch {
        Batch::single_resource(Resource {
            attributes: Default::default(),
            scopes: vec![Scope {
                name: "s".into(),
                version: "1".into(),
                records: points.into_iter().map(Record::Metric).collect(),
            }],
        })
    }

    #[test]
    fn drops_records_once_metric_cardinality_exceeds_cap() {
        let control = CostControl::new(CostControlConfig {
            max_cardinality_per_metric: 1,
            ..Default::default()
        });
        let mut batch = batch_of(vec![
            MetricPoint::gauge("db.connections", 1i64).with_attribute("pool", "a"),
            MetricPoint::gauge("db.connections", 2i64).with_attribute("pool", "b"),
        ]);
        control.enforce(&mut batch);
        assert_eq!(batch.record_count(), 1);
    }

    #[test]
    fn drops_records_once_period_budget_exhausted() {
        let control = CostControl::new(CostControlConfig {
            max_records_per_period: 1,
            ..Default::default()
        });
        let mut batch = batch_of(vec![
            MetricPoint::gauge("db.connections", 1i64),
            MetricPoint::gauge("db.connections", 2i64),
        ]);
        control.enforce(&mut batch);
        assert_eq!(batch.record_count(), 1);
    }

    #[test]
    fn repeated_combination_does_not_consume_additional_cardinality_slots() {
        let control = CostControl::new(CostControlConfig {
            max_cardinality_per_metric: 1,
            ..Default::default()
        });
        let mut batch = batch_of(vec![
            MetricPoint::gauge("db.connections", 1i64).with_attribute("pool", "a"),
            MetricPoint::gauge("db.connections", 2i64).with_attribute("pool", "a"),
        ]);
        control.enforce(&mut batch);
        assert_eq!(batch.record_count(), 2);
    }

    #[test]
    fn per_attribute_mode_strips_high_cardinality_attribute_instead_of_dropping() {
        let control = CostControl::new(CostControlConfig {
            max_cardinality_per_metric: 1,
            mode: CostControlMode::PerAttribute,
            ..Default::default()
        });
        let mut batch = batch_of(vec![
            MetricPoint::gauge("db.query.duration", 1i64).with_attribute("user.id", "alice"),
            MetricPoint::gauge("db.query.duration", 2i64).with_attribute("user.id", "bob"),
        ]);
        control.enforce(&mut batch);
        assert_eq!(batch.record_count(), 2, "both records survive once the unbounded attribute is stripped");
    }

    #[test]
    fn strict_mode_drops_whole_record_instead_of_stripping_attributes() {
        let control = CostControl::new(CostControlConfig {
            max_cardinality_per_metric: 1,
            mode: CostControlMode::Strict,
            ..Default::default()
        });
        let mut batch = batch_of(vec![
            MetricPoint::gauge("db.query.duration", 1i64).with_attribute("user.id", "alice"),
            MetricPoint::gauge("db.query.duration", 2i64).with_attribute("user.id", "bob"),
        ]);
        control.enforce(&mut batch);
        assert_eq!(batch.record_count(), 1);
    }

    #[test]
    fn per_attribute_mode_still_drops_whole_record_when_nothing_to_strip() {
        let control = CostControl::new(CostControlConfig {
            max_cardinality_per_metric: 1,
            mode: CostControlMode::PerAttribute,
            ..Default::default()
        });
        let mut batch = batch_of(vec![
            MetricPoint::gauge("db.connections", 1i64).with_attribute("pool", "a"),
            MetricPoint::gauge("db.connections", 2i64).with_attribute("pool", "b"),
        ]);
        control.enforce(&mut batch);
        assert_eq!(batch.record_count(), 1);
    }
}
