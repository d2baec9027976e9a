//! Wraps each standalone component in this crate as a `Processor` node so
//! the pipeline runtime can chain them like any other stage (§4.13, §9).

use std::sync::Arc;

use async_trait::async_trait;
use dbintel_core::pdata::{Batch, PayloadKind};
use dbintel_core::PipelineError;
use tracing::warn;

use crate::circuit_breaker::CircuitBreaker;
use crate::correlator::QueryCorrelator;
use crate::cost_control::CostControl;
use crate::ohi_transform::OhiTransform;
use crate::plan_parser::PlanParser;
use crate::rate_limiter::RateLimiter;
use crate::sampler::AdaptiveSampler;

const DB_NAME_ATTR: &str = "db.name";
/// Attribute a record carries the raw EXPLAIN JSON plan text under, as
/// selected by the `plan` column of the plan-history query.
const PLAN_JSON_ATTR: &str = "plan";

pub struct RateLimiterStage {
    limiter: Arc<RateLimiter>,
}

impl RateLimiterStage {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl dbintel_core::traits::Processor for RateLimiterStage {
    async fn start(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Drops an entire resource's records when its database is over its
    /// rate limit rather than thinning individual records, matching the
    /// per-tick granularity the rate limiter gates at.
    async fn consume(&mut self, mut batch: Batch) -> Result<Batch, PipelineError> {
        let mut keep = Vec::with_capacity(batch.resources.len());
        for resource in batch.resources.drain(..) {
            let database = resource
                .attributes
                .get(DB_NAME_ATTR)
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            if self.limiter.allow(&database) {
                keep.push(resource);
            } else {
                warn!(database, "rate limiter dropped resource batch");
            }
        }
        batch.resources = keep;
        Ok(batch)
    }

    async fn shutdown(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "rate_limiter"
    }
}

pub struct AdaptiveSamplerStage {
    sampler: Arc<AdaptiveSampler>,
}

impl AdaptiveSamplerStage {
    pub fn new(sampler: Arc<AdaptiveSampler>) -> Self {
        Self { sampler }
    }
}

#[async_trait]
impl dbintel_core::traits::Processor for AdaptiveSamplerStage {
    async fn start(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn consume(&mut self, mut batch: Batch) -> Result<Batch, PipelineError> {
        for resource in &mut batch.resources {
            for scope in &mut resource.scopes {
                let mut kept = Vec::with_capacity(scope.records.len());
                for record in scope.records.drain(..) {
                    if self.sampler.should_keep(&record).await {
                        kept.push(record);
                    }
                }
                scope.records = kept;
            }
        }
        batch.prune_empty_scopes();
        Ok(batch)
    }

    async fn shutdown(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "adaptive_sampler"
    }

    fn accepted_kinds(&self) -> &[PayloadKind] {
        &[PayloadKind::Logs, PayloadKind::Traces]
    }
}

pub struct CircuitBreakerStage {
    breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakerStage {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

#[async_trait]
impl dbintel_core::traits::Processor for CircuitBreakerStage {
    async fn start(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn consume(&mut self, mut batch: Batch) -> Result<Batch, PipelineError> {
        let mut keep = Vec::with_capacity(batch.resources.len());
        for resource in batch.resources.drain(..) {
            let database = resource
                .attributes
                .get(DB_NAME_ATTR)
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            if self.breaker.allow(&database) {
                self.breaker.record_result(&database, true);
                keep.push(resource);
            } else {
                warn!(database, "circuit open, dropped resource batch");
            }
        }
        batch.resources = keep;
        Ok(batch)
    }

    async fn shutdown(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "circuit_breaker"
    }
}

pub struct CostControlStage {
    control: Arc<CostControl>,
}

impl CostControlStage {
    pub fn new(control: Arc<CostControl>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl dbintel_core::traits::Processor for CostControlStage {
    async fn start(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn consume(&mut self, mut batch: Batch) -> Result<Batch, PipelineError> {
        self.control.enforce(&mut batch);
        Ok(batch)
    }

    async fn shutdown(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "cost_control"
    }

    fn accepted_kinds(&self) -> &[PayloadKind] {
        &[PayloadKind::Metrics]
    }
}

pub struct CorrelatorStage {
    correlator: Arc<QueryCorrelator>,
}

impl CorrelatorStage {
    pub fn new(correlator: Arc<QueryCorrelator>) -> Self {
        Self { correlator }
    }
}

#[async_trait]
impl dbintel_core::traits::Processor for CorrelatorStage {
    async fn start(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Observes `db.statement.fingerprint`/`db.sql.table`/`db.name`
    /// attributes when present; never drops or mutates records.
    async fn consume(&mut self, mut batch: Batch) -> Result<Batch, PipelineError> {
        batch.for_each_record_mut(|record| {
            let attrs = record.attributes();
            let fingerprint = attrs.get("db.statement.fingerprint").and_then(|v| v.as_str());
            if let Some(fingerprint) = fingerprint {
                let table = attrs.get("db.sql.table").and_then(|v| v.as_str());
                let database = attrs.get(DB_NAME_ATTR).and_then(|v| v.as_str()).unwrap_or("unknown");
                self.correlator.observe(fingerprint, table, database);
            }
        });
        Ok(batch)
    }

    async fn shutdown(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "query_correlator"
    }
}

pub struct PlanParserStage {
    parser: Arc<PlanParser>,
}

impl PlanParserStage {
    pub fn new(parser: Arc<PlanParser>) -> Self {
        Self { parser }
    }
}

#[async_trait]
impl dbintel_core::traits::Processor for PlanParserStage {
    async fn start(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Records without a `plan` attribute pass through untouched. A record
    /// that carries one gets the parsed plan's fields flattened onto it as
    /// `db.plan.*` attributes; a parse failure is logged and the record is
    /// still kept, plan attribute intact, for later inspection.
    async fn consume(&mut self, mut batch: Batch) -> Result<Batch, PipelineError> {
        for resource in &mut batch.resources {
            for scope in &mut resource.scopes {
                for record in &mut scope.records {
                    let Some(plan_json) = record
                        .attributes()
                        .get(PLAN_JSON_ATTR)
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                    else {
                        continue;
                    };
                    match self.parser.parse(&plan_json).await {
                        Ok(plan) => {
                            let attrs = record.attributes_mut();
                            attrs.insert("db.plan.hash".to_string(), dbintel_core::pdata::AttributeValue::String(plan.hash));
                            attrs.insert(
                                "db.plan.total_cost".to_string(),
                                dbintel_core::pdata::AttributeValue::Double(plan.total_cost),
                            );
                            attrs.insert(
                                "db.plan.node_count".to_string(),
                                dbintel_core::pdata::AttributeValue::Int(plan.node_count as i64),
                            );
                            attrs.insert(
                                "db.plan.has_seq_scan".to_string(),
                                dbintel_core::pdata::AttributeValue::Bool(plan.has_seq_scan),
                            );
                            attrs.insert(
                                "db.plan.indexes_used".to_string(),
                                dbintel_core::pdata::AttributeValue::String(plan.indexes_used.join(",")),
                            );
                            attrs.insert(
                                "db.plan.join_types".to_string(),
                                dbintel_core::pdata::AttributeValue::String(plan.join_types.join(",")),
                            );
                            attrs.insert(
                                "db.plan.estimated_rows".to_string(),
                                dbintel_core::pdata::AttributeValue::Double(plan.estimated_rows),
                            );
                        }
                        Err(e) => warn!("plan parse failed: {e}"),
                    }
                }
            }
        }
        Ok(batch)
    }

    async fn shutdown(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "plan_parser"
    }

    fn accepted_kinds(&self) -> &[PayloadKind] {
        &[PayloadKind::Logs]
    }
}

pub struct OhiTransformStage {
    transform: Arc<OhiTransform>,
}

impl OhiTransformStage {
    pub fn new(transform: Arc<OhiTransform>) -> Self {
        Self { transform }
    }
}

#[async_trait]
impl dbintel_core::traits::Processor for OhiTransformStage {
    async fn start(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn consume(&mut self, mut batch: Batch) -> Result<Batch, PipelineError> {
        self.transform.transform(&mut batch);
        Ok(batch)
    }

    async fn shutdown(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "ohi_transform"
    }

    fn accepted_kinds(&self) -> &[PayloadKind] {
        &[PayloadKind::Metrics]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan_parser::PlanParserConfig;
    use dbintel_core::pdata::{AttributeValue, LogBody, LogRecord, Resource, Scope, Severity};
    use dbintel_core::traits::Processor;

    fn plan_record(plan_json: &str) -> Record {
        let mut attributes = dbintel_core::pdata::AttributeMap::new();
        attributes.insert(PLAN_JSON_ATTR.to_string(), AttributeValue::String(plan_json.to_string()));
        Record::Log(LogRecord {
            timestamp: chrono::Utc::now(),
            severity: Severity::Info,
            body: LogBody::Text("select 1".into()),
            attributes,
        })
    }

    #[tokio::test]
    async fn plan_parser_stage_flattens_parsed_plan_onto_the_record() {
        let mut stage = PlanParserStage::new(Arc::new(PlanParser::new(PlanParserConfig::default())));
        let plan_json = r#"[{"Plan":{"Node Type":"Seq Scan","Total Cost":12.5,"Plan Rows":10}}]"#;
        let batch = Batch::single_resource(Resource {
            attributes: Default::default(),
            scopes: vec![Scope {
                name: "sql".into(),
                version: "1".into(),
                records: vec![plan_record(plan_json)],
            }],
        });
        let out = stage.consume(batch).await.unwrap();
        let record = &out.resources[0].scopes[0].records[0];
        assert_eq!(
            record.attributes().get("db.plan.has_seq_scan"),
            Some(&AttributeValue::Bool(true))
        );
        assert_eq!(
            record.attributes().get("db.plan.total_cost").and_then(|v| v.as_f64()),
            Some(12.5)
        );
    }

    #[tokio::test]
    async fn plan_parser_stage_passes_through_records_without_a_plan_attribute() {
        let mut stage = PlanParserStage::new(Arc::new(PlanParser::new(PlanParserConfig::default())));
        let record = Record::Log(LogRecord {
            timestamp: chrono::Utc::now(),
            severity: Severity::Info,
            body: LogBody::Text("no plan here".into()),
            attributes: Default::default(),
        });
        let batch = Batch::single_resource(Resource {
            attributes: Default::default(),
            scopes: vec![Scope {
                name: "sql".into(),
                version: "1".into(),
                records: vec![record],
            }],
        });
        let out = stage.consume(batch).await.unwrap();
        assert_eq!(out.record_count(), 1);
    }
}
