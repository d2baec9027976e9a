//! C4: the enhanced SQL receiver. Per tick, for each configured query
//! category, selects a query via C2 against the feature set C1 last
//! published, runs it over a pooled connection from C3, converts rows to
//! `pdata` records per the query's `QueryOutputSpec`, stamps resource
//! attributes, and pushes the resulting batch to the pipeline. On query
//! failure it retries once against the query's declared fallback before
//! giving up on that category for the tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dbintel_core::pdata::{
    AttributeMap, AttributeValue, Batch, LogBody, LogRecord, MetricPoint, NumberValue, Record,
    Resource, Scope, Severity,
};
use dbintel_core::traits::Receiver as ReceiverTrait;
use dbintel_core::{FeatureSet, PipelineError, QueryDefinition, QueryOutputSpec};
use sqlx::{postgres::PgRow, PgPool, Row};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::feature_detector::FeatureDetector;
use crate::selector::QuerySelector;

pub struct SqlReceiverConfig {
    pub categories: Vec<String>,
    pub tick_interval: Duration,
    pub resource_attributes: AttributeMap,
}

/// Looks a named `QueryDefinition` up for fallback retry. Built once from
/// the same definition list handed to the `QuerySelector`.
struct DefinitionIndex {
    by_name: HashMap<String, Arc<QueryDefinition>>,
}

impl DefinitionIndex {
    fn new(definitions: &[QueryDefinition]) -> Self {
        Self {
            by_name: definitions
                .iter()
                .cloned()
                .map(|d| (d.name.clone(), Arc::new(d)))
                .collect(),
        }
    }

    fn get(&self, name: &str) -> Option<Arc<QueryDefinition>> {
        self.by_name.get(name).cloned()
    }
}

fn row_value(row: &PgRow, column: &str) -> Option<AttributeValue> {
    if let Ok(v) = row.try_get::<f64, _>(column) {
        return Some(AttributeValue::Double(v));
    }
    if let Ok(v) = row.try_get::<i64, _>(column) {
        return Some(AttributeValue::Int(v));
    }
    if let Ok(v) = row.try_get::<i32, _>(column) {
        return Some(AttributeValue::Int(v as i64));
    }
    if let Ok(v) = row.try_get::<bool, _>(column) {
        return Some(AttributeValue::Bool(v));
    }
    if let Ok(v) = row.try_get::<String, _>(column) {
        return Some(AttributeValue::String(v));
    }
    None
}

fn row_number(row: &PgRow, column: &str) -> Option<NumberValue> {
    match row_value(row, column)? {
        AttributeValue::Int(i) => Some(NumberValue::Int(i)),
        AttributeValue::Double(d) => Some(NumberValue::Double(d)),
        AttributeValue::Bool(b) => Some(NumberValue::Int(if b { 1 } else { 0 })),
        AttributeValue::String(s) => s.parse::<f64>().ok().map(NumberValue::Double),
    }
}

fn rows_to_records(rows: &[PgRow], output: &QueryOutputSpec) -> Vec<Record> {
    match output {
        QueryOutputSpec::Metrics(mappings) => rows
            .iter()
            .flat_map(|row| {
                mappings.iter().filter_map(move |mapping| {
                    let value = row_number(row, &mapping.value_column)?;
                    let mut attributes = AttributeMap::new();
                    for col in &mapping.attribute_columns {
                        if let Some(v) = row_value(row, col) {
                            attributes.insert(col.clone(), v);
                        }
                    }
                    Some(Record::Metric(MetricPoint {
                        name: mapping.metric_name.clone(),
                        timestamp: chrono::Utc::now(),
                        value,
                        attributes,
                        kind: dbintel_core::pdata::MetricKind::Gauge,
                    }))
                })
            })
            .collect(),
        QueryOutputSpec::Logs(mapping) => rows
            .iter()
            .map(|row| {
                let body = row_value(row, &mapping.body_column)
                    .and_then(|v| v.as_str().map(|s| s.to_string()))
                    .unwrap_or_default();
                let severity = mapping
                    .severity_column
                    .as_ref()
                    .and_then(|col| row_value(row, col))
                    .and_then(|v| v.as_str().map(Severity::from_source))
                    .unwrap_or(Severity::Unspecified);
                let mut attributes = AttributeMap::new();
                for col in &mapping.attribute_columns {
                    if let Some(v) = row_value(row, col) {
                        attributes.insert(col.clone(), v);
                    }
                }
                Record::Log(LogRecord {
                    timestamp: chrono::Utc::now(),
                    severity,
                    body: LogBody::Text(body),
                    attributes,
                })
            })
            .collect(),
    }
}

pub struct SqlReceiver {
    config: SqlReceiverConfig,
    pool: PgPool,
    feature_detector: Arc<FeatureDetector>,
    selector: Arc<QuerySelector>,
    definitions: Arc<DefinitionIndex>,
    batch_tx: mpsc::Sender<Batch>,
    task: Option<JoinHandle<()>>,
}

impl SqlReceiver {
    pub fn new(
        config: SqlReceiverConfig,
        pool: PgPool,
        feature_detector: Arc<FeatureDetector>,
        selector: Arc<QuerySelector>,
        definitions: Vec<QueryDefinition>,
        batch_tx: mpsc::Sender<Batch>,
    ) -> Self {
        Self {
            config,
            pool,
            feature_detector,
            selector,
            definitions: Arc::new(DefinitionIndex::new(&definitions)),
            batch_tx,
            task: None,
        }
    }

    async fn run_category(
        pool: &PgPool,
        selector: &QuerySelector,
        definitions: &DefinitionIndex,
        features: &FeatureSet,
        category: &str,
    ) -> Option<Vec<Record>> {
        let definition = selector.select(category, features).await?;
        match Self::run_definition(pool, &definition).await {
            Ok(records) => Some(records),
            Err(e) => {
                warn!(category, query = %definition.name, "query failed: {e}, trying fallback");
                let fallback = definition.fallback.as_ref().and_then(|name| definitions.get(name))?;
                match Self::run_definition(pool, &fallback).await {
                    Ok(records) => Some(records),
                    Err(e) => {
                        error!(category, query = %fallback.name, "fallback query also failed: {e}");
                        None
                    }
                }
            }
        }
    }

    async fn run_definition(pool: &PgPool, definition: &QueryDefinition) -> Result<Vec<Record>, sqlx::Error> {
        let rows = sqlx::query(&definition.sql).fetch_all(pool).await?;
        Ok(rows_to_records(&rows, &definition.output))
    }

    async fn tick(
        pool: PgPool,
        feature_detector: Arc<FeatureDetector>,
        selector: Arc<QuerySelector>,
        definitions: Arc<DefinitionIndex>,
        categories: Vec<String>,
        resource_attributes: AttributeMap,
        batch_tx: mpsc::Sender<Batch>,
    ) {
        let mut conn = match pool.acquire().await {
            Ok(c) => c,
            Err(e) => {
                error!("sql receiver failed to acquire a connection: {e}");
                return;
            }
        };
        let features = feature_detector.get_or_detect(&mut conn).await;
        drop(conn);

        let mut records = Vec::new();
        for category in &categories {
            if let Some(mut category_records) =
                Self::run_category(&pool, &selector, &definitions, &features, category).await
            {
                records.append(&mut category_records);
            }
        }

        if records.is_empty() {
            return;
        }

        let batch = Batch::single_resource(Resource {
            attributes: resource_attributes,
            scopes: vec![Scope {
                name: "sql".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                records,
            }],
        });

        if let Err(e) = batch_tx.send(batch).await {
            warn!("sql receiver's downstream channel is closed: {e}");
        }
    }
}

#[async_trait::async_trait]
impl ReceiverTrait for SqlReceiver {
    async fn start(&mut self) -> Result<(), PipelineError> {
        let pool = self.pool.clone();
        let feature_detector = self.feature_detector.clone();
        let selector = self.selector.clone();
        let definitions = self.definitions.clone();
        let categories = self.config.categories.clone();
        let resource_attributes = self.config.resource_attributes.clone();
        let batch_tx = self.batch_tx.clone();
        let interval = self.config.tick_interval;

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                Self::tick(
                    pool.clone(),
                    feature_detector.clone(),
                    selector.clone(),
                    definitions.clone(),
                    categories.clone(),
                    resource_attributes.clone(),
                    batch_tx.clone(),
                )
                .await;
            }
        }));
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), PipelineError> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "sql"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbintel_core::{MetricColumnMapping, QueryOutputSpec, QueryRequirements};

    fn metric_definition(name: &str) -> QueryDefinition {
        QueryDefinition {
            name: name.to_string(),
            category: "slow_queries".to_string(),
            sql: "select 1".to_string(),
            requirements: QueryRequirements {
                required_extensions: vec![],
                required_capabilities: vec![],
                minimum_version: None,
            },
            priority: 100,
            fallback: None,
            output: QueryOutputSpec::Metrics(vec![MetricColumnMapping {
                metric_name: "db.query.duration".to_string(),
                value_column: "avg_elapsed_time_ms".to_string(),
                attribute_columns: vec!["database_name".to_string()],
                description: "".to_string(),
            }]),
            parameters: vec![],
            timeout_secs: 30,
        }
    }

    #[test]
    fn definition_index_resolves_by_name() {
        let index = DefinitionIndex::new(&[metric_definition("primary"), metric_definition("fallback")]);
        assert!(index.get("fallback").is_some());
        assert!(index.get("missing").is_none());
    }
}
