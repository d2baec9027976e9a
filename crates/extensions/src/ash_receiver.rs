//! C5 as a pipeline receiver: drives `ActiveSessionSampler`'s background
//! sampling loop and separately polls its ring buffer on its own tick,
//! converting newly captured samples into `pdata` log records and pushing
//! them downstream. The sampler keeps its own retention window; this
//! receiver only tracks a high-water mark so the same sample is never
//! emitted twice.

use std::sync::Arc;
use std::time::Duration;

use dbintel_core::pdata::{AttributeMap, AttributeValue, Batch, LogBody, LogRecord, Record, Resource, Scope, Severity};
use dbintel_core::traits::Receiver as ReceiverTrait;
use dbintel_core::{ASHSample, PipelineError};
use sqlx::PgPool;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::ActiveSessionSampler;

pub struct AshReceiverConfig {
    pub poll_interval: Duration,
    pub resource_attributes: AttributeMap,
}

impl Default for AshReceiverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            resource_attributes: AttributeMap::new(),
        }
    }
}

fn sample_to_record(sample: ASHSample) -> Record {
    let mut attributes = AttributeMap::new();
    attributes.insert("pid".to_string(), AttributeValue::Int(sample.pid as i64));
    attributes.insert("usename".to_string(), AttributeValue::String(sample.usename));
    attributes.insert("datname".to_string(), AttributeValue::String(sample.datname));
    if let Some(query_id) = sample.query_id {
        attributes.insert("query_id".to_string(), AttributeValue::Int(query_id));
    }
    attributes.insert("state".to_string(), AttributeValue::String(sample.state));
    if let Some(wait_event_type) = sample.wait_event_type {
        attributes.insert("wait_event_type".to_string(), AttributeValue::String(wait_event_type));
    }
    if let Some(wait_event) = sample.wait_event {
        attributes.insert("wait_event".to_string(), AttributeValue::String(wait_event));
    }
    attributes.insert("backend_type".to_string(), AttributeValue::String(sample.backend_type));

    Record::Log(LogRecord {
        timestamp: sample.sample_time,
        severity: Severity::Info,
        body: LogBody::Text(sample.query.unwrap_or_default()),
        attributes,
    })
}

pub struct AshReceiver {
    sampler: Arc<ActiveSessionSampler>,
    pool: PgPool,
    config: AshReceiverConfig,
    batch_tx: mpsc::Sender<Batch>,
    high_water_mark: Arc<Mutex<chrono::DateTime<chrono::Utc>>>,
    poll_task: Option<JoinHandle<()>>,
}

impl AshReceiver {
    pub fn new(
        sampler: Arc<ActiveSessionSampler>,
        pool: PgPool,
        config: AshReceiverConfig,
        batch_tx: mpsc::Sender<Batch>,
    ) -> Self {
        Self {
            sampler,
            pool,
            config,
            batch_tx,
            high_water_mark: Arc::new(Mutex::new(chrono::DateTime::<chrono::Utc>::MIN_UTC)),
            poll_task: None,
        }
    }

    async fn poll_tick(
        sampler: &ActiveSessionSampler,
        high_water_mark: &Mutex<chrono::DateTime<chrono::Utc>>,
        resource_attributes: &AttributeMap,
        batch_tx: &mpsc::Sender<Batch>,
    ) {
        let mut mark = high_water_mark.lock().await;
        let fresh: Vec<ASHSample> = sampler
            .get_recent_samples()
            .await
            .into_iter()
            .filter(|s| s.sample_time > *mark)
            .collect();
        if fresh.is_empty() {
            return;
        }
        if let Some(latest) = fresh.iter().map(|s| s.sample_time).max() {
            *mark = latest;
        }
        drop(mark);

        let records = fresh.into_iter().map(sample_to_record).collect();
        let batch = Batch::single_resource(Resource {
            attributes: resource_attributes.clone(),
            scopes: vec![Scope {
                name: "ash".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                records,
            }],
        });
        if let Err(e) = batch_tx.send(batch).await {
            warn!("ash receiver's downstream channel is closed: {e}");
        }
    }
}

#[async_trait::async_trait]
impl ReceiverTrait for AshReceiver {
    async fn start(&mut self) -> Result<(), PipelineError> {
        self.sampler.start_sampling(self.pool.clone()).await;

        let sampler = self.sampler.clone();
        let high_water_mark = self.high_water_mark.clone();
        let resource_attributes = self.config.resource_attributes.clone();
        let batch_tx = self.batch_tx.clone();
        let interval = self.config.poll_interval;

        self.poll_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                Self::poll_tick(&sampler, &high_water_mark, &resource_attributes, &batch_tx).await;
            }
        }));
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), PipelineError> {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "ash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_without_optional_fields_becomes_a_minimal_record() {
        let sample = ASHSample {
            sample_time: chrono::Utc::now(),
            pid: 42,
            usename: "app".into(),
            datname: "orders".into(),
            query_id: None,
            state: "active".into(),
            wait_event_type: None,
            wait_event: None,
            query: None,
            backend_type: "client backend".into(),
        };
        let record = sample_to_record(sample);
        assert_eq!(record.attributes().get("pid"), Some(&AttributeValue::Int(42)));
        assert!(!record.attributes().contains_key("query_id"));
        assert!(!record.attributes().contains_key("wait_event"));
    }
}
