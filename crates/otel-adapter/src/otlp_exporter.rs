//! OTLP-over-HTTP exporter adapter (C14). Framing follows the existing
//! OTLP wire contract at the collector boundary; the concern this module
//! owns is the queued-sender and retry policy wrapped around that POST,
//! not reimplementing protobuf encoding (`crate::create_meter_provider`
//! already covers gRPC export via the official exporter builder for
//! callers that want it).

use async_trait::async_trait;
use dbintel_core::pdata::Batch;
use dbintel_core::retry::{send_with_retry, DeliveryMetrics, DeliverySnapshot, RetryPolicy};
use dbintel_core::PipelineError;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

pub struct OtlpExporterConfig {
    pub endpoint: String,
    pub queue_capacity: usize,
    pub retry_policy: RetryPolicy,
}

impl Default for OtlpExporterConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4318/v1/metrics".to_string(),
            queue_capacity: 256,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// A bounded-capacity queued sender in front of the HTTP POST, so a slow
/// collector endpoint sheds load rather than blocking the pipeline.
pub struct OtlpExporter {
    config: OtlpExporterConfig,
    client: Client<HttpConnector>,
    inflight: Arc<Semaphore>,
    delivery: Arc<DeliveryMetrics>,
}

impl OtlpExporter {
    pub fn new(config: OtlpExporterConfig) -> Self {
        let queue_capacity = config.queue_capacity;
        Self {
            config,
            client: Client::new(),
            inflight: Arc::new(Semaphore::new(queue_capacity)),
            delivery: Arc::new(DeliveryMetrics::default()),
        }
    }

    pub fn delivery_snapshot(&self) -> DeliverySnapshot {
        self.delivery.snapshot()
    }

    async fn send_once(&self, body: Vec<u8>) -> Result<(), String> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(&self.config.endpoint)
            .header("Content-Type", "application/json")
            .body(Body::from(body))
            .map_err(|e| e.to_string())?;

        let response = self.client.request(request).await.map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("non-success status {}", response.status()))
        }
    }
}

#[async_trait]
impl dbintel_core::traits::Exporter for OtlpExporter {
    async fn start(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn export(&mut self, batch: &Batch) -> Result<(), PipelineError> {
        let Ok(permit) = self.inflight.clone().try_acquire_owned() else {
            self.delivery.record_dropped();
            return Err(PipelineError::ResourceExhausted(
                "otlp exporter queue full".to_string(),
            ));
        };

        let body = serde_json::to_vec(batch)
            .map_err(|e| PipelineError::Data(format!("failed to encode OTLP batch: {e}")))?;

        let result = send_with_retry(&self.config.retry_policy, &self.delivery, || {
            let body = body.clone();
            async { self.send_once(body).await }
        })
        .await;

        drop(permit);

        result.map_err(|e| {
            warn!("OTLP export exhausted retry budget: {e}");
            PipelineError::TransientIo(e)
        })
    }

    async fn shutdown(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "otlp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbintel_core::pdata::{AttributeMap, MetricPoint, Record, Resource, Scope};
    use dbintel_core::traits::Exporter;

    fn sample_batch() -> Batch {
        Batch::single_resource(Resource {
            attributes: AttributeMap::new(),
            scopes: vec![Scope {
                name: "s".into(),
                version: "1".into(),
                records: vec![Record::Metric(MetricPoint::gauge("up", 1i64))],
            }],
        })
    }

    #[tokio::test]
    async fn export_to_unreachable_endpoint_exhausts_retry_budget_and_reports_transient_io() {
        let mut exporter = OtlpExporter::new(OtlpExporterConfig {
            endpoint: "http://127.0.0.1:1/v1/metrics".to_string(),
            queue_capacity: 4,
            retry_policy: RetryPolicy {
                initial_interval: std::time::Duration::from_millis(1),
                max_interval: std::time::Duration::from_millis(2),
                max_elapsed_time: std::time::Duration::from_millis(20),
                multiplier: 2.0,
            },
        });
        let result = exporter.export(&sample_batch()).await;
        assert!(matches!(result, Err(PipelineError::TransientIo(_))));
        assert!(exporter.delivery_snapshot().failed >= 1);
    }
}
