//! NRI-JSON stream exporter adapter (C14): writes one JSON document per
//! emission to a configured sink. Entity mapping rules turn a resource's
//! attributes into an entity key; every metric and log record in that
//! resource becomes a member event of that entity, reusing the same
//! `Event` protocol-v4 shape `NRIAdapter::adapt` builds for the legacy
//! metrics path.

use async_trait::async_trait;
use chrono::Utc;
use dbintel_core::pdata::{AttributeValue, Batch, LogBody, Record};
use dbintel_core::retry::{send_with_retry, DeliveryMetrics, DeliverySnapshot, RetryPolicy};
use dbintel_core::PipelineError;
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use crate::Event;

/// Attribute keys consulted, in order, to build an entity key for a
/// resource. The first one present wins.
const ENTITY_KEY_ATTRS: &[&str] = &["entity.key", "db.name", "host.name"];

#[derive(Debug, Clone)]
pub enum NriSink {
    Stdout,
    File(PathBuf),
    Http(String),
}

pub struct NriStreamExporterConfig {
    pub sink: NriSink,
    pub retry_policy: RetryPolicy,
}

impl Default for NriStreamExporterConfig {
    fn default() -> Self {
        Self {
            sink: NriSink::Stdout,
            retry_policy: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct NriDocument {
    protocol_version: String,
    entity_key: String,
    events: Vec<Event>,
}

fn entity_key_for(resource: &dbintel_core::pdata::Resource) -> String {
    for key in ENTITY_KEY_ATTRS {
        if let Some(value) = resource.attributes.get(*key).and_then(AttributeValue::as_str) {
            return value.to_string();
        }
    }
    "unknown".to_string()
}

fn record_to_event(record: &Record) -> Event {
    let mut attributes = std::collections::HashMap::new();
    let event_type = match record {
        Record::Metric(m) => {
            attributes.insert("value".to_string(), serde_json::json!(m.value.as_f64()));
            for (k, v) in &m.attributes {
                attributes.insert(k.clone(), attribute_to_json(v));
            }
            format!("{}Sample", m.name.replace(['.', '_'], ""))
        }
        Record::Log(l) => {
            match &l.body {
                LogBody::Text(t) => {
                    attributes.insert("message".to_string(), serde_json::json!(t));
                }
                LogBody::Structured(v) => {
                    attributes.insert("message".to_string(), v.clone());
                }
            }
            for (k, v) in &l.attributes {
                attributes.insert(k.clone(), attribute_to_json(v));
            }
            attributes
                .get("eventType")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| "PostgresLogSample".to_string())
        }
        Record::Span(s) => {
            for (k, v) in &s.attributes {
                attributes.insert(k.clone(), attribute_to_json(v));
            }
            "PostgresSpanSample".to_string()
        }
    };

    Event {
        event_type,
        timestamp: record.timestamp().timestamp(),
        attributes,
    }
}

fn attribute_to_json(value: &AttributeValue) -> serde_json::Value {
    match value {
        AttributeValue::String(s) => serde_json::json!(s),
        AttributeValue::Int(i) => serde_json::json!(i),
        AttributeValue::Double(d) => serde_json::json!(d),
        AttributeValue::Bool(b) => serde_json::json!(b),
    }
}

pub struct NriStreamExporter {
    config: NriStreamExporterConfig,
    http_client: hyper::Client<hyper::client::HttpConnector>,
    delivery: DeliveryMetrics,
}

impl NriStreamExporter {
    pub fn new(config: NriStreamExporterConfig) -> Self {
        Self {
            config,
            http_client: hyper::Client::new(),
            delivery: DeliveryMetrics::default(),
        }
    }

    pub fn delivery_snapshot(&self) -> DeliverySnapshot {
        self.delivery.snapshot()
    }

    async fn write_document(&self, doc: &NriDocument) -> Result<(), String> {
        let body = serde_json::to_vec(doc).map_err(|e| e.to_string())?;
        match &self.config.sink {
            NriSink::Stdout => {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(&body).await.map_err(|e| e.to_string())?;
                stdout.write_all(b"\n").await.map_err(|e| e.to_string())?;
                Ok(())
            }
            NriSink::File(path) => {
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .map_err(|e| e.to_string())?;
                file.write_all(&body).await.map_err(|e| e.to_string())?;
                file.write_all(b"\n").await.map_err(|e| e.to_string())?;
                Ok(())
            }
            NriSink::Http(endpoint) => {
                let request = hyper::Request::builder()
                    .method(hyper::Method::POST)
                    .uri(endpoint)
                    .header("Content-Type", "application/json")
                    .body(hyper::Body::from(body))
                    .map_err(|e| e.to_string())?;
                let response = self.http_client.request(request).await.map_err(|e| e.to_string())?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(format!("non-success status {}", response.status()))
                }
            }
        }
    }
}

#[async_trait]
impl dbintel_core::traits::Exporter for NriStreamExporter {
    async fn start(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn export(&mut self, batch: &Batch) -> Result<(), PipelineError> {
        for resource in &batch.resources {
            let entity_key = entity_key_for(resource);
            let events: Vec<Event> = resource
                .scopes
                .iter()
                .flat_map(|s| s.records.iter())
                .map(record_to_event)
                .collect();
            if events.is_empty() {
                continue;
            }
            let doc = NriDocument {
                protocol_version: "4".to_string(),
                entity_key,
                events,
            };
            send_with_retry(&self.config.retry_policy, &self.delivery, || {
                let doc = &doc;
                async move { self.write_document(doc).await }
            })
            .await
            .map_err(|e| {
                tracing::warn!("NRI stream export exhausted retry budget: {e}");
                PipelineError::TransientIo(e)
            })?;
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "nri_stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbintel_core::pdata::{AttributeMap, MetricPoint, Resource, Scope};
    use dbintel_core::traits::Exporter;

    fn batch_with_entity(entity_key: &str) -> Batch {
        let mut attrs = AttributeMap::new();
        attrs.insert("db.name".to_string(), entity_key.into());
        Batch::single_resource(Resource {
            attributes: attrs,
            scopes: vec![Scope {
                name: "s".into(),
                version: "1".into(),
                records: vec![Record::Metric(MetricPoint::gauge("connections", 3i64))],
            }],
        })
    }

    #[tokio::test]
    async fn stdout_sink_accepts_export_without_error() {
        let mut exporter = NriStreamExporter::new(NriStreamExporterConfig::default());
        let result = exporter.export(&batch_with_entity("orders")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn entity_key_prefers_db_name_attribute() {
        let batch = batch_with_entity("orders");
        assert_eq!(entity_key_for(&batch.resources[0]), "orders");
    }

    #[tokio::test]
    async fn resource_with_no_records_produces_no_event_and_succeeds() {
        let mut exporter = NriStreamExporter::new(NriStreamExporterConfig::default());
        let batch = Batch::single_resource(Resource::default());
        assert!(exporter.export(&batch).await.is_ok());
    }
}
