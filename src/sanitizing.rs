//! Wraps `QuerySanitizer` as a pipeline `Processor` node so it can sit
//! downstream of the SQL and ASH receivers: every record's log body and
//! known query-text attributes are sanitized in place before anything
//! else in the chain sees them.

use dbintel_core::pdata::{AttributeValue, Batch, LogBody, Record};
use dbintel_core::traits::Processor;
use dbintel_core::PipelineError;

use crate::sanitizer::{QuerySanitizer, SanitizationMode};

/// Attribute keys that may carry raw query text, across the query library's
/// output mappings (slow queries, blocking sessions, individual queries,
/// plan history).
const QUERY_TEXT_ATTRS: &[&str] = &["query_text", "query", "blocking_query", "blocked_query", "plan"];

pub struct SanitizingStage {
    sanitizer: QuerySanitizer,
}

impl SanitizingStage {
    pub fn new(mode: SanitizationMode) -> Self {
        Self {
            sanitizer: QuerySanitizer::new(mode),
        }
    }

    fn sanitize_record(sanitizer: &QuerySanitizer, record: &mut Record) {
        if let Record::Log(log) = record {
            if let LogBody::Text(text) = &log.body {
                log.body = LogBody::Text(sanitizer.sanitize(text));
            }
        }
        let attributes = record.attributes_mut();
        for key in QUERY_TEXT_ATTRS {
            if let Some(AttributeValue::String(text)) = attributes.get(*key) {
                let sanitized = sanitizer.sanitize(text);
                attributes.insert((*key).to_string(), AttributeValue::String(sanitized));
            }
        }
    }
}

#[async_trait::async_trait]
impl Processor for SanitizingStage {
    async fn start(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn consume(&mut self, mut batch: Batch) -> Result<Batch, PipelineError> {
        let sanitizer = &self.sanitizer;
        batch.for_each_record_mut(|record| Self::sanitize_record(sanitizer, record));
        Ok(batch)
    }

    async fn shutdown(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "sanitizer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbintel_core::pdata::{AttributeMap, LogRecord, Resource, Scope, Severity};

    fn log_record(query_text: &str) -> Record {
        let mut attributes = AttributeMap::new();
        attributes.insert("query_text".to_string(), AttributeValue::String(query_text.to_string()));
        Record::Log(LogRecord {
            timestamp: chrono::Utc::now(),
            severity: Severity::Info,
            body: LogBody::Text(query_text.to_string()),
            attributes,
        })
    }

    #[tokio::test]
    async fn full_mode_replaces_string_literals_in_body_and_known_attributes() {
        let mut stage = SanitizingStage::new(SanitizationMode::Full);
        let batch = Batch::single_resource(Resource {
            attributes: Default::default(),
            scopes: vec![Scope {
                name: "sql".into(),
                version: "1".into(),
                records: vec![log_record("select * from users where email = 'a@b.com'")],
            }],
        });
        let out = stage.consume(batch).await.unwrap();
        let record = &out.resources[0].scopes[0].records[0];
        match record {
            Record::Log(log) => match &log.body {
                LogBody::Text(body) => assert!(!body.contains("a@b.com")),
                other => panic!("expected text body, got {other:?}"),
            },
            other => panic!("expected log record, got {other:?}"),
        }
        match record.attributes().get("query_text") {
            Some(AttributeValue::String(v)) => assert!(!v.contains("a@b.com")),
            other => panic!("expected sanitized query_text attribute, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn none_mode_leaves_records_untouched() {
        let mut stage = SanitizingStage::new(SanitizationMode::None);
        let batch = Batch::single_resource(Resource {
            attributes: Default::default(),
            scopes: vec![Scope {
                name: "sql".into(),
                version: "1".into(),
                records: vec![log_record("select * from users where email = 'a@b.com'")],
            }],
        });
        let out = stage.consume(batch).await.unwrap();
        let record = &out.resources[0].scopes[0].records[0];
        match record.attributes().get("query_text") {
            Some(AttributeValue::String(v)) => assert!(v.contains("a@b.com")),
            other => panic!("expected untouched query_text attribute, got {other:?}"),
        }
    }
}
