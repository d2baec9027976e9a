//! C13: builds a pipeline from receivers, a processor chain and exporters,
//! starts components in reverse dependency order (exporters, then
//! processors, then receivers) and shuts them down in forward order, and
//! enforces that no single processor tick can block the chain past its
//! configured timeout (§4.13).

use std::time::Duration;

use dbintel_core::pdata::Batch;
use dbintel_core::traits::{Exporter, Processor, Receiver};
use dbintel_core::{AggregatedError, PipelineError};
use tracing::{error, info, warn};

pub struct PipelineRuntimeConfig {
    /// Upper bound on a single processor's `consume` call. A processor
    /// that exceeds this is treated as a transient failure for that batch;
    /// the pipeline keeps running.
    pub processor_timeout: Duration,
}

impl Default for PipelineRuntimeConfig {
    fn default() -> Self {
        Self {
            processor_timeout: Duration::from_secs(10),
        }
    }
}

pub struct PipelineRuntime {
    config: PipelineRuntimeConfig,
    receivers: Vec<Box<dyn Receiver>>,
    processors: Vec<Box<dyn Processor>>,
    exporters: Vec<Box<dyn Exporter>>,
}

impl PipelineRuntime {
    pub fn new(
        config: PipelineRuntimeConfig,
        receivers: Vec<Box<dyn Receiver>>,
        processors: Vec<Box<dyn Processor>>,
        exporters: Vec<Box<dyn Exporter>>,
    ) -> Self {
        Self {
            config,
            receivers,
            processors,
            exporters,
        }
    }

    /// Exporters come up first so nothing is ever produced with nowhere to
    /// go; receivers come up last so nothing is accepted before the chain
    /// behind it is ready.
    pub async fn start(&mut self) -> Result<(), PipelineError> {
        for exporter in &mut self.exporters {
            info!(node = exporter.name(), "starting exporter");
            exporter.start().await?;
        }
        for processor in &mut self.processors {
            info!(node = processor.name(), "starting processor");
            processor.start().await?;
        }
        for receiver in &mut self.receivers {
            info!(node = receiver.name(), "starting receiver");
            receiver.start().await?;
        }
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), PipelineError> {
        let mut aggregated = AggregatedError::default();
        for receiver in &mut self.receivers {
            if let Err(e) = receiver.shutdown().await {
                aggregated.push(e);
            }
        }
        for processor in &mut self.processors {
            if let Err(e) = processor.shutdown().await {
                aggregated.push(e);
            }
        }
        for exporter in &mut self.exporters {
            if let Err(e) = exporter.shutdown().await {
                aggregated.push(e);
            }
        }
        aggregated.into_result()
    }

    /// Runs one batch through the processor chain synchronously. A
    /// processor that exceeds `processor_timeout` drops the batch for this
    /// tick and the chain continues with the next incoming batch; it does
    /// not stop the pipeline.
    pub async fn process(&mut self, mut batch: Batch) -> Result<Batch, PipelineError> {
        for processor in &mut self.processors {
            if batch.is_empty() {
                return Ok(batch);
            }
            let accepted = batch
                .payload_kind()
                .map(|kind| processor.accepts(kind))
                .unwrap_or(true);
            if !accepted {
                continue;
            }
            batch = match tokio::time::timeout(self.config.processor_timeout, processor.consume(batch)).await {
                Ok(Ok(next)) => next,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(node = processor.name(), "processor exceeded timeout, dropping batch");
                    return Err(PipelineError::TransientIo(format!(
                        "processor {} exceeded its timeout",
                        processor.name()
                    )));
                }
            };
        }
        Ok(batch)
    }

    /// Fans a batch out to every exporter. One exporter's failure does not
    /// prevent delivery to the others; failures are aggregated and
    /// reported once all exporters have been tried.
    pub async fn export(&mut self, batch: &Batch) -> Result<(), PipelineError> {
        let mut aggregated = AggregatedError::default();
        for exporter in &mut self.exporters {
            if let Err(e) = exporter.export(batch).await {
                error!(node = exporter.name(), error = %e, "exporter failed");
                aggregated.push(e);
            }
        }
        aggregated.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dbintel_core::pdata::{MetricPoint, PayloadKind, Record, Resource, Scope};

    struct DoublingProcessor;

    #[async_trait]
    impl Processor for DoublingProcessor {
        async fn start(&mut self) -> Result<(), PipelineError> {
            Ok(())
        }

        async fn consume(&mut self, mut batch: Batch) -> Result<Batch, PipelineError> {
            batch.for_each_record_mut(|record| {
                if let Record::Metric(m) = record {
                    if let dbintel_core::pdata::NumberValue::Int(v) = m.value {
                        m.value = dbintel_core::pdata::NumberValue::Int(v * 2);
                    }
                }
            });
            Ok(batch)
        }

        async fn shutdown(&mut self) -> Result<(), PipelineError> {
            Ok(())
        }

        fn name(&self) -> &str {
            "doubler"
        }
    }

    struct StallingProcessor;

    #[async_trait]
    impl Processor for StallingProcessor {
        async fn start(&mut self) -> Result<(), PipelineError> {
            Ok(())
        }

        async fn consume(&mut self, batch: Batch) -> Result<Batch, PipelineError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(batch)
        }

        async fn shutdown(&mut self) -> Result<(), PipelineError> {
            Ok(())
        }

        fn name(&self) -> &str {
            "stalling"
        }
    }

    fn batch_with(value: i64) -> Batch {
        Batch::single_resource(Resource {
            attributes: Default::default(),
            scopes: vec![Scope {
                name: "s".into(),
                version: "1".into(),
                records: vec![Record::Metric(MetricPoint::gauge("m", value))],
            }],
        })
    }

    #[tokio::test]
    async fn chains_processors_in_declared_order() {
        let mut runtime = PipelineRuntime::new(
            PipelineRuntimeConfig::default(),
            vec![],
            vec![Box::new(DoublingProcessor), Box::new(DoublingProcessor)],
            vec![],
        );
        let result = runtime.process(batch_with(1)).await.unwrap();
        if let Record::Metric(m) = &result.resources[0].scopes[0].records[0] {
            assert_eq!(m.value, dbintel_core::pdata::NumberValue::Int(4));
        }
    }

    #[tokio::test]
    async fn processor_exceeding_timeout_fails_that_batch_without_panicking() {
        let mut runtime = PipelineRuntime::new(
            PipelineRuntimeConfig {
                processor_timeout: Duration::from_millis(10),
            },
            vec![],
            vec![Box::new(StallingProcessor)],
            vec![],
        );
        let result = runtime.process(batch_with(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn processor_declining_payload_kind_is_skipped() {
        struct MetricsOnly;

        #[async_trait]
        impl Processor for MetricsOnly {
            async fn start(&mut self) -> Result<(), PipelineError> {
                Ok(())
            }
            async fn consume(&mut self, _batch: Batch) -> Result<Batch, PipelineError> {
                panic!("should never be called for a logs batch");
            }
            async fn shutdown(&mut self) -> Result<(), PipelineError> {
                Ok(())
            }
            fn name(&self) -> &str {
                "metrics_only"
            }
            fn accepted_kinds(&self) -> &[PayloadKind] {
                &[PayloadKind::Metrics]
            }
        }

        let mut runtime = PipelineRuntime::new(
            PipelineRuntimeConfig::default(),
            vec![],
            vec![Box::new(MetricsOnly)],
            vec![],
        );
        let log_batch = Batch::single_resource(Resource {
            attributes: Default::default(),
            scopes: vec![Scope {
                name: "s".into(),
                version: "1".into(),
                records: vec![Record::Log(dbintel_core::pdata::LogRecord {
                    timestamp: chrono::Utc::now(),
                    severity: dbintel_core::pdata::Severity::Info,
                    body: dbintel_core::pdata::LogBody::Text("hi".into()),
                    attributes: Default::default(),
                })],
            }],
        });
        let result = runtime.process(log_batch).await.unwrap();
        assert_eq!(result.record_count(), 1);
    }
}
