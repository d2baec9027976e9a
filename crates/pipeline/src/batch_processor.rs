//! The sole processor permitted to buffer records across `consume` calls
//! (§4.13 invariant). Flushes on size or on a timeout, whichever comes
//! first.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dbintel_core::pdata::{Batch, PayloadKind};
use dbintel_core::traits::Processor;
use dbintel_core::PipelineError;

pub struct BatchProcessorConfig {
    pub max_batch_size: usize,
    pub max_batch_wait: Duration,
}

impl Default for BatchProcessorConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1000,
            max_batch_wait: Duration::from_secs(5),
        }
    }
}

pub struct BatchProcessor {
    config: BatchProcessorConfig,
    buffer: Batch,
    buffered_count: usize,
    first_buffered_at: Option<Instant>,
}

impl BatchProcessor {
    pub fn new(config: BatchProcessorConfig) -> Self {
        Self {
            config,
            buffer: Batch::new(),
            buffered_count: 0,
            first_buffered_at: None,
        }
    }

    fn should_flush(&self) -> bool {
        self.buffered_count >= self.config.max_batch_size
            || self
                .first_buffered_at
                .map(|t| t.elapsed() >= self.config.max_batch_wait)
                .unwrap_or(false)
    }

    fn take_buffer(&mut self) -> Batch {
        self.first_buffered_at = None;
        self.buffered_count = 0;
        std::mem::replace(&mut self.buffer, Batch::new())
    }
}

#[async_trait]
impl Processor for BatchProcessor {
    async fn start(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Appends incoming records into the internal buffer, keyed by
    /// resource attribute identity (matching resources are merged rather
    /// than duplicated). Returns an empty batch when not yet ready to
    /// flush; callers should treat an empty result as "nothing to pass
    /// downstream yet" rather than an error.
    async fn consume(&mut self, batch: Batch) -> Result<Batch, PipelineError> {
        if self.first_buffered_at.is_none() && !batch.is_empty() {
            self.first_buffered_at = Some(Instant::now());
        }
        self.buffered_count += batch.record_count();

        for incoming in batch.resources {
            if let Some(existing) = self
                .buffer
                .resources
                .iter_mut()
                .find(|r| r.attributes == incoming.attributes)
            {
                existing.scopes.extend(incoming.scopes);
            } else {
                self.buffer.resources.push(incoming);
            }
        }

        if self.should_flush() {
            Ok(self.take_buffer())
        } else {
            Ok(Batch::new())
        }
    }

    async fn shutdown(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "batch"
    }

    fn accepted_kinds(&self) -> &[PayloadKind] {
        &[]
    }
}

impl BatchProcessor {
    /// Forces whatever is currently buffered out, used by the runtime at
    /// shutdown so no records are lost to an unflushed batch.
    pub fn flush_remaining(&mut self) -> Batch {
        self.take_buffer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbintel_core::pdata::{MetricPoint, Record, Resource, Scope};

    fn single_metric_batch(name: &str) -> Batch {
        Batch::single_resource(Resource {
            attributes: Default::default(),
            scopes: vec![Scope {
                name: "s".into(),
                version: "1".into(),
                records: vec![Record::Metric(MetricPoint::gauge(name, 1i64))],
            }],
        })
    }

    #[tokio::test]
    async fn buffers_until_max_batch_size_then_flushes() {
        let mut processor = BatchProcessor::new(BatchProcessorConfig {
            max_batch_size: 2,
            max_batch_wait: Duration::from_secs(60),
        });
        let first = processor.consume(single_metric_batch("a")).await.unwrap();
        assert!(first.is_empty());
        let second = processor.consume(single_metric_batch("b")).await.unwrap();
        assert_eq!(second.record_count(), 2);
    }

    #[tokio::test]
    async fn flush_remaining_returns_whatever_is_buffered() {
        let mut processor = BatchProcessor::new(BatchProcessorConfig::default());
        processor.consume(single_metric_batch("a")).await.unwrap();
        let flushed = processor.flush_remaining();
        assert_eq!(flushed.record_count(), 1);
    }
}
