//! Head-of-pipeline node that sheds whole batches once a rough in-flight
//! byte estimate crosses a configured watermark (§4.13, §5).

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dbintel_core::pdata::{Batch, PayloadKind};
use dbintel_core::traits::Processor;
use dbintel_core::PipelineError;
use tracing::warn;

pub struct MemoryLimiterConfig {
    pub limit_bytes: usize,
    pub spike_limit_bytes: usize,
}

impl Default for MemoryLimiterConfig {
    fn default() -> Self {
        Self {
            limit_bytes: 512 * 1024 * 1024,
            spike_limit_bytes: 128 * 1024 * 1024,
        }
    }
}

/// Tracks bytes currently admitted into the pipeline. `release` must be
/// called once a batch finishes export so later batches aren't shed
/// forever because of a stuck estimate.
pub struct MemoryLimiter {
    config: MemoryLimiterConfig,
    in_flight_bytes: AtomicUsize,
}

fn estimate_size(batch: &Batch) -> usize {
    serde_json::to_vec(batch).map(|bytes| bytes.len()).unwrap_or(0)
}

impl MemoryLimiter {
    pub fn new(config: MemoryLimiterConfig) -> Self {
        Self {
            config,
            in_flight_bytes: AtomicUsize::new(0),
        }
    }

    pub fn release(&self, bytes: usize) {
        self.in_flight_bytes.fetch_sub(bytes.min(self.in_flight_bytes.load(Ordering::Relaxed)), Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight_bytes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Processor for MemoryLimiter {
    async fn start(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn consume(&mut self, batch: Batch) -> Result<Batch, PipelineError> {
        let size = estimate_size(&batch);
        let hard_limit = self.config.limit_bytes + self.config.spike_limit_bytes;
        let projected = self.in_flight_bytes.load(Ordering::Relaxed) + size;
        if projected > hard_limit {
            warn!(projected, hard_limit, "memory limiter shed a batch");
            return Err(PipelineError::ResourceExhausted(format!(
                "in-flight bytes {projected} would exceed limit {hard_limit}"
            )));
        }
        self.in_flight_bytes.fetch_add(size, Ordering::Relaxed);
        Ok(batch)
    }

    async fn shutdown(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "memory_limiter"
    }

    fn accepted_kinds(&self) -> &[PayloadKind] {
        &[]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbintel_core::pdata::{MetricPoint, Record, Resource, Scope};

    fn batch_with(n: usize) -> Batch {
        Batch::single_resource(Resource {
            attributes: Default::default(),
            scopes: vec![Scope {
                name: "s".into(),
                version: "1".into(),
                records: (0..n)
                    .map(|i| Record::Metric(MetricPoint::gauge(format!("m{i}"), i as i64)))
                    .collect(),
            }],
        })
    }

    #[tokio::test]
    async fn sheds_batch_once_hard_limit_would_be_exceeded() {
        let mut limiter = MemoryLimiter::new(MemoryLimiterConfig {
            limit_bytes: 1,
            spike_limit_bytes: 1,
        });
        let result = limiter.consume(batch_with(50)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn admits_batch_within_limit_and_tracks_in_flight_bytes() {
        let mut limiter = MemoryLimiter::new(MemoryLimiterConfig::default());
        limiter.consume(batch_with(1)).await.unwrap();
        assert!(limiter.in_flight() > 0);
    }
}
