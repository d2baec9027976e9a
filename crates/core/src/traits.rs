//! The three lifecycle operations every pipeline node implements (§4.13),
//! and the capability-set dispatch described in §9: a node declares which
//! payload kinds it accepts, and pipeline construction rejects incompatible
//! wiring before the first tick.

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::pdata::{Batch, PayloadKind};

/// Shared host services a node may need at `start` time (self-metrics
/// registration, shared connection-pool registry handle, etc). Kept as an
/// opaque marker type here; concrete hosts live in the pipeline crate to
/// avoid a dependency cycle.
pub trait Host: Send + Sync {}

#[async_trait]
pub trait Receiver: Send + Sync {
    async fn start(&mut self) -> Result<(), PipelineError>;
    async fn shutdown(&mut self) -> Result<(), PipelineError>;
    /// The name used in logs and self-metrics.
    fn name(&self) -> &str;
}

#[async_trait]
pub trait Processor: Send + Sync {
    async fn start(&mut self) -> Result<(), PipelineError>;
    async fn consume(&mut self, batch: Batch) -> Result<Batch, PipelineError>;
    async fn shutdown(&mut self) -> Result<(), PipelineError>;
    fn name(&self) -> &str;
    /// Payload kinds this processor is willing to receive. An empty result
    /// means "all kinds". Checked once at pipeline-construction time.
    fn accepted_kinds(&self) -> &[PayloadKind] {
        &[]
    }

    fn accepts(&self, kind: PayloadKind) -> bool {
        let accepted = self.accepted_kinds();
        accepted.is_empty() || accepted.contains(&kind)
    }
}

#[async_trait]
pub trait Exporter: Send + Sync {
    async fn start(&mut self) -> Result<(), PipelineError>;
    async fn export(&mut self, batch: &Batch) -> Result<(), PipelineError>;
    async fn shutdown(&mut self) -> Result<(), PipelineError>;
    fn name(&self) -> &str;
}
