use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Database connection error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Extension not available: {0}")]
    ExtensionNotAvailable(String),

    #[error("Unsupported PostgreSQL version: {0}")]
    UnsupportedVersion(u64),

    #[error("Query execution error: {0}")]
    QueryError(String),

    #[error("Capability check failed: {0}")]
    CapabilityError(String),

    #[error("Collection timeout after {0} seconds")]
    Timeout(u64),

    #[error("General error: {0}")]
    General(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Adapter error: {0}")]
    AdapterError(String),

    #[error("Export error: {0}")]
    ExportError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("General error: {0}")]
    General(#[from] anyhow::Error),
}

/// The error taxonomy of kinds (not types) the pipeline runtime and its
/// processors report. Propagation policy: a processor's `consume` returns
/// success or a single aggregated `PipelineError`; receivers log and count
/// their own errors without propagating them to configuration loading.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed configuration, missing required field, incompatible
    /// option combination. Surfaced at startup; fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network timeout, temporary database unavailability. Retried per
    /// policy; never fatal alone.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Memory cap, connection cap, queue full, cardinality cap, budget
    /// exhausted. Triggers load-shedding, not a crash.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Per-probe failure inside feature detection; accumulated, non-fatal
    /// if partial success.
    #[error("detection error in phase {phase}: {message}")]
    Detection { phase: String, message: String },

    /// Query requirements not met; causes query-selector fallback, not a
    /// hard error in normal operation, but surfaced when no fallback exists.
    #[error("missing feature: {0}")]
    MissingFeature(String),

    #[error("version mismatch: need {required}, have {actual}")]
    VersionMismatch { required: String, actual: String },

    /// Row scan failure, attribute type coercion failure. Drops the
    /// offending record, increments a counter, continues.
    #[error("data error: {0}")]
    Data(String),

    /// Any unexpected invariant violation, caught at the task boundary.
    #[error("panic in task {task}: {message}")]
    Panic { task: String, message: String },

    #[error(transparent)]
    Collector(#[from] CollectorError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl PipelineError {
    /// Whether the pipeline should keep running after this error, vs. exit.
    /// Only a startup-time `Configuration` error or explicit signal ends
    /// the process (§7).
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(self, PipelineError::Configuration(_))
    }
}

/// Aggregates per-record errors collected while processing a batch into the
/// single error a processor's `consume` returns, per the §7 propagation
/// policy.
#[derive(Debug, Default)]
pub struct AggregatedError {
    pub errors: Vec<PipelineError>,
}

impl AggregatedError {
    pub fn push(&mut self, err: PipelineError) {
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<(), PipelineError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            let message = self
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            Err(PipelineError::Data(message))
        }
    }
}
