pub mod adapters;
pub mod collection_engine;
pub mod config;
pub mod health;
pub mod sanitizer;
pub mod sanitizing;

pub use collection_engine::*;
pub use config::*;
pub use sanitizing::SanitizingStage;

// Re-export core types
pub use dbintel_core::*;
pub use dbintel_query_engine as query_engine;
pub use dbintel_extensions as extensions;
pub use dbintel_nri_adapter as nri_adapter;
pub use dbintel_otel_adapter as otel_adapter;