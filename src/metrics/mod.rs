pub mod dimensional;
pub mod newrelic_exporter;

pub use dimensional::{DimensionalMetrics, create_resource};
pub use newrelic_exporter::{
    NewRelicConfig, NewRelicRegion, NewRelicAttributes,
    NewRelicMetricNaming, init_new_relic_metrics,
};