pub mod circuit_breaker;
pub mod correlator;
pub mod cost_control;
pub mod ohi_transform;
pub mod plan_parser;
pub mod rate_limiter;
pub mod sampler;
pub mod stages;

pub use circuit_breaker::*;
pub use correlator::*;
pub use cost_control::*;
pub use ohi_transform::*;
pub use plan_parser::*;
pub use rate_limiter::*;
pub use sampler::*;
pub use stages::*;
