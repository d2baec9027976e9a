pub mod batch_processor;
pub mod memory_limiter;
pub mod runtime;

pub use batch_processor::*;
pub use memory_limiter::*;
pub use runtime::*;
