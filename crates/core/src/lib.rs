pub mod collector;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pdata;
pub mod retry;
pub mod traits;
pub mod types;

pub use collector::*;
pub use error::*;
pub use metrics::*;
pub use model::*;
pub use pdata::*;
pub use retry::*;
pub use traits::*;
pub use types::*;
