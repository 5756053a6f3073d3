pub mod checkpoint;
pub mod config;
pub mod error;
pub mod optimization;
pub mod parameters;

pub use checkpoint::OptimizerState;
pub use config::BlendConfig;
pub use error::{OptimErr, Result};
pub use optimization::BlendAdam;
pub use parameters::{ParameterHandle, ParameterStore};
