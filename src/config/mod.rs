//! Configuration types and loading.

mod settings;

pub use settings::{MetricsConfig, PolicyConfig, RouterConfig, RuntimeConfig, ValidationConfig};
