mod logging;
mod metrics;
mod settings;

pub use logging::init_tracing;
pub use metrics::{Metrics, NoopMetrics};
pub use settings::{ConfigError, PbsConfig};
