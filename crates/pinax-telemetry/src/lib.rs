pub mod http;
pub mod init;
pub mod metrics;

pub use init::init_tracing;
pub use metrics::{install, metrics, MetricsSink, PrometheusSink};
