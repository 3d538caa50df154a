#![forbid(unsafe_code)]

//! Telemetry primitives shared across the seedgate workspace: logging setup
//! and the Prometheus metrics registry. Metric handles are passed into
//! components explicitly; nothing reads a process-wide global.

pub mod init;
pub mod metrics;

pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, init_logging};
pub use metrics::Metrics;
