//! tracebench: HTTP front end for the synthetic tracing pipeline.
//!
//! This crate handles:
//! - Loading and merging YAML config with environment interpolation
//! - Accepting CSV uploads and feeding each row into the pipeline
//! - Serving Prometheus metrics and health checks
//! - Graceful shutdown on SIGINT/SIGTERM/SIGQUIT

pub mod app;
pub mod config;
pub mod error;
pub mod ingress;
pub mod logging;
pub mod metrics;
pub mod signal;

// Re-export commonly used items
pub use app::{build_tracer_provider, run, shutdown_tracer};
pub use config::{CliArgs, Config, ConfigPath};
pub use error::{AppError, ConfigError, MetricsError, UploadError};
pub use ingress::{Row, UploadResponse, parse_rows, parse_upload};
pub use logging::init_tracing;
pub use signal::shutdown_signal;
