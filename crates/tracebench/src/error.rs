//! Error types for the tracebench binary.

use std::path::PathBuf;

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur while loading configuration files.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read a config file.
    #[snafu(display("Failed to read config file: {source}"))]
    ReadFile { source: std::io::Error },

    /// Failed to list a config directory.
    #[snafu(display("Failed to read config directory {}: {source}", path.display()))]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Config path is not a YAML file.
    #[snafu(display("Unsupported config format for {}: expected .yaml or .yml", path.display()))]
    UnsupportedFormat { path: PathBuf },

    /// One or more environment variables could not be substituted.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// YAML did not match the config schema.
    #[snafu(display("Failed to parse YAML config: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// No file supplied a `pipeline` section.
    #[snafu(display("No 'pipeline' section found in any config source"))]
    MissingPipeline,

    /// The `pipeline` section was rejected.
    #[snafu(display("Invalid pipeline section: {source}"))]
    Topology {
        source: tracebench_core::ConfigError,
    },

    /// A listen address did not parse.
    #[snafu(display("Invalid {section} address '{address}': {source}"))]
    InvalidAddress {
        section: &'static str,
        address: String,
        source: std::net::AddrParseError,
    },

    /// Errors collected across several config sources.
    #[snafu(display("Configuration errors:\n  {}", errors.join("\n  ")))]
    MultipleErrors { errors: Vec<String> },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Metrics already initialized (double-init attempted).
    #[snafu(display("Metrics already initialized"))]
    AlreadyInitialized,

    /// Metrics controller accessed before init.
    #[snafu(display("Metrics not initialized"))]
    NotInitialized,
}

// ============ Upload Errors ============

/// Reasons an upload is refused as a whole.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum UploadError {
    /// The multipart form could not be read.
    #[snafu(display("Invalid multipart upload: {source}"))]
    Multipart {
        source: axum::extract::multipart::MultipartError,
    },

    /// A multipart request without a usable form body.
    #[snafu(display("Invalid multipart request: {source}"))]
    MultipartRequest {
        source: axum::extract::multipart::MultipartRejection,
    },

    /// The multipart form has no `file` field.
    #[snafu(display("Multipart upload has no '{field}' field"))]
    MissingFile { field: &'static str },

    /// The raw body could not be read.
    #[snafu(display("Failed to read request body: {source}"))]
    Body { source: axum::Error },

    /// The body looked like a zip archive but was not readable as one.
    #[snafu(display("Invalid zip archive: {source}"))]
    Archive { source: zip::result::ZipError },

    /// A member of the archive could not be decompressed.
    #[snafu(display("Failed to read archive member {member}: {source}"))]
    ReadMember {
        member: String,
        source: std::io::Error,
    },

    /// CSV data did not parse.
    #[snafu(display("Invalid CSV in {origin}: {source}"))]
    Csv { origin: String, source: csv::Error },

    /// The pipeline refused a row.
    #[snafu(display("Pipeline refused row {row}: {source}"))]
    Submit {
        row: usize,
        source: tracebench_core::SubmitError,
    },
}

// ============ Application Errors ============

/// Top-level errors from running the service.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AppError {
    /// Configuration could not be loaded.
    #[snafu(display("Failed to load config: {source}"))]
    Config { source: ConfigError },

    /// Metrics could not be initialized.
    #[snafu(display("Failed to initialize metrics: {source}"))]
    Metrics { source: MetricsError },

    /// The span exporter could not be built.
    #[snafu(display("Failed to initialize tracing exporter: {message}"))]
    TracerInit { message: String },

    /// The pipeline could not be started.
    #[snafu(display("Failed to start pipeline: {source}"))]
    Pipeline {
        source: tracebench_core::PipelineError,
    },

    /// A listener could not bind.
    #[snafu(display("Failed to bind {component} listener on {address}: {source}"))]
    Bind {
        component: &'static str,
        address: std::net::SocketAddr,
        source: std::io::Error,
    },

    /// The ingress server stopped with an error.
    #[snafu(display("Ingress server error: {source}"))]
    Serve { source: std::io::Error },
}
