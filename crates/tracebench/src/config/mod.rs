//! Service configuration.
//!
//! ```yaml
//! pipeline:
//!   Type: standard
//!   Latency: ${STAGE_LATENCY_MS:-10}
//!   FailRate: 0.01
//!   StageCount: 4
//! mailbox:
//!   capacity: 1024
//!   admission: drop_oldest
//! stage:
//!   report_interval: 1000
//! tracing:
//!   service_name: tracebench
//!   exporter: otlp
//!   endpoint: http://localhost:4317
//! ingress:
//!   address: 0.0.0.0:3000
//! metrics:
//!   address: 0.0.0.0:9090
//! shutdown_timeout_secs: 30
//! ```
//!
//! Every section is optional per file except that some file must supply
//! `pipeline`. When several files are given, a section in a later file
//! replaces the same section from earlier ones.

mod path;
mod vars;

pub use path::{CliArgs, ConfigPath, is_yaml_file};
pub use vars::{InterpolationResult, interpolate};

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tracebench_core::{MailboxConfig, PipelineOptions, RawConfig, TopologyConfig};

use crate::error::{
    ConfigError, EnvInterpolationSnafu, InvalidAddressSnafu, MissingPipelineSnafu,
    MultipleErrorsSnafu, ReadDirSnafu, ReadFileSnafu, TopologySnafu, UnsupportedFormatSnafu,
    YamlParseSnafu,
};

pub const DEFAULT_INGRESS_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9090";
pub const DEFAULT_SERVICE_NAME: &str = "tracebench";
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Per-stage settings that do not affect message handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    /// Messages between throughput log lines; 0 disables them.
    #[serde(default = "default_report_interval")]
    pub report_interval: u64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            report_interval: default_report_interval(),
        }
    }
}

fn default_report_interval() -> u64 {
    tracebench_core::pipeline::DEFAULT_REPORT_INTERVAL
}

/// Where finished spans go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExporterKind {
    /// OTLP over gRPC, batched.
    #[default]
    Otlp,
    /// Discard spans.
    #[serde(rename = "none")]
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TracingConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub exporter: ExporterKind,
    /// OTLP collector endpoint. When unset the exporter reads
    /// `OTEL_EXPORTER_OTLP_ENDPOINT`, falling back to `http://localhost:4317`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            exporter: ExporterKind::default(),
            endpoint: None,
        }
    }
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

/// HTTP upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngressConfig {
    #[serde(default = "default_ingress_address")]
    pub address: String,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            address: default_ingress_address(),
        }
    }
}

fn default_ingress_address() -> String {
    DEFAULT_INGRESS_ADDR.to_string()
}

/// Prometheus endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    DEFAULT_METRICS_ADDR.to_string()
}

/// One YAML source. Sections left out defer to earlier sources or defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub pipeline: Option<RawConfig>,
    pub mailbox: Option<MailboxConfig>,
    pub stage: Option<StageConfig>,
    pub tracing: Option<TracingConfig>,
    pub ingress: Option<IngressConfig>,
    pub metrics: Option<MetricsConfig>,
    pub shutdown_timeout_secs: Option<u64>,
}

impl ConfigFile {
    pub fn parse_yaml(contents: &str) -> Result<Self, ConfigError> {
        // an empty document is a file with no sections
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents).context(YamlParseSnafu)
    }

    /// Layer `other` on top of `self`, section by section.
    pub fn merge(&mut self, other: ConfigFile) {
        fn overlay<T>(base: &mut Option<T>, top: Option<T>) {
            if top.is_some() {
                *base = top;
            }
        }

        overlay(&mut self.pipeline, other.pipeline);
        overlay(&mut self.mailbox, other.mailbox);
        overlay(&mut self.stage, other.stage);
        overlay(&mut self.tracing, other.tracing);
        overlay(&mut self.ingress, other.ingress);
        overlay(&mut self.metrics, other.metrics);
        overlay(&mut self.shutdown_timeout_secs, other.shutdown_timeout_secs);
    }
}

/// Fully resolved and validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub pipeline: TopologyConfig,
    pub mailbox: MailboxConfig,
    pub stage: StageConfig,
    pub tracing: TracingConfig,
    pub ingress: IngressConfig,
    pub metrics: MetricsConfig,
    pub shutdown_timeout_secs: u64,
}

impl Config {
    /// Load, merge, and validate every source.
    pub fn from_paths(paths: &[ConfigPath]) -> Result<Self, ConfigError> {
        Self::from_file(load_from_paths(paths)?)
    }

    /// Parse a single YAML document (after interpolation).
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Self::from_file(ConfigFile::parse_yaml(contents)?)
    }

    pub fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let raw = file.pipeline.context(MissingPipelineSnafu)?;
        let pipeline = TopologyConfig::from_map(&raw).context(TopologySnafu)?;

        let mailbox = file.mailbox.unwrap_or_default();
        mailbox.validate().context(TopologySnafu)?;

        let config = Self {
            pipeline,
            mailbox,
            stage: file.stage.unwrap_or_default(),
            tracing: file.tracing.unwrap_or_default(),
            ingress: file.ingress.unwrap_or_default(),
            metrics: file.metrics.unwrap_or_default(),
            shutdown_timeout_secs: file
                .shutdown_timeout_secs
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        };
        config.ingress_addr()?;
        config.metrics_addr()?;
        Ok(config)
    }

    pub fn ingress_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("ingress", &self.ingress.address)
    }

    pub fn metrics_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("metrics", &self.metrics.address)
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            mailbox: self.mailbox,
            report_interval: self.stage.report_interval,
            ..PipelineOptions::default()
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn parse_addr(section: &'static str, address: &str) -> Result<SocketAddr, ConfigError> {
    address.parse().context(InvalidAddressSnafu { section, address })
}

/// Read and merge every source in order, collecting all errors.
pub fn load_from_paths(paths: &[ConfigPath]) -> Result<ConfigFile, ConfigError> {
    let mut merged = ConfigFile::default();
    let mut errors = Vec::new();

    for source in paths {
        let loaded = match source {
            ConfigPath::File(path) => load_file(path),
            ConfigPath::Dir(path) => load_dir(path),
        };
        match loaded {
            Ok(file) => merged.merge(file),
            Err(ConfigError::MultipleErrors { errors: nested }) => errors.extend(nested),
            Err(e) => errors.push(format!("{}: {e}", source.path().display())),
        }
    }

    ensure!(errors.is_empty(), MultipleErrorsSnafu { errors });
    Ok(merged)
}

fn load_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    ensure!(is_yaml_file(path), UnsupportedFormatSnafu { path });

    let contents = std::fs::read_to_string(path).context(ReadFileSnafu)?;

    let result = interpolate(&contents);
    ensure!(
        result.is_ok(),
        EnvInterpolationSnafu {
            message: result.errors.join("\n"),
        }
    );

    ConfigFile::parse_yaml(&result.text)
}

fn load_dir(dir: &Path) -> Result<ConfigFile, ConfigError> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .context(ReadDirSnafu { path: dir })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_yaml_file(path))
        .collect();
    files.sort();

    let mut merged = ConfigFile::default();
    let mut errors = Vec::new();
    for path in files {
        match load_file(&path) {
            Ok(file) => merged.merge(file),
            Err(e) => errors.push(format!("{}: {e}", path.display())),
        }
    }

    ensure!(errors.is_empty(), MultipleErrorsSnafu { errors });
    Ok(merged)
}
