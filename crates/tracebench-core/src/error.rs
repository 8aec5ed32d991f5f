//! Error types for the pipeline execution core.
//!
//! Startup errors (`ConfigError`, `PipelineError`) propagate synchronously to
//! whoever builds the pipeline. Per-message errors never reach the ingress
//! caller: injected failures are only counted and traced, and `WorkerFault`s
//! travel on the pipeline's fault channel.

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur while parsing and validating pipeline configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A required field is missing or holds an out-of-range value.
    #[snafu(display("Invalid pipeline config field '{field}': {reason}"))]
    Validation { field: &'static str, reason: String },

    /// A topology type other than "standard" was requested.
    #[snafu(display("Unsupported topology type '{topology}': only 'standard' is implemented"))]
    UnsupportedTopology { topology: String },
}

impl ConfigError {
    /// True for missing or out-of-range fields.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// True when a non-standard topology was requested.
    pub fn is_unsupported_topology(&self) -> bool {
        matches!(self, Self::UnsupportedTopology { .. })
    }

    /// The offending field, for validation errors.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            Self::UnsupportedTopology { .. } => None,
        }
    }
}

// ============ Pipeline Setup Errors ============

/// Errors that abort pipeline construction before any stage starts.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration was rejected.
    #[snafu(display("Invalid pipeline configuration: {source}"))]
    Config { source: ConfigError },

    /// `Pipeline::start` was called outside a tokio runtime.
    #[snafu(display("Pipeline must be started from within a tokio runtime: {source}"))]
    NoRuntime {
        source: tokio::runtime::TryCurrentError,
    },
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

// ============ Mailbox Errors ============

/// Errors returned when a mailbox refuses an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum MailboxError {
    /// The mailbox is at capacity and its admission policy does not wait.
    #[snafu(display("Mailbox '{mailbox}' is full (capacity {capacity})"))]
    Full { mailbox: String, capacity: usize },

    /// The mailbox was closed; its consumer is gone or draining.
    #[snafu(display("Mailbox '{mailbox}' is closed"))]
    Closed { mailbox: String },
}

impl MailboxError {
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

// ============ Submit Errors ============

/// Errors returned by `Pipeline::submit`.
///
/// With the default unbounded mailbox this only happens after shutdown.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SubmitError {
    /// The root mailbox refused the message.
    #[snafu(display("Message not admitted to the pipeline: {source}"))]
    NotAdmitted { source: MailboxError },
}

impl SubmitError {
    /// True when the pipeline has been shut down.
    pub fn is_closed(&self) -> bool {
        match self {
            Self::NotAdmitted { source } => source.is_closed(),
        }
    }

    /// True when a bounded root mailbox rejected the message.
    pub fn is_full(&self) -> bool {
        match self {
            Self::NotAdmitted { source } => source.is_full(),
        }
    }
}

// ============ Worker Faults ============

/// An unexpected fault inside a stage's processing step.
///
/// The offending message is lost; the stage resumes consuming.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WorkerFault {
    /// The processing step panicked.
    #[snafu(display("Stage {stage} panicked while processing message {sequence}: {message}"))]
    Panicked {
        stage: usize,
        sequence: u64,
        message: String,
    },

    /// The downstream mailbox refused the envelope.
    #[snafu(display("Stage {stage} could not forward message {sequence}: {source}"))]
    Forward {
        stage: usize,
        sequence: u64,
        source: MailboxError,
    },
}

impl WorkerFault {
    /// Index of the stage that faulted.
    pub fn stage(&self) -> usize {
        match self {
            Self::Panicked { stage, .. } | Self::Forward { stage, .. } => *stage,
        }
    }

    /// Sequence number of the lost message.
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Panicked { sequence, .. } | Self::Forward { sequence, .. } => *sequence,
        }
    }
}
