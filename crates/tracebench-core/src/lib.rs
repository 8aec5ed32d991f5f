//! tracebench-core: synthetic multi-stage pipeline for exercising distributed
//! tracing.
//!
//! A configurable chain of stages relays messages, each stage adding latency,
//! randomly dropping messages, and emitting one span per message so that every
//! message yields a connected trace:
//!
//! - `config` - Validated topology parameters parsed from a loose key/value map
//! - `topology` - Arena-backed node graph and its builder
//! - `mailbox` - Per-stage FIFO with optional capacity and admission policy
//! - `trace` - Trace context propagation between stages and over `traceparent`
//! - `stage` - Stage wiring and the worker loop
//! - `pipeline` - Orchestration, ingress, shutdown, and stats
//! - `metrics` - Internal metric events
//! - `error` - Error types

pub mod config;
pub mod envelope;
pub mod error;
pub mod mailbox;
pub mod metrics;
pub mod pipeline;
pub mod stage;
pub mod topology;
pub mod trace;

// Re-export commonly used items
pub use config::{MAX_STAGE_COUNT, RawConfig, TopologyConfig, TopologyType};
pub use envelope::Envelope;
pub use error::{ConfigError, MailboxError, PipelineError, SubmitError, WorkerFault};
pub use mailbox::{Admission, AdmissionPolicy, Mailbox, MailboxConfig};
pub use pipeline::{Pipeline, PipelineOptions, PipelineStats, StageSnapshot};
pub use stage::{Stage, StageCounters, StageState};
pub use topology::{Node, NodeId, Topology, TopologyBuilder};
pub use trace::{SpanContext, TRACEPARENT_HEADER, extract_context, inject_context};

/// Tracer type every stage opens its spans with.
pub use opentelemetry_sdk::trace::SdkTracer;
