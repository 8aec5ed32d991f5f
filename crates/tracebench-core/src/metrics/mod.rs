//! Metrics emitted by the pipeline core.
//!
//! - `events`: internal event types and the `InternalEvent` trait
//! - `utilization`: per-stage busy ratio with EWMA smoothing
//!
//! The core only talks to the `metrics` facade; installing a recorder and
//! serving it is the binary's job. Without a recorder every emission is a no-op.

pub mod events;
pub mod utilization;

pub use utilization::UtilizationTimer;

/// Emit an internal event as a metric.
///
/// ```ignore
/// use tracebench_core::emit;
/// use tracebench_core::metrics::events::MessagesSubmitted;
///
/// emit!(MessagesSubmitted { count: 1 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
