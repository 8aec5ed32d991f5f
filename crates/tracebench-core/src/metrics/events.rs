//! Internal events for pipeline metrics.
//!
//! Each struct is one measurable occurrence in the pipeline. Stage-scoped
//! events carry a `stage` label (the 1-based stage index as a string) and
//! mailbox-scoped events a `mailbox` label.

use std::time::Duration;

use metrics::{counter, gauge, histogram};
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    fn emit(self);
}

/// Messages accepted at the pipeline root.
pub struct MessagesSubmitted {
    pub count: u64,
}

impl InternalEvent for MessagesSubmitted {
    fn emit(self) {
        trace!(count = self.count, "Messages submitted");
        counter!("tracebench_messages_submitted_total").increment(self.count);
    }
}

/// What a stage did with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Handed to the next stage.
    Forwarded,
    /// Dropped by failure injection.
    Failed,
    /// Reached the end of the chain.
    Completed,
    /// Lost to a worker fault.
    Faulted,
}

impl MessageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOutcome::Forwarded => "forwarded",
            MessageOutcome::Failed => "failed",
            MessageOutcome::Completed => "completed",
            MessageOutcome::Faulted => "faulted",
        }
    }
}

/// A stage finished handling one message.
pub struct StageMessageProcessed {
    pub stage: String,
    pub outcome: MessageOutcome,
}

impl InternalEvent for StageMessageProcessed {
    fn emit(self) {
        trace!(stage = %self.stage, outcome = self.outcome.as_str(), "Stage message processed");
        counter!(
            "tracebench_stage_messages_total",
            "stage" => self.stage,
            "outcome" => self.outcome.as_str()
        )
        .increment(1);
    }
}

/// Time a stage spent on one message, including forwarding.
pub struct StageProcessingCompleted {
    pub stage: String,
    pub duration: Duration,
}

impl InternalEvent for StageProcessingCompleted {
    fn emit(self) {
        trace!(
            stage = %self.stage,
            duration_ms = self.duration.as_millis(),
            "Stage processing completed"
        );
        histogram!("tracebench_stage_processing_duration_seconds", "stage" => self.stage)
            .record(self.duration.as_secs_f64());
    }
}

/// Time from submission to discard at the terminal stage.
pub struct EndToEndLatency {
    pub duration: Duration,
}

impl InternalEvent for EndToEndLatency {
    fn emit(self) {
        trace!(duration_ms = self.duration.as_millis(), "Message completed");
        histogram!("tracebench_end_to_end_latency_seconds").record(self.duration.as_secs_f64());
    }
}

/// Why a mailbox discarded a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The oldest queued message was evicted to admit a new one.
    EvictedOldest,
    /// The incoming message was discarded because the mailbox was full.
    DiscardedNewest,
    /// The incoming message was refused under the reject policy.
    Rejected,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::EvictedOldest => "evicted_oldest",
            DropReason::DiscardedNewest => "discarded_newest",
            DropReason::Rejected => "rejected",
        }
    }
}

/// A mailbox dropped a message under its admission policy.
pub struct MessagesDropped {
    pub mailbox: String,
    pub reason: DropReason,
}

impl InternalEvent for MessagesDropped {
    fn emit(self) {
        trace!(mailbox = %self.mailbox, reason = self.reason.as_str(), "Message dropped");
        counter!(
            "tracebench_messages_dropped_total",
            "mailbox" => self.mailbox,
            "reason" => self.reason.as_str()
        )
        .increment(1);
    }
}

/// A stage caught a worker fault.
pub struct WorkerFaulted {
    pub stage: String,
}

impl InternalEvent for WorkerFaulted {
    fn emit(self) {
        trace!(stage = %self.stage, "Worker fault");
        counter!("tracebench_worker_faults_total", "stage" => self.stage).increment(1);
    }
}

/// Rolling throughput of one stage, in messages per second.
pub struct StageThroughput {
    pub stage: String,
    pub per_second: f64,
}

impl InternalEvent for StageThroughput {
    fn emit(self) {
        trace!(stage = %self.stage, per_second = self.per_second, "Stage throughput");
        gauge!("tracebench_stage_throughput", "stage" => self.stage).set(self.per_second);
    }
}
