//! Stage worker loop.
//!
//! Each worker consumes its inbound mailbox strictly in order. Per message it
//! opens a `Stage{index}` server span parented by the envelope's context,
//! sleeps for the node latency, then either drops the message (failure
//! injection), forwards it with a context pointing at its own span, or, on
//! the last stage, discards it.
//!
//! A panic or forwarding error while handling one message becomes a
//! [`WorkerFault`]: the message is lost, the fault is logged and published,
//! and the worker moves on to the next message. Only injected failures set
//! the span's error status; a forwarding fault is recorded as a span event.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use opentelemetry::KeyValue;
use opentelemetry::trace::{Span, SpanKind, Status, Tracer};
use opentelemetry_sdk::trace::SdkTracer;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::emit;
use crate::envelope::Envelope;
use crate::error::WorkerFault;
use crate::mailbox::Admission;
use crate::metrics::UtilizationTimer;
use crate::metrics::events::{
    EndToEndLatency, MessageOutcome, StageMessageProcessed, StageProcessingCompleted,
    StageThroughput, WorkerFaulted,
};
use crate::trace;

use super::{Stage, StageState, ThroughputCounter};

/// What a stage did with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Handed to the next stage's mailbox.
    Forwarded(Admission),
    /// Last stage; the message was discarded.
    Completed,
    /// Dropped by failure injection.
    Failed,
}

impl ProcessOutcome {
    fn metric(&self) -> MessageOutcome {
        match self {
            ProcessOutcome::Forwarded(_) => MessageOutcome::Forwarded,
            ProcessOutcome::Completed => MessageOutcome::Completed,
            ProcessOutcome::Failed => MessageOutcome::Failed,
        }
    }
}

/// Runs one stage until its inbound mailbox closes and drains, or until
/// cancelled.
pub struct StageWorker<P> {
    stage: Stage<P>,
    label: String,
    tracer: SdkTracer,
    rng: ChaCha8Rng,
    faults: mpsc::Sender<WorkerFault>,
    shutdown: CancellationToken,
    throughput: ThroughputCounter,
    utilization: UtilizationTimer,
}

impl<P: Send + 'static> StageWorker<P> {
    /// With a seed, stage `i` draws from `seed + i` so every stage gets an
    /// independent but reproducible failure sequence.
    pub fn new(
        stage: Stage<P>,
        tracer: SdkTracer,
        seed: Option<u64>,
        report_interval: u64,
        faults: mpsc::Sender<WorkerFault>,
        shutdown: CancellationToken,
    ) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed.wrapping_add(stage.index() as u64)),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };
        let label = stage.index().to_string();
        let utilization = UtilizationTimer::new(&label);

        Self {
            stage,
            label,
            tracer,
            rng,
            faults,
            shutdown,
            throughput: ThroughputCounter::new(report_interval),
            utilization,
        }
    }

    pub async fn run(mut self) {
        let shutdown = self.shutdown.clone();
        let inbound = Arc::clone(self.stage.inbound());
        let index = self.stage.index();

        debug!(stage = index, "Stage worker started");

        loop {
            self.utilization.idle();
            let envelope = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!(stage = index, "Stage worker cancelled");
                    break;
                }
                envelope = inbound.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            self.utilization.busy();
            self.stage.stats().record_received();

            let sequence = envelope.sequence;
            let started = Instant::now();

            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!(stage = index, sequence, "Stage worker cancelled mid-message");
                    break;
                }
                result = AssertUnwindSafe(self.process(envelope)).catch_unwind() => result,
            };

            match result {
                Ok(Ok(outcome)) => self.record_outcome(outcome),
                Ok(Err(fault)) => self.report_fault(fault),
                Err(panic) => self.report_fault(WorkerFault::Panicked {
                    stage: index,
                    sequence,
                    message: panic_message(panic.as_ref()),
                }),
            }

            emit!(StageProcessingCompleted {
                stage: self.label.clone(),
                duration: started.elapsed(),
            });
            self.stage.stats().set_state(StageState::Idle);

            if let Some(report) = self.throughput.record() {
                let per_second = report.per_second();
                info!(
                    stage = self.stage.index(),
                    total = report.total,
                    per_second = %format!("{per_second:.1}"),
                    "Stage throughput"
                );
                emit!(StageThroughput {
                    stage: self.label.clone(),
                    per_second,
                });
            }
            self.utilization.maybe_report();
        }

        self.stage.stats().mark_stopped();
        inbound.close();
        if let Some(outbound) = self.stage.outbound() {
            outbound.close();
        }

        let counters = self.stage.counters();
        debug!(
            stage = self.stage.index(),
            received = counters.received,
            forwarded = counters.forwarded,
            completed = counters.completed,
            failed = counters.failed,
            faults = counters.faults,
            "Stage worker finished"
        );
    }

    /// Handle one message.
    ///
    /// Leaves the stage in `Failed`, `Forwarding` or `Terminal`; the run loop
    /// moves it back to `Idle`.
    pub async fn process(&mut self, mut envelope: Envelope<P>) -> Result<ProcessOutcome, WorkerFault> {
        let stats = self.stage.stats();
        stats.set_state(StageState::Processing);

        let parent = trace::parent_context(&envelope.trace);
        let mut span = self
            .tracer
            .span_builder(self.stage.name())
            .with_kind(SpanKind::Server)
            .with_attributes([
                KeyValue::new("stage.index", self.stage.index() as i64),
                KeyValue::new("message.sequence", envelope.sequence as i64),
            ])
            .start_with_context(&self.tracer, &parent);

        let node = self.stage.node();
        let latency = node.latency();
        let probability = node.failure_probability();

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.rng.random_bool(probability) {
            stats.set_state(StageState::Failed);
            span.set_status(Status::error("injected failure"));
            span.end();
            debug!(
                stage = self.stage.index(),
                sequence = envelope.sequence,
                "Injected failure; message dropped"
            );
            return Ok(ProcessOutcome::Failed);
        }

        let Some(outbound) = self.stage.outbound() else {
            stats.set_state(StageState::Terminal);
            emit!(EndToEndLatency {
                duration: envelope.enqueued_at.elapsed(),
            });
            span.end();
            drop(envelope);
            return Ok(ProcessOutcome::Completed);
        };

        stats.set_state(StageState::Forwarding);
        let sequence = envelope.sequence;
        envelope.trace = span.span_context().clone();

        match outbound.push(envelope).await {
            Ok(admission) => {
                span.end();
                Ok(ProcessOutcome::Forwarded(admission))
            }
            Err(source) => {
                span.add_event(
                    "forward failed",
                    vec![KeyValue::new("error.message", source.to_string())],
                );
                span.end();
                Err(WorkerFault::Forward {
                    stage: self.stage.index(),
                    sequence,
                    source,
                })
            }
        }
    }

    fn record_outcome(&self, outcome: ProcessOutcome) {
        let stats = self.stage.stats();
        match outcome {
            ProcessOutcome::Forwarded(_) => stats.record_forwarded(),
            ProcessOutcome::Completed => stats.record_completed(),
            ProcessOutcome::Failed => stats.record_failed(),
        }
        emit!(StageMessageProcessed {
            stage: self.label.clone(),
            outcome: outcome.metric(),
        });
    }

    fn report_fault(&self, fault: WorkerFault) {
        warn!(
            stage = fault.stage(),
            sequence = fault.sequence(),
            error = %fault,
            "Stage worker fault; message dropped"
        );
        self.stage.stats().record_fault();
        emit!(WorkerFaulted {
            stage: self.label.clone(),
        });
        emit!(StageMessageProcessed {
            stage: self.label.clone(),
            outcome: MessageOutcome::Faulted,
        });

        if let Err(e) = self.faults.try_send(fault) {
            debug!(stage = self.stage.index(), error = %e, "Fault channel unavailable");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
