//! Pipeline orchestration.
//!
//! [`Pipeline::start`] builds the topology, creates one mailbox and one
//! [`Stage`] per node, wires each stage's outbound mailbox to the next
//! stage's inbound one, and spawns every worker before returning. Messages
//! enter through [`Pipeline::submit`] at the root stage; nothing about their
//! fate is reported back to the submitter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use snafu::prelude::*;
use opentelemetry_sdk::trace::SdkTracer;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TopologyConfig;
use crate::emit;
use crate::envelope::Envelope;
use crate::error::{NoRuntimeSnafu, NotAdmittedSnafu, PipelineError, SubmitError, WorkerFault};
use crate::mailbox::{Admission, Mailbox, MailboxConfig};
use crate::metrics::events::MessagesSubmitted;
use crate::stage::{Stage, StageCounters, StageMailbox, StageState, StageWorker};
use crate::topology::{Topology, TopologyBuilder};
use crate::trace::SpanContext;

pub const DEFAULT_REPORT_INTERVAL: u64 = 1000;
pub const DEFAULT_FAULT_CHANNEL_CAPACITY: usize = 1024;

/// Runtime knobs that are not part of the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Applied to every stage mailbox.
    pub mailbox: MailboxConfig,
    /// Messages between throughput reports; 0 disables them.
    pub report_interval: u64,
    /// Faults beyond this many unread are logged and dropped.
    pub fault_channel_capacity: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            mailbox: MailboxConfig::default(),
            report_interval: DEFAULT_REPORT_INTERVAL,
            fault_channel_capacity: DEFAULT_FAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Snapshot of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSnapshot {
    pub index: usize,
    pub state: StageState,
    /// The worker has exited.
    pub stopped: bool,
    pub counters: StageCounters,
    pub mailbox_depth: usize,
}

/// Snapshot of the whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    /// Messages accepted by `submit`.
    pub submitted: u64,
    pub stages: Vec<StageSnapshot>,
}

impl PipelineStats {
    /// Messages that reached the end of the chain.
    pub fn completed(&self) -> u64 {
        self.stages.iter().map(|s| s.counters.completed).sum()
    }

    /// Messages dropped by failure injection, across all stages.
    pub fn failed(&self) -> u64 {
        self.stages.iter().map(|s| s.counters.failed).sum()
    }

    pub fn faults(&self) -> u64 {
        self.stages.iter().map(|s| s.counters.faults).sum()
    }

    /// Messages still queued in some mailbox.
    pub fn queued(&self) -> usize {
        self.stages.iter().map(|s| s.mailbox_depth).sum()
    }
}

/// A running chain of stages.
pub struct Pipeline<P> {
    topology: Arc<Topology>,
    stages: Vec<Stage<P>>,
    tracer: SdkTracer,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    faults: Mutex<Option<mpsc::Receiver<WorkerFault>>>,
    next_sequence: AtomicU64,
    submitted: AtomicU64,
}

impl<P: Send + 'static> Pipeline<P> {
    /// Build and start every stage.
    ///
    /// Must be called from within a tokio runtime. Fails before spawning
    /// anything if the config or options are invalid.
    pub fn start(
        config: &TopologyConfig,
        options: PipelineOptions,
        tracer: SdkTracer,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        options.mailbox.validate()?;
        let runtime = Handle::try_current().context(NoRuntimeSnafu)?;

        let topology = Arc::new(TopologyBuilder::new(config).build()?);

        let mailboxes: Vec<Arc<StageMailbox<P>>> = (1..=topology.len())
            .map(|index| Arc::new(Mailbox::new(format!("stage{index}"), options.mailbox)))
            .collect();

        let stages: Vec<Stage<P>> = topology
            .nodes()
            .iter()
            .map(|node| {
                let inbound = Arc::clone(&mailboxes[node.id().index()]);
                let outbound = node
                    .children()
                    .first()
                    .map(|child| Arc::clone(&mailboxes[child.index()]));
                Stage::new(node.id(), Arc::clone(&topology), inbound, outbound)
            })
            .collect();

        let shutdown = CancellationToken::new();
        let (fault_tx, fault_rx) = mpsc::channel(options.fault_channel_capacity.max(1));

        let workers: Vec<JoinHandle<()>> = stages
            .iter()
            .map(|stage| {
                let worker = StageWorker::new(
                    stage.clone(),
                    tracer.clone(),
                    config.seed(),
                    options.report_interval,
                    fault_tx.clone(),
                    shutdown.clone(),
                );
                runtime.spawn(worker.run())
            })
            .collect();

        info!(
            stages = stages.len(),
            latency_ms = config.latency_ms(),
            fail_rate = config.fail_rate(),
            seeded = config.seed().is_some(),
            "Pipeline started"
        );

        Ok(Self {
            topology,
            stages,
            tracer,
            shutdown,
            workers: Mutex::new(workers),
            faults: Mutex::new(Some(fault_rx)),
            next_sequence: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn stages(&self) -> &[Stage<P>] {
        &self.stages
    }

    /// Stage 1, where every message enters.
    pub fn root(&self) -> &Stage<P> {
        // a validated topology always has a root
        &self.stages[0]
    }

    pub fn tracer(&self) -> &SdkTracer {
        &self.tracer
    }

    /// Take the receiving end of the fault channel. Returns `None` after the
    /// first call.
    pub fn take_faults(&self) -> Option<mpsc::Receiver<WorkerFault>> {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Enqueue a message under a fresh trace.
    pub async fn submit(&self, payload: P) -> Result<(), SubmitError> {
        self.submit_with_context(payload, SpanContext::empty_context())
            .await
    }

    /// Enqueue a message continuing the caller's trace. An invalid `parent`
    /// starts a new trace instead.
    ///
    /// With the default unbounded mailbox this never waits and only fails
    /// after shutdown.
    pub async fn submit_with_context(
        &self,
        payload: P,
        parent: SpanContext,
    ) -> Result<(), SubmitError> {
        let envelope = self.envelope(payload, parent);
        let admission = self
            .root()
            .inbound()
            .push(envelope)
            .await
            .context(NotAdmittedSnafu)?;
        self.record_submitted(admission);
        Ok(())
    }

    /// Enqueue without waiting, even under the `block` policy.
    pub fn try_submit(&self, payload: P, parent: SpanContext) -> Result<(), SubmitError> {
        let envelope = self.envelope(payload, parent);
        let admission = self
            .root()
            .inbound()
            .try_push(envelope)
            .context(NotAdmittedSnafu)?;
        self.record_submitted(admission);
        Ok(())
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            stages: self
                .stages
                .iter()
                .map(|stage| StageSnapshot {
                    index: stage.index(),
                    state: stage.state(),
                    stopped: stage.is_stopped(),
                    counters: stage.counters(),
                    mailbox_depth: stage.inbound().len(),
                })
                .collect(),
        }
    }

    /// Stop every worker now. Queued messages are abandoned.
    pub fn abort(&self) {
        warn!("Aborting pipeline");
        self.root().inbound().close();
        self.shutdown.cancel();
    }

    /// Stop accepting messages, let every stage drain, and wait for them.
    ///
    /// Workers are awaited in stage order; each one closes the next stage's
    /// mailbox once its own has drained. Calling this again returns the
    /// final stats immediately. Finished spans stay with the tracer provider;
    /// flushing them is the caller's job.
    pub async fn shutdown(&self) -> PipelineStats {
        self.root().inbound().close();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        if !workers.is_empty() {
            debug!(workers = workers.len(), "Waiting for stage workers to drain");
        }
        for (position, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                warn!(stage = position + 1, error = %e, "Stage worker task failed");
            }
        }

        let stats = self.stats();
        info!(
            submitted = stats.submitted,
            completed = stats.completed(),
            failed = stats.failed(),
            faults = stats.faults(),
            "Pipeline shut down"
        );
        stats
    }

    fn envelope(&self, payload: P, parent: SpanContext) -> Envelope<P> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        Envelope::new(payload, parent, sequence)
    }

    fn record_submitted(&self, admission: Admission) {
        if admission != Admission::DiscardedNewest {
            self.submitted.fetch_add(1, Ordering::Relaxed);
            emit!(MessagesSubmitted { count: 1 });
        }
    }
}

impl<P> Drop for Pipeline<P> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<P> std::fmt::Debug for Pipeline<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages)
            .field("cancelled", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use opentelemetry::trace::TracerProvider;
    use opentelemetry_sdk::trace::SdkTracerProvider;

    fn tracer() -> SdkTracer {
        SdkTracerProvider::builder().build().tracer("pipeline-test")
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let config = TopologyConfig::standard(0, 0.0, 2).unwrap();
        let err = Pipeline::<()>::start(&config, PipelineOptions::default(), tracer())
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoRuntime { .. }));
    }

    #[tokio::test]
    async fn test_invalid_mailbox_rejected_before_spawn() {
        let config = TopologyConfig::standard(0, 0.0, 2).unwrap();
        let options = PipelineOptions {
            mailbox: MailboxConfig {
                capacity: Some(0),
                ..MailboxConfig::default()
            },
            ..PipelineOptions::default()
        };
        let err = Pipeline::<()>::start(&config, options, tracer()).unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_closed() {
        let config = TopologyConfig::standard(0, 0.0, 2).unwrap();
        let pipeline = Pipeline::start(&config, PipelineOptions::default(), tracer()).unwrap();

        pipeline.submit(1u32).await.unwrap();
        let stats = pipeline.shutdown().await;
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.completed(), 1);

        let err = pipeline.submit(2).await.unwrap_err();
        assert!(err.is_closed());
        assert!(stats.stages.iter().all(|s| s.stopped && s.state == StageState::Idle));
        // second shutdown returns immediately with the same totals
        assert_eq!(pipeline.shutdown().await.completed(), 1);
    }

    #[tokio::test]
    async fn test_take_faults_once() {
        let config = TopologyConfig::standard(0, 0.0, 1).unwrap();
        let pipeline = Pipeline::<()>::start(&config, PipelineOptions::default(), tracer()).unwrap();
        assert!(pipeline.take_faults().is_some());
        assert!(pipeline.take_faults().is_none());
    }

    #[test]
    fn test_stats_aggregates() {
        let snapshot = |index, completed, failed| StageSnapshot {
            index,
            state: StageState::Idle,
            stopped: false,
            counters: StageCounters {
                completed,
                failed,
                ..StageCounters::default()
            },
            mailbox_depth: 1,
        };
        let stats = PipelineStats {
            submitted: 10,
            stages: vec![snapshot(1, 0, 2), snapshot(2, 7, 1)],
        };
        assert_eq!(stats.completed(), 7);
        assert_eq!(stats.failed(), 3);
        assert_eq!(stats.queued(), 2);
    }
}
