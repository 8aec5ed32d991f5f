//! Pipeline stages.
//!
//! A [`Stage`] is the static wiring of one topology node: its inbound
//! mailbox, the next stage's mailbox (if any), and shared counters. The
//! [`StageWorker`] owns the mutable side and runs the receive/process loop on
//! its own task.

mod throughput;
mod worker;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use crate::envelope::Envelope;
use crate::mailbox::Mailbox;
use crate::topology::{Node, NodeId, Topology};

pub use throughput::{ThroughputCounter, ThroughputReport};
pub use worker::{ProcessOutcome, StageWorker};

/// Inbound queue type for a stage.
pub type StageMailbox<P> = Mailbox<Envelope<P>>;

/// Per-message lifecycle of a stage worker.
///
/// Every message starts `Idle -> Processing` and ends back at `Idle` via
/// `Forwarding` (handed to the next stage), `Terminal` (last stage, message
/// done) or `Failed` (injected failure). Worker exit is tracked separately by
/// [`Stage::is_stopped`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StageState {
    Idle = 0,
    Processing = 1,
    Forwarding = 2,
    Failed = 3,
    Terminal = 4,
}

impl StageState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StageState::Idle,
            1 => StageState::Processing,
            2 => StageState::Forwarding,
            3 => StageState::Failed,
            _ => StageState::Terminal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageState::Idle => "idle",
            StageState::Processing => "processing",
            StageState::Forwarding => "forwarding",
            StageState::Failed => "failed",
            StageState::Terminal => "terminal",
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters shared between a worker and whoever observes it.
#[derive(Debug)]
pub struct StageStats {
    state: AtomicU8,
    stopped: AtomicBool,
    received: AtomicU64,
    forwarded: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    faults: AtomicU64,
}

impl Default for StageStats {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(StageState::Idle as u8),
            stopped: AtomicBool::new(false),
            received: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            faults: AtomicU64::new(0),
        }
    }
}

impl StageStats {
    pub fn state(&self) -> StageState {
        StageState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: StageState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// True once the worker loop has exited.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> StageCounters {
        StageCounters {
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a stage's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCounters {
    pub received: u64,
    pub forwarded: u64,
    /// Discarded at the end of the chain.
    pub completed: u64,
    /// Dropped by failure injection.
    pub failed: u64,
    pub faults: u64,
}

impl StageCounters {
    /// Messages that left this stage one way or another.
    pub fn handled(&self) -> u64 {
        self.forwarded + self.completed + self.failed + self.faults
    }
}

/// One node of the running pipeline.
pub struct Stage<P> {
    index: usize,
    node: NodeId,
    topology: Arc<Topology>,
    inbound: Arc<StageMailbox<P>>,
    outbound: Option<Arc<StageMailbox<P>>>,
    stats: Arc<StageStats>,
}

impl<P> Stage<P> {
    pub(crate) fn new(
        node: NodeId,
        topology: Arc<Topology>,
        inbound: Arc<StageMailbox<P>>,
        outbound: Option<Arc<StageMailbox<P>>>,
    ) -> Self {
        Self {
            index: node.index() + 1,
            node,
            topology,
            inbound,
            outbound,
            stats: Arc::new(StageStats::default()),
        }
    }

    /// 1-based position in the chain.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Span name for this stage.
    pub fn name(&self) -> String {
        format!("Stage{}", self.index)
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn node(&self) -> &Node {
        // stages are only built from nodes of this topology
        &self.topology.nodes()[self.node.index()]
    }

    pub fn is_first(&self) -> bool {
        self.index == 1
    }

    pub fn is_last(&self) -> bool {
        self.outbound.is_none()
    }

    pub fn inbound(&self) -> &Arc<StageMailbox<P>> {
        &self.inbound
    }

    pub fn outbound(&self) -> Option<&Arc<StageMailbox<P>>> {
        self.outbound.as_ref()
    }

    pub fn state(&self) -> StageState {
        self.stats.state()
    }

    pub fn counters(&self) -> StageCounters {
        self.stats.counters()
    }

    /// True once this stage's worker has exited.
    pub fn is_stopped(&self) -> bool {
        self.stats.is_stopped()
    }

    pub(crate) fn stats(&self) -> &StageStats {
        &self.stats
    }
}

impl<P> Clone for Stage<P> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            node: self.node,
            topology: Arc::clone(&self.topology),
            inbound: Arc::clone(&self.inbound),
            outbound: self.outbound.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<P> fmt::Debug for Stage<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("index", &self.index)
            .field("node", &self.node)
            .field("inbound", &self.inbound.name())
            .field("outbound", &self.outbound.as_ref().map(|m| m.name().to_owned()))
            .field("state", &self.state())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
