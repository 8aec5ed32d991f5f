//! Static pipeline topology.
//!
//! A [`Topology`] is a flat arena of [`Node`] records addressed by [`NodeId`].
//! Nodes refer to their children by index rather than by pointer, so the whole
//! graph is a plain `Vec` that can be shared read-only behind an `Arc`.
//!
//! The standard builder only produces single chains, but `children` is a list
//! so branching shapes remain representable.

mod builder;

use std::fmt;
use std::time::Duration;

use crate::config::TopologyType;

pub use builder::TopologyBuilder;

/// Index of a node within its topology's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Latency and failure characteristics of one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    id: NodeId,
    latency_ms: u64,
    fail_rate: f64,
    children: Vec<NodeId>,
}

impl Node {
    pub(crate) fn new(id: NodeId, latency_ms: u64, fail_rate: f64) -> Self {
        Self {
            id,
            latency_ms,
            fail_rate,
            children: Vec::new(),
        }
    }

    pub(crate) fn add_child(&mut self, child: NodeId) {
        self.children.push(child);
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }

    /// Simulated service time.
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    /// Failure rate in percent.
    pub fn fail_rate(&self) -> f64 {
        self.fail_rate
    }

    /// Failure rate as a probability in `[0, 1]`.
    pub fn failure_probability(&self) -> f64 {
        (self.fail_rate / 100.0).clamp(0.0, 1.0)
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Immutable stage graph, built once per pipeline.
///
/// Always holds at least one node; node 0 is the root.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    topology_type: TopologyType,
    nodes: Vec<Node>,
}

impl Topology {
    pub(crate) fn from_nodes(topology_type: TopologyType, nodes: Vec<Node>) -> Self {
        debug_assert!(!nodes.is_empty(), "topology must contain a root node");
        Self {
            topology_type,
            nodes,
        }
    }

    pub fn topology_type(&self) -> TopologyType {
        self.topology_type
    }

    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True when every node has at most one child.
    pub fn is_linear(&self) -> bool {
        self.nodes.iter().all(|n| n.children.len() <= 1)
    }

    /// Walk from the root along each node's first child.
    ///
    /// For a linear topology this visits every node in stage order.
    pub fn chain(&self) -> Chain<'_> {
        Chain {
            topology: self,
            next: Some(self.root().id),
        }
    }
}

/// Iterator over a topology's first-child chain. See [`Topology::chain`].
pub struct Chain<'a> {
    topology: &'a Topology,
    next: Option<NodeId>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.topology.node(self.next?)?;
        self.next = node.children.first().copied();
        Some(node)
    }
}
