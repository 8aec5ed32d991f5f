//! Topology construction from configuration.

use crate::config::{TopologyConfig, TopologyType};
use crate::error::{ConfigError, UnsupportedTopologySnafu};

use super::{Node, NodeId, Topology};

/// Builds a [`Topology`] from a validated [`TopologyConfig`].
///
/// Construction is pure: no I/O, no randomness, and the same config always
/// yields the same topology.
#[derive(Debug, Clone, Copy)]
pub struct TopologyBuilder<'a> {
    config: &'a TopologyConfig,
}

impl<'a> TopologyBuilder<'a> {
    pub fn new(config: &'a TopologyConfig) -> Self {
        Self { config }
    }

    /// Build the node graph.
    ///
    /// Fails with `UnsupportedTopology` for anything but the standard chain.
    pub fn build(self) -> Result<Topology, ConfigError> {
        match self.config.topology_type() {
            TopologyType::Standard => Ok(self.build_standard()),
            other => UnsupportedTopologySnafu {
                topology: other.as_str(),
            }
            .fail(),
        }
    }

    /// Exactly `stage_count` nodes, each linked to the next.
    fn build_standard(self) -> Topology {
        let count = self.config.stage_count();
        let mut nodes = Vec::with_capacity(count);

        for position in 0..count {
            let mut node = Node::new(
                NodeId::new(position),
                self.config.latency_ms(),
                self.config.fail_rate(),
            );
            if position + 1 < count {
                node.add_child(NodeId::new(position + 1));
            }
            nodes.push(node);
        }

        Topology::from_nodes(TopologyType::Standard, nodes)
    }
}
