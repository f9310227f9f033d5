//! Domain-specific identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulated node identifier.
///
/// Nodes are numbered densely from zero in registration order: all instances
/// of the first registered node type come first, then the second type, and
/// so on. The index doubles as the node's slot in every per-node table and
/// as its component in a [`VectorClock`](crate::VectorClock).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Create a node id from a table index.
    ///
    /// # Panics
    ///
    /// Panics if the index does not fit in a `u32`.
    pub fn from_index(index: usize) -> Self {
        NodeId(u32::try_from(index).expect("node index exceeds u32::MAX"))
    }

    /// Index of this node in per-node tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Iterate over the ids of a network of `count` nodes.
    pub fn all(count: usize) -> impl Iterator<Item = NodeId> {
        (0..count).map(NodeId::from_index)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

/// Monotonic identifier assigned to every message at send time.
///
/// Duplicated deliveries of one send share the same id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Msg({})", self.0)
    }
}
