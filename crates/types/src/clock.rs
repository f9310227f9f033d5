//! Vector clocks for causal ordering between simulated nodes.

use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A vector clock over a fixed-size network.
///
/// Component `i` counts the local events processed by node `i` that the
/// owner of this clock knows about. Only node `i` ever increments component
/// `i`; every other node learns about it by merging clocks carried on
/// messages and crash notifications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct VectorClock(Vec<u64>);

impl VectorClock {
    /// Create an all-zero clock for a network of `nodes` nodes.
    pub fn new(nodes: usize) -> Self {
        Self(vec![0; nodes])
    }

    /// Build a clock from raw components.
    pub fn from_components(components: Vec<u64>) -> Self {
        Self(components)
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the clock has no components.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the component for a node (0 if out of range).
    pub fn get(&self, node: NodeId) -> u64 {
        self.0.get(node.index()).copied().unwrap_or(0)
    }

    /// Raw components.
    pub fn components(&self) -> &[u64] {
        &self.0
    }

    /// Record one local event on `node`.
    pub fn increment(&mut self, node: NodeId) {
        let index = node.index();
        if index >= self.0.len() {
            self.0.resize(index + 1, 0);
        }
        self.0[index] += 1;
    }

    /// Component-wise maximum with `other`.
    pub fn merge(&mut self, other: &VectorClock) {
        if other.0.len() > self.0.len() {
            self.0.resize(other.0.len(), 0);
        }
        for (mine, theirs) in self.0.iter_mut().zip(other.0.iter()) {
            *mine = (*mine).max(*theirs);
        }
    }

    /// Whether every component of `self` is `<=` the matching one in `other`.
    pub fn dominated_by(&self, other: &VectorClock) -> bool {
        let len = self.0.len().max(other.0.len());
        (0..len).all(|i| {
            let node = NodeId::from_index(i);
            self.get(node) <= other.get(node)
        })
    }

    /// Whether `self` happened strictly before `other`.
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        self.dominated_by(other) && self != other
    }

    /// Whether neither clock happened before the other.
    pub fn is_concurrent_with(&self, other: &VectorClock) -> bool {
        self.partial_cmp(other).is_none()
    }
}

impl PartialOrd for VectorClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.dominated_by(other), other.dominated_by(self)) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => None,
        }
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, component) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", component)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_only_touches_own_component() {
        let mut clock = VectorClock::new(3);
        clock.increment(NodeId(1));
        clock.increment(NodeId(1));
        assert_eq!(clock.components(), &[0, 2, 0]);
    }

    #[test]
    fn test_merge_takes_component_wise_max() {
        let mut a = VectorClock::from_components(vec![3, 0, 1]);
        let b = VectorClock::from_components(vec![1, 4, 1]);
        a.merge(&b);
        assert_eq!(a.components(), &[3, 4, 1]);
        assert!(b.dominated_by(&a));
    }

    #[test]
    fn test_causal_comparison() {
        let a = VectorClock::from_components(vec![1, 0]);
        let b = VectorClock::from_components(vec![1, 1]);
        let c = VectorClock::from_components(vec![0, 2]);

        assert!(a.happens_before(&b));
        assert!(!b.happens_before(&a));
        assert!(!a.happens_before(&a));
        assert!(a.is_concurrent_with(&c));
        assert_eq!(a.partial_cmp(&a.clone()), Some(Ordering::Equal));
    }

    #[test]
    fn test_display() {
        let clock = VectorClock::from_components(vec![2, 0, 5]);
        assert_eq!(clock.to_string(), "[2, 0, 5]");
        assert_eq!(VectorClock::new(0).to_string(), "[]");
    }
}
