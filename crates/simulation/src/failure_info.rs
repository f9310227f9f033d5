//! Crash and recovery bookkeeping for one invocation.

use faultline_types::NodeId;
use parking_lot::Mutex;

#[derive(Debug)]
struct FailureState {
    failed: Vec<bool>,
    crashes: Vec<u32>,
    recoveries: Vec<u32>,
    currently_failed: usize,
}

/// Which nodes are down, and how many more may fail.
///
/// The budget bounds the number of nodes that are down at the same time.
/// A recovered node frees its slot.
#[derive(Debug)]
pub struct FailureInfo {
    max_failed: usize,
    state: Mutex<FailureState>,
}

impl FailureInfo {
    /// Track `nodes` nodes, at most `max_failed` of them down at once.
    pub fn new(nodes: usize, max_failed: usize) -> Self {
        Self {
            max_failed,
            state: Mutex::new(FailureState {
                failed: vec![false; nodes],
                crashes: vec![0; nodes],
                recoveries: vec![0; nodes],
                currently_failed: 0,
            }),
        }
    }

    /// Whether another node may still be failed by fault injection.
    pub fn has_budget(&self) -> bool {
        self.state.lock().currently_failed < self.max_failed
    }

    /// Reserve a failure slot for `node`. Fails when the budget is exhausted
    /// or the node is already down.
    pub fn try_reserve(&self, node: NodeId) -> bool {
        let mut state = self.state.lock();
        if state.currently_failed >= self.max_failed || state.failed[node.index()] {
            return false;
        }
        state.failed[node.index()] = true;
        state.currently_failed += 1;
        true
    }

    /// Record a crash of `node`. A crash reserved through
    /// [`FailureInfo::try_reserve`] is only counted once.
    pub fn set_crashed(&self, node: NodeId) {
        let mut state = self.state.lock();
        if !state.failed[node.index()] {
            state.failed[node.index()] = true;
            state.currently_failed += 1;
        }
        state.crashes[node.index()] += 1;
    }

    /// Record that `node` came back.
    pub fn set_recovered(&self, node: NodeId) {
        let mut state = self.state.lock();
        if state.failed[node.index()] {
            state.failed[node.index()] = false;
            state.currently_failed -= 1;
        }
        state.recoveries[node.index()] += 1;
    }

    /// Whether messages and notifications may still reach `node`.
    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.state
            .lock()
            .failed
            .get(node.index())
            .is_some_and(|failed| !failed)
    }

    /// Number of nodes currently down.
    pub fn currently_failed(&self) -> usize {
        self.state.lock().currently_failed
    }

    /// How many times `node` crashed in this invocation.
    pub fn crash_count(&self, node: NodeId) -> u32 {
        self.state.lock().crashes[node.index()]
    }

    /// How many times `node` recovered in this invocation.
    pub fn recovery_count(&self, node: NodeId) -> u32 {
        self.state.lock().recoveries[node.index()]
    }

    /// Total crashes across all nodes.
    pub fn total_crashes(&self) -> u32 {
        self.state.lock().crashes.iter().sum()
    }
}
