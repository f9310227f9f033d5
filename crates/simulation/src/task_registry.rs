//! Table of live node tasks, dumped when an invocation deadlocks.

use faultline_types::NodeId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Role of a node task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Runs the node's start or recovery hook, then its actors.
    Main,
    /// Receives messages from one sender.
    Receive {
        /// The sender served by this loop.
        from: NodeId,
    },
    /// Receives crash notifications.
    Failures,
    /// Delivers one asynchronously scheduled message copy to the node.
    Delivery {
        /// The sender of the copy.
        from: NodeId,
    },
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Main => write!(f, "main"),
            TaskKind::Receive { from } => write!(f, "receive from {}", from),
            TaskKind::Failures => write!(f, "failure notifications"),
            TaskKind::Delivery { from } => write!(f, "delivery from {}", from),
        }
    }
}

/// A live task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    /// Owning node.
    pub node: NodeId,
    /// Role.
    pub kind: TaskKind,
    /// Incarnation of the node that spawned it.
    pub incarnation: u32,
}

impl fmt::Display for TaskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} incarnation {}: {}",
            self.node, self.incarnation, self.kind
        )
    }
}

/// Registry of live tasks.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    next_id: AtomicU64,
    tasks: Mutex<BTreeMap<u64, TaskInfo>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a task; it stays listed until the handle drops.
    pub fn register(self: &Arc<Self>, node: NodeId, kind: TaskKind, incarnation: u32) -> TaskHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tasks.lock().insert(
            id,
            TaskInfo {
                node,
                kind,
                incarnation,
            },
        );
        TaskHandle {
            id,
            registry: self.clone(),
        }
    }

    /// Live tasks ordered by node, then by spawn order.
    pub fn snapshot(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<_> = self.tasks.lock().values().cloned().collect();
        tasks.sort_by_key(|task| task.node);
        tasks
    }

    /// Number of live tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether no task is live.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// One line per live task.
    pub fn dump(&self) -> String {
        self.snapshot()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Keeps a task listed in its registry.
#[derive(Debug)]
pub struct TaskHandle {
    id: u64,
    registry: Arc<TaskRegistry>,
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.registry.tasks.lock().remove(&self.id);
    }
}
