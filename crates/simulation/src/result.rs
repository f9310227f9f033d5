//! Outcome of one invocation.

use crate::context::NodeState;
use crate::task_registry::TaskInfo;
use faultline_core::{ExecutionScenario, NodeError};
use faultline_types::{ExecutionResult, NodeId};
use std::fmt;

/// How an invocation ended.
#[derive(Debug, Clone)]
pub enum InvocationResult {
    /// Every node reached quiescence; the results go to the verifier.
    Completed(ExecutionResult),

    /// The network did not reach quiescence before the timeout.
    Deadlock {
        /// Tasks still live at the timeout.
        tasks: Vec<TaskInfo>,
        /// State of every node at the timeout.
        nodes: Vec<NodeState>,
        /// Node state dumps, if the nodes provide them.
        state: Option<String>,
    },

    /// A node raised an error that is neither a crash nor handled by its
    /// actor.
    UnexpectedException {
        /// Node that raised it.
        node: NodeId,
        /// The error.
        error: NodeError,
    },

    /// A post-run validation hook rejected a node's state.
    ValidationFailure {
        /// The scenario without its post part.
        scenario: ExecutionScenario,
        /// Name of the failing hook.
        hook: String,
        /// Node that failed the check.
        node: NodeId,
        /// The hook's message.
        message: String,
    },
}

impl InvocationResult {
    /// Whether the invocation completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, InvocationResult::Completed(_))
    }

    /// The execution result of a completed invocation.
    pub fn execution(&self) -> Option<&ExecutionResult> {
        match self {
            InvocationResult::Completed(result) => Some(result),
            _ => None,
        }
    }
}

impl fmt::Display for InvocationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationResult::Completed(result) => {
                writeln!(f, "Completed")?;
                write!(f, "{}", result)
            }
            InvocationResult::Deadlock {
                tasks,
                nodes,
                state,
            } => {
                writeln!(f, "Deadlock: no quiescence before the timeout")?;
                writeln!(f, "Live tasks:")?;
                for task in tasks {
                    writeln!(f, "  {}", task)?;
                }
                writeln!(f, "Nodes:")?;
                for (index, node_state) in nodes.iter().enumerate() {
                    writeln!(f, "  {}: {}", NodeId::from_index(index), node_state)?;
                }
                if let Some(state) = state {
                    writeln!(f, "{}", state)?;
                }
                Ok(())
            }
            InvocationResult::UnexpectedException { node, error } => {
                writeln!(f, "Unexpected exception on {}: {}", node, error)
            }
            InvocationResult::ValidationFailure {
                scenario,
                hook,
                node,
                message,
            } => {
                writeln!(f, "Validation hook {} failed on {}: {}", hook, node, message)?;
                write!(f, "{}", scenario)
            }
        }
    }
}
