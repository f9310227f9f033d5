//! Per-actor outcomes and the per-invocation result trace.

use crate::{NodeId, VectorClock};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a single actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActorResult {
    /// The operation returned a value.
    Value(serde_json::Value),

    /// The operation returned nothing.
    Void,

    /// The operation raised one of the exception kinds declared as handled
    /// on its actor.
    Exception(String),

    /// The actor never ran to completion because its node crashed and was
    /// permanently retired (or crashed while the actor was in flight).
    NoResult,

    /// A blocking actor was still waiting when the network went quiescent.
    Suspended,
}

impl ActorResult {
    /// Whether the actor produced an observable outcome.
    pub fn is_completed(&self) -> bool {
        !matches!(self, ActorResult::NoResult | ActorResult::Suspended)
    }
}

impl fmt::Display for ActorResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorResult::Value(value) => write!(f, "{}", value),
            ActorResult::Void => write!(f, "void"),
            ActorResult::Exception(kind) => write!(f, "{}", kind),
            ActorResult::NoResult => write!(f, "-"),
            ActorResult::Suspended => write!(f, "SUSPENDED"),
        }
    }
}

/// An actor outcome stamped with the executing node's clock.
///
/// For completed actors the clock is the node's clock right after the
/// operation returned. For `NoResult` it is the clock at the crash that
/// retired the actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultWithClock {
    /// The outcome.
    pub result: ActorResult,
    /// Causal timestamp.
    pub clock: VectorClock,
}

impl ResultWithClock {
    /// Pair a result with its clock.
    pub fn new(result: ActorResult, clock: VectorClock) -> Self {
        Self { result, clock }
    }
}

impl fmt::Display for ResultWithClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.result, self.clock)
    }
}

/// Results of one invocation: one list per node that had actors assigned.
///
/// `parallel[i][j]` is the outcome of the `j`-th actor of node `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExecutionResult {
    /// Per-node ordered actor outcomes.
    pub parallel: Vec<Vec<ResultWithClock>>,
    /// Optional per-node state dump collected after the run.
    pub state_representation: Option<String>,
}

impl ExecutionResult {
    /// Results for a node, if it had a scenario.
    pub fn results_for(&self, node: NodeId) -> Option<&[ResultWithClock]> {
        self.parallel.get(node.index()).map(Vec::as_slice)
    }

    /// Total number of actor results.
    pub fn total_results(&self) -> usize {
        self.parallel.iter().map(Vec::len).sum()
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, results) in self.parallel.iter().enumerate() {
            write!(f, "{}:", NodeId::from_index(i))?;
            for result in results {
                write!(f, " {}", result)?;
            }
            writeln!(f)?;
        }
        if let Some(state) = &self.state_representation {
            writeln!(f, "{}", state)?;
        }
        Ok(())
    }
}
