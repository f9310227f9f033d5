//! Error types shared by node implementations and the engine.

use thiserror::Error;

/// Errors a node hook or operation can return.
///
/// `Crash` is not a failure of the run: it moves the node into the crashed
/// state and drives recovery. `Exception` is converted into an
/// [`ActorResult::Exception`](faultline_types::ActorResult::Exception) when
/// the running actor declares its kind as handled, and otherwise aborts the
/// invocation. `Panic` is produced by the engine when a node task panics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// The node crashed.
    #[error("node crashed")]
    Crash,

    /// An application-level exception.
    #[error("{kind}: {message}")]
    Exception {
        /// Exception kind, matched against an actor's handled set.
        kind: String,
        /// Human-readable detail.
        message: String,
    },

    /// A node task panicked.
    #[error("panic: {0}")]
    Panic(String),
}

impl NodeError {
    /// Create an exception of the given kind.
    pub fn exception(kind: impl Into<String>, message: impl Into<String>) -> Self {
        NodeError::Exception {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Whether this is the crash signal.
    pub fn is_crash(&self) -> bool {
        matches!(self, NodeError::Crash)
    }

    /// The exception kind, if this is an exception.
    pub fn kind(&self) -> Option<&str> {
        match self {
            NodeError::Exception { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

/// Errors detected while validating a configuration, before any invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No node types were registered.
    #[error("No node types registered")]
    NoNodeTypes,

    /// A node type declares an empty or inverted instance range.
    #[error("Node type {name} declares an invalid instance range {min}..={max}")]
    InvalidInstanceRange {
        /// Node type name.
        name: String,
        /// Declared minimum.
        min: usize,
        /// Declared maximum.
        max: usize,
    },

    /// The scenario has no threads.
    #[error("Scenario has no threads")]
    EmptyScenario,

    /// The scenario needs more nodes than are declared.
    #[error("Scenario has {threads} threads but only {nodes} nodes are declared")]
    TooManyThreads {
        /// Threads in the scenario.
        threads: usize,
        /// Total declared instances.
        nodes: usize,
    },

    /// An actor references an operation missing from its registry.
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
}
