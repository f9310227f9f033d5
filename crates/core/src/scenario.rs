//! Scenario model: actors, operation registries, execution scenarios.
//!
//! Operations are registered per node type as typed closures and resolved
//! by name when a scenario is built, so running an actor never needs
//! reflection: the actor already holds the closure and only has to recover
//! the concrete node type from the instance it runs on.

use crate::{ConfigError, NodeError};
use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::Value;
use std::any::{type_name, Any};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Future returned by an operation: `Ok(None)` for void operations.
pub type OperationFuture = BoxFuture<'static, Result<Option<Value>, NodeError>>;

/// Type-erased operation closure.
pub type OperationFn =
    Arc<dyn Fn(Arc<dyn Any + Send + Sync>, Vec<Value>) -> OperationFuture + Send + Sync>;

/// Named operations available on node type `N`.
pub struct OperationRegistry<N> {
    operations: IndexMap<String, OperationFn>,
    _node: PhantomData<fn() -> N>,
}

impl<N: Any + Send + Sync> OperationRegistry<N> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            operations: IndexMap::new(),
            _node: PhantomData,
        }
    }

    /// Register an operation under `name`.
    ///
    /// Registering the same name twice replaces the earlier closure.
    pub fn operation<F, Fut>(mut self, name: &str, operation: F) -> Self
    where
        F: Fn(Arc<N>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, NodeError>> + Send + 'static,
    {
        let op_name = name.to_string();
        let erased: OperationFn = Arc::new(move |handle, arguments| {
            match handle.downcast::<N>() {
                Ok(node) => operation(node, arguments).boxed(),
                Err(_) => {
                    let message = format!(
                        "operation {} requires a {} node",
                        op_name,
                        type_name::<N>()
                    );
                    async move { Err(NodeError::exception("WrongNodeType", message)) }.boxed()
                }
            }
        });
        self.operations.insert(name.to_string(), erased);
        self
    }

    /// Build an actor invoking `name` with `arguments`.
    pub fn actor(&self, name: &str, arguments: Vec<Value>) -> Result<Actor, ConfigError> {
        let operation = self
            .operations
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownOperation(name.to_string()))?;
        Ok(Actor {
            name: name.to_string(),
            arguments,
            handled_exceptions: Vec::new(),
            is_blocking: false,
            operation,
        })
    }

    /// Registered operation names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }
}

impl<N: Any + Send + Sync> Default for OperationRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// One operation invocation assigned to a node.
#[derive(Clone)]
pub struct Actor {
    /// Operation name.
    pub name: String,
    /// Arguments passed to the operation.
    pub arguments: Vec<Value>,
    /// Exception kinds recorded as results instead of failing the run.
    pub handled_exceptions: Vec<String>,
    /// Whether the operation may block indefinitely without that being a
    /// deadlock.
    pub is_blocking: bool,
    operation: OperationFn,
}

impl Actor {
    /// Declare an exception kind as a legitimate outcome of this actor.
    pub fn with_handled(mut self, kind: impl Into<String>) -> Self {
        self.handled_exceptions.push(kind.into());
        self
    }

    /// Mark the actor as blocking.
    pub fn blocking(mut self) -> Self {
        self.is_blocking = true;
        self
    }

    /// Whether `kind` is a declared handled exception.
    pub fn handles(&self, kind: &str) -> bool {
        self.handled_exceptions.iter().any(|k| k == kind)
    }

    /// Run the operation against a node handle.
    pub fn invoke(&self, node: Arc<dyn Any + Send + Sync>) -> OperationFuture {
        (self.operation)(node, self.arguments.clone())
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .field("handled_exceptions", &self.handled_exceptions)
            .field("is_blocking", &self.is_blocking)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, argument) in self.arguments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", argument)?;
        }
        write!(f, ")")
    }
}

/// The actors of one test, split into init, parallel and post parts.
///
/// The distributed engine executes `parallel[i]` on node `i`; the init and
/// post parts belong to the sequential runner and are carried for reporting.
#[derive(Debug, Clone, Default)]
pub struct ExecutionScenario {
    /// Actors run before the parallel part.
    pub init: Vec<Actor>,
    /// One actor sequence per node with a scenario.
    pub parallel: Vec<Vec<Actor>>,
    /// Actors run after the parallel part.
    pub post: Vec<Actor>,
}

impl ExecutionScenario {
    /// Scenario with only a parallel part.
    pub fn parallel(parallel: Vec<Vec<Actor>>) -> Self {
        Self {
            init: Vec::new(),
            parallel,
            post: Vec::new(),
        }
    }

    /// Number of parallel threads (nodes with actors).
    pub fn threads(&self) -> usize {
        self.parallel.len()
    }

    /// Total number of parallel actors.
    pub fn parallel_actors(&self) -> usize {
        self.parallel.iter().map(Vec::len).sum()
    }

    /// The same scenario without its post part.
    pub fn without_post(&self) -> Self {
        Self {
            init: self.init.clone(),
            parallel: self.parallel.clone(),
            post: Vec::new(),
        }
    }
}

impl fmt::Display for ExecutionScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.init.is_empty() {
            writeln!(f, "init: {}", join(&self.init))?;
        }
        for (i, actors) in self.parallel.iter().enumerate() {
            writeln!(f, "node {}: {}", i, join(actors))?;
        }
        if !self.post.is_empty() {
            writeln!(f, "post: {}", join(&self.post))?;
        }
        Ok(())
    }
}

fn join(actors: &[Actor]) -> String {
    actors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
