//! Capability traits between the engine and the algorithm under test.

use crate::NodeError;
use async_trait::async_trait;
use faultline_types::NodeId;
use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

/// Bound shared by message payloads and durable log entries.
pub trait Payload: Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> Payload for T where T: Clone + fmt::Debug + Send + Sync + 'static {}

/// A simulated node: the algorithm under test.
///
/// The engine calls these hooks from several concurrent tasks of the same
/// node (the actor loop, one receive loop per peer, the crash-notification
/// loop), so implementations take `&self` and keep their state behind
/// interior mutability.
///
/// Returning [`NodeError::Crash`] from any hook crashes the node.
///
/// # Example
///
/// ```ignore
/// struct Echo {
///     env: Arc<dyn Environment<String, ()>>,
/// }
///
/// #[async_trait]
/// impl Node<String> for Echo {
///     async fn on_message(&self, message: String, sender: NodeId) -> Result<(), NodeError> {
///         self.env.send(message, sender)
///     }
/// }
/// ```
#[async_trait]
pub trait Node<M: Payload>: Send + Sync + 'static {
    /// Called once per incarnation created at invocation start, before any
    /// actor runs.
    async fn on_start(&self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Handle a message delivered from `sender`.
    async fn on_message(&self, message: M, sender: NodeId) -> Result<(), NodeError>;

    /// Called when `node` is known to have crashed.
    async fn on_node_unavailable(&self, _node: NodeId) -> Result<(), NodeError> {
        Ok(())
    }

    /// Called after the node's last actor has completed.
    async fn on_scenario_finish(&self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Called on a recovered incarnation before it resumes its actors.
    ///
    /// The only state carried over from the crashed incarnation is the
    /// environment's durable log.
    async fn recover(&self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Optional state dump used to annotate logged events.
    ///
    /// Diagnostics only; never consulted for control decisions.
    fn state_representation(&self) -> Option<String> {
        None
    }
}

/// Everything a node may do to the outside world.
pub trait Environment<M: Payload, L: Payload>: Send + Sync {
    /// This node's identity.
    fn node_id(&self) -> NodeId;

    /// Number of nodes in the network.
    fn number_of_nodes(&self) -> usize;

    /// Send `message` to `receiver` over the simulated network.
    ///
    /// Returns [`NodeError::Crash`] when fault injection decides the sending
    /// node fails at this point; callers should propagate it with `?`.
    fn send(&self, message: M, receiver: NodeId) -> Result<(), NodeError>;

    /// Send `message` to every other node.
    fn broadcast(&self, message: M) -> Result<(), NodeError> {
        let me = self.node_id();
        for node in NodeId::all(self.number_of_nodes()) {
            if node != me {
                self.send(message.clone(), node)?;
            }
        }
        Ok(())
    }

    /// Append to the durable log. The log survives crashes and is handed
    /// unchanged to the next incarnation.
    fn append_log(&self, entry: L);

    /// Snapshot of the durable log.
    fn log(&self) -> Vec<L>;

    /// Whether this node's environment is finished (crashed or the
    /// invocation ended). Long-running senders use it to stop early.
    fn is_finished(&self) -> bool;
}

/// A live node object, addressable both through the [`Node`] hooks and as
/// its concrete type.
pub struct NodeInstance<M: Payload> {
    node: Arc<dyn Node<M>>,
    handle: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl<M: Payload> NodeInstance<M> {
    /// Wrap a concrete node.
    pub fn new<N: Node<M>>(node: N) -> Self {
        let node = Arc::new(node);
        Self {
            node: node.clone(),
            handle: node,
            type_name: type_name::<N>(),
        }
    }

    /// The node hooks.
    pub fn node(&self) -> &Arc<dyn Node<M>> {
        &self.node
    }

    /// Type-erased handle used by operations to recover the concrete type.
    pub fn handle(&self) -> Arc<dyn Any + Send + Sync> {
        self.handle.clone()
    }

    /// Recover the concrete node type.
    pub fn downcast<N: Node<M>>(&self) -> Option<Arc<N>> {
        self.handle.clone().downcast::<N>().ok()
    }

    /// Concrete type name of the node.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl<M: Payload> Clone for NodeInstance<M> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            handle: self.handle.clone(),
            type_name: self.type_name,
        }
    }
}

impl<M: Payload> fmt::Debug for NodeInstance<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeInstance")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    #[async_trait]
    impl Node<u32> for Silent {
        async fn on_message(&self, _message: u32, _sender: NodeId) -> Result<(), NodeError> {
            Ok(())
        }
    }

    struct Other;

    #[async_trait]
    impl Node<u32> for Other {
        async fn on_message(&self, _message: u32, _sender: NodeId) -> Result<(), NodeError> {
            Err(NodeError::Crash)
        }
    }

    #[test]
    fn test_downcast_to_concrete_type() {
        let instance = NodeInstance::new(Silent);
        assert!(instance.downcast::<Silent>().is_some());
        assert!(instance.downcast::<Other>().is_none());
        assert!(instance.type_name().ends_with("Silent"));
    }

    #[tokio::test]
    async fn test_default_hooks_succeed() {
        let instance = NodeInstance::new(Other);
        let node = instance.node();
        assert_eq!(node.on_start().await, Ok(()));
        assert_eq!(node.recover().await, Ok(()));
        assert_eq!(node.on_message(1, NodeId(0)).await, Err(NodeError::Crash));
        assert!(node.state_representation().is_none());
    }
}
