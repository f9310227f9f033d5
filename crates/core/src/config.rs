//! Configuration for distributed simulation runs.

use crate::{Environment, Node, NodeInstance, Payload};
use faultline_types::NodeId;
use indexmap::IndexMap;
use std::any::type_name;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on a single invocation before it is reported as a deadlock.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default number of invocations per iteration.
pub const DEFAULT_INVOCATIONS: usize = 10_000;

/// Per-pair delivery order guarantee.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MessageOrder {
    /// Messages between a pair of nodes arrive in send order.
    #[default]
    Fifo,

    /// Every delivered copy is scheduled independently and may overtake
    /// earlier sends.
    Asynchronous,
}

/// Whether and which crashed nodes come back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Crashed nodes stay down for the rest of the invocation.
    #[default]
    NoRecoveries,

    /// Every crashed node recovers.
    AllNodesRecover,

    /// Each crashed node recovers if a recovery roll succeeds.
    Mixed,
}

impl RecoveryMode {
    /// Decide whether a crashed node recovers, consulting `roll` only in
    /// mixed mode.
    pub fn should_recover(self, roll: impl FnOnce() -> bool) -> bool {
        match self {
            RecoveryMode::NoRecoveries => false,
            RecoveryMode::AllNodesRecover => true,
            RecoveryMode::Mixed => roll(),
        }
    }
}

/// Declared instance range and failure permission of one node type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeTypeInfo {
    /// Minimum number of instances.
    pub min_instances: usize,
    /// Maximum number of instances; the number actually instantiated.
    pub max_instances: usize,
    /// Whether fault injection may crash nodes of this type.
    pub can_fail: bool,
}

impl NodeTypeInfo {
    /// Declare an instance range.
    pub fn new(min_instances: usize, max_instances: usize, can_fail: bool) -> Self {
        Self {
            min_instances,
            max_instances,
            can_fail,
        }
    }

    /// Declare an exact instance count.
    pub fn fixed(instances: usize, can_fail: bool) -> Self {
        Self::new(instances, instances, can_fail)
    }

    /// The same declaration with one instance fewer, used when shrinking a
    /// failing scenario.
    pub fn minimize(self) -> Self {
        Self {
            max_instances: self.max_instances.saturating_sub(1),
            ..self
        }
    }
}

/// Builds a fresh incarnation of a node from its environment.
pub type NodeFactory<M, L> =
    Arc<dyn Fn(Arc<dyn Environment<M, L>>) -> NodeInstance<M> + Send + Sync>;

/// A registered node type.
pub struct NodeTypeRegistration<M: Payload, L: Payload> {
    /// Concrete type name.
    pub name: &'static str,
    /// Instance range and failure permission.
    pub info: NodeTypeInfo,
    /// Incarnation factory.
    pub factory: NodeFactory<M, L>,
}

impl<M: Payload, L: Payload> Clone for NodeTypeRegistration<M, L> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            info: self.info,
            factory: self.factory.clone(),
        }
    }
}

impl<M: Payload, L: Payload> fmt::Debug for NodeTypeRegistration<M, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeTypeRegistration")
            .field("name", &self.name)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// A post-run invariant check on live nodes of one type.
pub struct ValidationHook<M: Payload> {
    /// Hook name, reported on failure.
    pub name: String,
    check: Arc<dyn Fn(&NodeInstance<M>) -> Option<Result<(), String>> + Send + Sync>,
}

impl<M: Payload> ValidationHook<M> {
    /// Create a hook checking nodes of type `N`.
    pub fn new<N, F>(name: impl Into<String>, check: F) -> Self
    where
        N: Node<M>,
        F: Fn(&N) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(move |instance| instance.downcast::<N>().map(|node| check(&node))),
        }
    }

    /// Run the check. Returns `None` when the instance is not of the hook's
    /// node type.
    pub fn check(&self, instance: &NodeInstance<M>) -> Option<Result<(), String>> {
        (self.check)(instance)
    }
}

impl<M: Payload> Clone for ValidationHook<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            check: self.check.clone(),
        }
    }
}

/// Decides whether two nodes are on the same side of a network partition.
pub type PartitionPredicate = Arc<dyn Fn(NodeId, NodeId) -> bool + Send + Sync>;

/// Options for a distributed test.
pub struct DistributedOptions<M: Payload, L: Payload> {
    /// When false, each send is lost with a fixed probability.
    pub network_reliable: bool,

    /// Per-pair delivery order.
    pub message_order: MessageOrder,

    /// Expected number of failed nodes as a function of the node count.
    pub max_number_of_failed_nodes: Arc<dyn Fn(usize) -> usize + Send + Sync>,

    /// Recovery policy for crashed nodes.
    pub recovery_mode: RecoveryMode,

    /// Invocations run per iteration by the driver.
    pub invocations_per_iteration: usize,

    /// Whether delivered messages may be duplicated.
    pub message_duplication: bool,

    /// Whether the partition predicate is honored.
    pub network_partitions: bool,

    /// Pass/fail predicate for partitioned delivery. When partitions are
    /// enabled and no predicate is set, every pair may communicate.
    pub partition_predicate: Option<PartitionPredicate>,

    /// Registered node types, in registration order.
    pub node_types: IndexMap<&'static str, NodeTypeRegistration<M, L>>,

    /// Post-run invariant checks.
    pub validation_hooks: Vec<ValidationHook<M>>,

    /// Bound on a single invocation.
    pub timeout: Duration,

    /// Where to store the event log of a failed scenario.
    pub log_file: Option<PathBuf>,

    /// Base seed for fault injection; random when unset.
    pub seed: Option<u64>,
}

impl<M: Payload, L: Payload> DistributedOptions<M, L> {
    /// Create options with defaults: reliable FIFO network, no failures, no
    /// duplication, no partitions, 5s timeout.
    pub fn new() -> Self {
        Self {
            network_reliable: true,
            message_order: MessageOrder::default(),
            max_number_of_failed_nodes: Arc::new(|_| 0),
            recovery_mode: RecoveryMode::default(),
            invocations_per_iteration: DEFAULT_INVOCATIONS,
            message_duplication: false,
            network_partitions: false,
            partition_predicate: None,
            node_types: IndexMap::new(),
            validation_hooks: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            log_file: None,
            seed: None,
        }
    }

    /// Set whether the network is reliable.
    pub fn with_network_reliable(mut self, reliable: bool) -> Self {
        self.network_reliable = reliable;
        self
    }

    /// Set the message order.
    pub fn with_message_order(mut self, order: MessageOrder) -> Self {
        self.message_order = order;
        self
    }

    /// Set the expected number of failed nodes as a function of node count.
    pub fn with_max_failed_nodes(
        mut self,
        max_failed: impl Fn(usize) -> usize + Send + Sync + 'static,
    ) -> Self {
        self.max_number_of_failed_nodes = Arc::new(max_failed);
        self
    }

    /// Set the recovery mode.
    pub fn with_recovery_mode(mut self, mode: RecoveryMode) -> Self {
        self.recovery_mode = mode;
        self
    }

    /// Set the number of invocations per iteration.
    pub fn with_invocations_per_iteration(mut self, invocations: usize) -> Self {
        self.invocations_per_iteration = invocations;
        self
    }

    /// Enable or disable message duplication.
    pub fn with_message_duplication(mut self, duplication: bool) -> Self {
        self.message_duplication = duplication;
        self
    }

    /// Enable partitions with the given predicate.
    pub fn with_network_partitions(
        mut self,
        predicate: impl Fn(NodeId, NodeId) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.network_partitions = true;
        self.partition_predicate = Some(Arc::new(predicate));
        self
    }

    /// Register a node type with an exact instance count.
    pub fn node_type<N, F>(self, instances: usize, can_fail: bool, factory: F) -> Self
    where
        N: Node<M>,
        F: Fn(Arc<dyn Environment<M, L>>) -> N + Send + Sync + 'static,
    {
        self.node_type_range(instances, instances, can_fail, factory)
    }

    /// Register a node type with an instance range.
    ///
    /// Registering the same type again replaces the earlier declaration but
    /// keeps its position in the registration order.
    pub fn node_type_range<N, F>(
        mut self,
        min_instances: usize,
        max_instances: usize,
        can_fail: bool,
        factory: F,
    ) -> Self
    where
        N: Node<M>,
        F: Fn(Arc<dyn Environment<M, L>>) -> N + Send + Sync + 'static,
    {
        let name = type_name::<N>();
        self.node_types.insert(
            name,
            NodeTypeRegistration {
                name,
                info: NodeTypeInfo::new(min_instances, max_instances, can_fail),
                factory: Arc::new(move |env| NodeInstance::new(factory(env))),
            },
        );
        self
    }

    /// Add a post-run invariant check for nodes of type `N`.
    pub fn validation_hook<N, F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        N: Node<M>,
        F: Fn(&N) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validation_hooks.push(ValidationHook::new(name, check));
        self
    }

    /// Set the invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Store the event log to `path` when a scenario fails.
    pub fn store_logs_for_failed_scenario(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Set the base seed for fault injection.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Expected number of failed nodes in a network of `nodes` nodes.
    pub fn expected_failures(&self, nodes: usize) -> usize {
        (self.max_number_of_failed_nodes)(nodes)
    }

    /// Total declared instances across all node types.
    pub fn total_instances(&self) -> usize {
        self.node_types.values().map(|r| r.info.max_instances).sum()
    }

    /// Whether `from` may currently reach `to` under the partition
    /// predicate.
    pub fn can_communicate(&self, from: NodeId, to: NodeId) -> bool {
        if !self.network_partitions {
            return true;
        }
        self.partition_predicate
            .as_ref()
            .map_or(true, |predicate| predicate(from, to))
    }
}

impl<M: Payload, L: Payload> Default for DistributedOptions<M, L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Payload, L: Payload> fmt::Debug for DistributedOptions<M, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedOptions")
            .field("network_reliable", &self.network_reliable)
            .field("message_order", &self.message_order)
            .field("recovery_mode", &self.recovery_mode)
            .field("invocations_per_iteration", &self.invocations_per_iteration)
            .field("message_duplication", &self.message_duplication)
            .field("network_partitions", &self.network_partitions)
            .field("node_types", &self.node_types)
            .field("timeout", &self.timeout)
            .field("log_file", &self.log_file)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeError;
    use async_trait::async_trait;

    struct Replica;

    #[async_trait]
    impl Node<u8> for Replica {
        async fn on_message(&self, _message: u8, _sender: NodeId) -> Result<(), NodeError> {
            Ok(())
        }
    }

    struct Client;

    #[async_trait]
    impl Node<u8> for Client {
        async fn on_message(&self, _message: u8, _sender: NodeId) -> Result<(), NodeError> {
            Ok(())
        }
    }

    #[test]
    fn test_defaults() {
        let options = DistributedOptions::<u8, ()>::default();
        assert!(options.network_reliable);
        assert_eq!(options.message_order, MessageOrder::Fifo);
        assert_eq!(options.recovery_mode, RecoveryMode::NoRecoveries);
        assert_eq!(options.timeout, Duration::from_millis(5000));
        assert_eq!(options.expected_failures(10), 0);
        assert!(!options.message_duplication);
    }

    #[test]
    fn test_registration_order_and_totals() {
        let options = DistributedOptions::<u8, ()>::new()
            .node_type(3, true, |_env| Replica)
            .node_type_range(1, 2, false, |_env| Client)
            .node_type(4, true, |_env| Replica);

        let names: Vec<_> = options.node_types.keys().copied().collect();
        assert!(names[0].ends_with("Replica"));
        assert!(names[1].ends_with("Client"));
        assert_eq!(options.total_instances(), 6);
    }

    #[test]
    fn test_minimize_drops_one_instance() {
        let info = NodeTypeInfo::new(1, 3, true).minimize();
        assert_eq!(info.max_instances, 2);
        assert_eq!(info.min_instances, 1);
        assert_eq!(NodeTypeInfo::fixed(0, false).minimize().max_instances, 0);
    }

    #[test]
    fn test_recovery_decision() {
        assert!(!RecoveryMode::NoRecoveries.should_recover(|| true));
        assert!(RecoveryMode::AllNodesRecover.should_recover(|| false));
        assert!(RecoveryMode::Mixed.should_recover(|| true));
        assert!(!RecoveryMode::Mixed.should_recover(|| false));
    }

    #[test]
    fn test_partition_predicate() {
        let options = DistributedOptions::<u8, ()>::new();
        assert!(options.can_communicate(NodeId(0), NodeId(1)));

        let options = options.with_network_partitions(|a, b| (a.0 < 2) == (b.0 < 2));
        assert!(options.can_communicate(NodeId(0), NodeId(1)));
        assert!(!options.can_communicate(NodeId(1), NodeId(2)));
    }
}
