//! Mapping from node ids to registered node types.

use faultline_core::{ConfigError, DistributedOptions, NodeTypeInfo, NodeTypeRegistration, Payload};
use faultline_types::NodeId;

/// Resolves every node id of the network to its node type.
///
/// Node ids are assigned densely in registration order: the instances of
/// the first registered type get the lowest ids. The first
/// `nodes_with_scenario` nodes run actors; the rest only react to messages.
#[derive(Debug, Clone)]
pub struct AddressResolver {
    /// Per node: index into `types`.
    classes: Vec<usize>,
    types: Vec<(&'static str, NodeTypeInfo)>,
    nodes_with_scenario: usize,
}

impl AddressResolver {
    /// Build the resolver for `options` and a scenario with `threads`
    /// parallel threads.
    pub fn new<M: Payload, L: Payload>(
        options: &DistributedOptions<M, L>,
        threads: usize,
    ) -> Result<Self, ConfigError> {
        Self::from_types(
            options
                .node_types
                .values()
                .map(|registration: &NodeTypeRegistration<M, L>| {
                    (registration.name, registration.info)
                }),
            threads,
        )
    }

    /// Build the resolver from `(type name, info)` pairs in registration
    /// order.
    pub fn from_types(
        types: impl IntoIterator<Item = (&'static str, NodeTypeInfo)>,
        threads: usize,
    ) -> Result<Self, ConfigError> {
        let types: Vec<_> = types.into_iter().collect();
        if types.is_empty() {
            return Err(ConfigError::NoNodeTypes);
        }

        let mut classes = Vec::new();
        for (class, (name, info)) in types.iter().enumerate() {
            if info.max_instances == 0 || info.min_instances > info.max_instances {
                return Err(ConfigError::InvalidInstanceRange {
                    name: name.to_string(),
                    min: info.min_instances,
                    max: info.max_instances,
                });
            }
            classes.extend(std::iter::repeat(class).take(info.max_instances));
        }

        if threads == 0 {
            return Err(ConfigError::EmptyScenario);
        }
        if threads > classes.len() {
            return Err(ConfigError::TooManyThreads {
                threads,
                nodes: classes.len(),
            });
        }

        Ok(Self {
            classes,
            types,
            nodes_with_scenario: threads,
        })
    }

    /// Number of nodes in the network.
    pub fn total_number_of_nodes(&self) -> usize {
        self.classes.len()
    }

    /// Number of nodes that run actors.
    pub fn nodes_with_scenario(&self) -> usize {
        self.nodes_with_scenario
    }

    /// Registration index of the node's type.
    pub fn class_of(&self, node: NodeId) -> usize {
        self.classes[node.index()]
    }

    /// Type name of the node.
    pub fn type_of(&self, node: NodeId) -> &'static str {
        self.types[self.class_of(node)].0
    }

    /// Declared info of the node's type.
    pub fn info_of(&self, node: NodeId) -> NodeTypeInfo {
        self.types[self.class_of(node)].1
    }

    /// Whether fault injection may crash the node.
    pub fn can_fail(&self, node: NodeId) -> bool {
        self.info_of(node).can_fail
    }

    /// Whether the node runs actors.
    pub fn has_scenario(&self, node: NodeId) -> bool {
        node.index() < self.nodes_with_scenario
    }

    /// All node ids.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> {
        NodeId::all(self.total_number_of_nodes())
    }
}
