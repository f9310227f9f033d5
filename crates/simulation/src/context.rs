//! Per-invocation simulation state.

use crate::address_resolver::AddressResolver;
use crate::environment::EnvironmentImpl;
use crate::event_log::{Event, EventKind, EventLog};
use crate::execution::TestNodeExecution;
use crate::fault_injector::FaultInjector;
use crate::failure_info::FailureInfo;
use crate::task_counter::{TaskCounter, TaskGuard};
use crate::task_registry::TaskRegistry;
use crate::transport::MessageTransport;
use faultline_core::{DistributedOptions, ExecutionScenario, NodeError, NodeInstance, Payload};
use faultline_types::{NodeId, ResultWithClock, VectorClock};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Lifecycle state of a node within an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No incarnation yet.
    NotStarted,
    /// Running its start hook or actors.
    Running,
    /// A recovered incarnation running its recovery hook.
    Recovering,
    /// Finished its actors; still handles messages.
    Completed,
    /// Crashed; a new incarnation is being set up.
    Crashed,
    /// Crashed for good.
    Terminated,
}

impl NodeState {
    /// Whether the node has a live incarnation.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            NodeState::Running | NodeState::Recovering | NodeState::Completed
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::NotStarted => "not started",
            NodeState::Running => "running",
            NodeState::Recovering => "recovering",
            NodeState::Completed => "completed",
            NodeState::Crashed => "crashed",
            NodeState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// A crash notification on its way to a node's failure loop.
#[derive(Debug)]
pub(crate) struct CrashNotice {
    pub(crate) failed: NodeId,
    pub(crate) clock: VectorClock,
    pub(crate) _guard: TaskGuard,
}

/// The live incarnation of a node.
pub(crate) struct NodeSlot<M: Payload, L: Payload> {
    pub(crate) instance: NodeInstance<M>,
    pub(crate) env: Arc<EnvironmentImpl<M, L>>,
    pub(crate) token: CancellationToken,
    pub(crate) failures: Option<UnboundedSender<CrashNotice>>,
    pub(crate) incarnation: u32,
    pub(crate) state: NodeState,
}

/// The first fatal error of an invocation.
#[derive(Debug, Clone)]
pub(crate) struct Fatal {
    pub(crate) node: NodeId,
    pub(crate) error: NodeError,
}

/// Everything one invocation shares between its node tasks.
///
/// Static configuration (options, resolver, scenario, fault injectors) is
/// shared with the runner; everything else is fresh for each invocation.
pub struct SimulationContext<M: Payload, L: Payload> {
    pub(crate) options: Arc<DistributedOptions<M, L>>,
    pub(crate) resolver: Arc<AddressResolver>,
    pub(crate) scenario: Arc<ExecutionScenario>,
    injectors: Arc<[FaultInjector]>,
    clocks: Vec<Mutex<VectorClock>>,
    pub(crate) slots: Vec<RwLock<Option<NodeSlot<M, L>>>>,
    pub(crate) executions: Vec<Mutex<TestNodeExecution>>,
    events: EventLog<M>,
    transport: Arc<MessageTransport<M>>,
    failures: FailureInfo,
    fatal: OnceLock<Fatal>,
    pub(crate) counter: Arc<TaskCounter>,
    pub(crate) tasks: Arc<TaskRegistry>,
    pub(crate) shutdown: CancellationToken,
}

impl<M: Payload, L: Payload> SimulationContext<M, L> {
    pub(crate) fn new(
        options: Arc<DistributedOptions<M, L>>,
        resolver: Arc<AddressResolver>,
        scenario: Arc<ExecutionScenario>,
        injectors: Arc<[FaultInjector]>,
    ) -> Arc<Self> {
        let nodes = resolver.total_number_of_nodes();
        let counter = TaskCounter::new();
        let tasks = TaskRegistry::new();
        let shutdown = CancellationToken::new();
        let partition = options
            .network_partitions
            .then(|| options.partition_predicate.clone())
            .flatten();
        let transport = MessageTransport::new(
            nodes,
            options.message_order,
            partition,
            counter.clone(),
            tasks.clone(),
            shutdown.clone(),
        );
        let executions = scenario
            .parallel
            .iter()
            .map(|actors| Mutex::new(TestNodeExecution::new(actors.clone())))
            .collect();
        let failures = FailureInfo::new(nodes, options.expected_failures(nodes));

        Arc::new(Self {
            options,
            resolver,
            scenario,
            injectors,
            clocks: (0..nodes).map(|_| Mutex::new(VectorClock::new(nodes))).collect(),
            slots: (0..nodes).map(|_| RwLock::new(None)).collect(),
            executions,
            events: EventLog::new(),
            transport,
            failures,
            fatal: OnceLock::new(),
            counter,
            tasks,
            shutdown,
        })
    }

    /// Number of nodes.
    pub fn number_of_nodes(&self) -> usize {
        self.clocks.len()
    }

    /// The node's fault injector.
    pub fn injector(&self, node: NodeId) -> &FaultInjector {
        &self.injectors[node.index()]
    }

    /// Crash bookkeeping.
    pub fn failures(&self) -> &FailureInfo {
        &self.failures
    }

    /// The event log.
    pub fn events(&self) -> &EventLog<M> {
        &self.events
    }

    /// The network.
    pub fn transport(&self) -> &Arc<MessageTransport<M>> {
        &self.transport
    }

    /// Snapshot of the node's clock.
    pub fn clock(&self, node: NodeId) -> VectorClock {
        self.clocks[node.index()].lock().clone()
    }

    /// Record a local event on `node` and return the new clock.
    pub fn inc_clock(&self, node: NodeId) -> VectorClock {
        let mut clock = self.clocks[node.index()].lock();
        clock.increment(node);
        clock.clone()
    }

    /// Merge `incoming` into the node's clock, then record the receive as a
    /// local event. Returns the new clock.
    pub fn max_clock(&self, node: NodeId, incoming: &VectorClock) -> VectorClock {
        let mut clock = self.clocks[node.index()].lock();
        clock.merge(incoming);
        clock.increment(node);
        clock.clone()
    }

    /// State dump of the node's live incarnation, for diagnostics.
    pub fn state_representation(&self, node: NodeId) -> Option<String> {
        let instance = self.slots[node.index()]
            .read()
            .as_ref()
            .map(|slot| slot.instance.clone())?;
        instance.node().state_representation()
    }

    /// Log an event on `node` stamped with `clock`.
    pub(crate) fn log_event(&self, node: NodeId, clock: VectorClock, kind: EventKind<M>) {
        let state = self.state_representation(node);
        self.events.push(Event {
            node,
            clock,
            state,
            kind,
        });
    }

    /// Current lifecycle state of the node.
    pub fn node_state(&self, node: NodeId) -> NodeState {
        self.slots[node.index()]
            .read()
            .as_ref()
            .map_or(NodeState::NotStarted, |slot| slot.state)
    }

    /// The node's live incarnation, if any.
    pub fn instance(&self, node: NodeId) -> Option<NodeInstance<M>> {
        self.slots[node.index()]
            .read()
            .as_ref()
            .filter(|slot| slot.state.is_live())
            .map(|slot| slot.instance.clone())
    }

    /// The node's most recent incarnation, live or not.
    pub fn last_instance(&self, node: NodeId) -> Option<NodeInstance<M>> {
        self.slots[node.index()]
            .read()
            .as_ref()
            .map(|slot| slot.instance.clone())
    }

    /// The node's current incarnation number.
    pub fn incarnation(&self, node: NodeId) -> Option<u32> {
        self.slots[node.index()]
            .read()
            .as_ref()
            .map(|slot| slot.incarnation)
    }

    /// Record a fatal error. The first one wins and fires the completion
    /// signal.
    pub(crate) fn record_failure(&self, node: NodeId, error: NodeError) {
        if self.fatal.set(Fatal { node, error: error.clone() }).is_ok() {
            warn!(node = %node, %error, "Unexpected exception, aborting invocation");
            self.counter.fire();
        }
    }

    pub(crate) fn fatal(&self) -> Option<&Fatal> {
        self.fatal.get()
    }

    /// Cancel every task and finish every environment.
    pub(crate) fn shut_down(&self) {
        self.shutdown.cancel();
        for slot in &self.slots {
            if let Some(slot) = slot.read().as_ref() {
                slot.env.finish();
            }
        }
    }

    /// Per-node results of the parallel part, in node order.
    pub(crate) fn results(&self) -> Vec<Vec<ResultWithClock>> {
        self.executions
            .iter()
            .enumerate()
            .map(|(index, execution)| {
                let clock = self.clock(NodeId::from_index(index));
                execution.lock().results(&clock)
            })
            .collect()
    }

    /// Lines of the form `STATE [i]: <dump>` for nodes with a state dump.
    pub(crate) fn describe_states(&self) -> Option<String> {
        let lines: Vec<_> = NodeId::all(self.number_of_nodes())
            .filter_map(|node| {
                self.instance(node)
                    .and_then(|instance| instance.node().state_representation())
                    .filter(|state| !state.trim().is_empty())
                    .map(|state| format!("STATE [{}]: {}", node.0, state))
            })
            .collect();
        (!lines.is_empty()).then(|| lines.join("\n"))
    }
}

impl<M: Payload, L: Payload> fmt::Debug for SimulationContext<M, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationContext")
            .field("nodes", &self.number_of_nodes())
            .field("events", &self.events.len())
            .field("outstanding", &self.counter.count())
            .finish_non_exhaustive()
    }
}
