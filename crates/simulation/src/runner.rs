//! Invocation orchestration.

use crate::address_resolver::AddressResolver;
use crate::context::SimulationContext;
use crate::event_log::Event;
use crate::fault_injector::{FaultConfig, FaultInjector};
use crate::result::InvocationResult;
use faultline_core::{ConfigError, DistributedOptions, ExecutionScenario, Payload};
use faultline_types::{ExecutionResult, NodeId};
use std::io;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs invocations of one scenario under one set of options.
///
/// Static configuration (options, address resolver, per-node fault
/// injectors) lives as long as the runner; every invocation gets a fresh
/// [`SimulationContext`]. The context of the last invocation is kept for
/// inspection and log dumps.
///
/// Invocations spawn tasks, so [`DistributedRunner::run`] must be called
/// from within a tokio runtime.
pub struct DistributedRunner<M: Payload, L: Payload> {
    options: Arc<DistributedOptions<M, L>>,
    scenario: Arc<ExecutionScenario>,
    resolver: Arc<AddressResolver>,
    injectors: Arc<[FaultInjector]>,
    seed: u64,
    invocations: u64,
    context: Option<Arc<SimulationContext<M, L>>>,
}

impl<M: Payload, L: Payload> DistributedRunner<M, L> {
    /// Validate the configuration and build the static state.
    pub fn new(
        options: DistributedOptions<M, L>,
        scenario: ExecutionScenario,
    ) -> Result<Self, ConfigError> {
        let resolver = AddressResolver::new(&options, scenario.threads())?;
        let seed = options.seed.unwrap_or_else(rand::random);
        let nodes = resolver.total_number_of_nodes();
        let config = FaultConfig {
            network_reliable: options.network_reliable,
            message_duplication: options.message_duplication,
            recovery_mode: options.recovery_mode,
            number_of_nodes: nodes,
        };
        let injectors = NodeId::all(nodes)
            .map(|node| FaultInjector::new(node, config, seed))
            .collect();

        info!(
            nodes,
            threads = scenario.threads(),
            seed,
            "Distributed runner configured"
        );

        Ok(Self {
            options: Arc::new(options),
            scenario: Arc::new(scenario),
            resolver: Arc::new(resolver),
            injectors,
            seed,
            invocations: 0,
            context: None,
        })
    }

    /// Base seed of the fault injectors.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of nodes in the network.
    pub fn number_of_nodes(&self) -> usize {
        self.resolver.total_number_of_nodes()
    }

    /// Number of invocations run so far.
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    /// The options.
    pub fn options(&self) -> &DistributedOptions<M, L> {
        &self.options
    }

    /// The scenario.
    pub fn scenario(&self) -> &ExecutionScenario {
        &self.scenario
    }

    /// The address resolver.
    pub fn resolver(&self) -> &AddressResolver {
        &self.resolver
    }

    /// Fault injector of `node`.
    pub fn injector(&self, node: NodeId) -> &FaultInjector {
        &self.injectors[node.index()]
    }

    /// Context of the last invocation.
    pub fn context(&self) -> Option<&Arc<SimulationContext<M, L>>> {
        self.context.as_ref()
    }

    /// Events of the last invocation.
    pub fn events(&self) -> Vec<Event<M>> {
        self.context
            .as_ref()
            .map(|context| context.events().snapshot())
            .unwrap_or_default()
    }

    /// Run one invocation.
    pub async fn run(&mut self) -> InvocationResult {
        let context = self.reset();
        debug!(invocation = self.invocations, "Invocation started");
        context.start();

        let quiescent = tokio::time::timeout(self.options.timeout, context.counter.wait())
            .await
            .is_ok();
        if !quiescent {
            let result = InvocationResult::Deadlock {
                tasks: context.tasks.snapshot(),
                nodes: self.resolver.nodes().map(|node| context.node_state(node)).collect(),
                state: context.describe_states(),
            };
            context.shut_down();
            warn!(
                invocation = self.invocations,
                live_tasks = context.tasks.len(),
                "Invocation timed out"
            );
            return result;
        }
        context.shut_down();

        if let Some(fatal) = context.fatal() {
            return InvocationResult::UnexpectedException {
                node: fatal.node,
                error: fatal.error.clone(),
            };
        }

        for node in self.resolver.nodes() {
            let Some(instance) = context.instance(node) else {
                continue;
            };
            for hook in &self.options.validation_hooks {
                if let Some(Err(message)) = hook.check(&instance) {
                    warn!(node = %node, hook = %hook.name, %message, "Validation failed");
                    return InvocationResult::ValidationFailure {
                        scenario: self.scenario.without_post(),
                        hook: hook.name.clone(),
                        node,
                        message,
                    };
                }
            }
        }

        debug!(
            invocation = self.invocations,
            events = context.events().len(),
            crashes = context.failures().total_crashes(),
            "Invocation completed"
        );
        InvocationResult::Completed(ExecutionResult {
            parallel: context.results(),
            state_representation: context.describe_states(),
        })
    }

    /// Store the last invocation's event log to the configured log file,
    /// headed by `failure`. Returns whether a file was written.
    pub fn store_events_to_file(&self, failure: &str) -> io::Result<bool> {
        let (Some(path), Some(context)) = (&self.options.log_file, &self.context) else {
            return Ok(false);
        };
        context.events().store_to_file(failure, path)?;
        info!(path = %path.display(), "Event log stored");
        Ok(true)
    }

    /// Prepare a fresh context. Fault injectors keep their message history.
    fn reset(&mut self) -> Arc<SimulationContext<M, L>> {
        let expected = self.options.expected_failures(self.number_of_nodes());
        for injector in self.injectors.iter() {
            injector.reset(expected);
        }
        self.invocations += 1;
        let context = SimulationContext::new(
            self.options.clone(),
            self.resolver.clone(),
            self.scenario.clone(),
            self.injectors.clone(),
        );
        self.context = Some(context.clone());
        context
    }
}
