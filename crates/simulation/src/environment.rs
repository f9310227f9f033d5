//! The environment handed to each node incarnation.

use crate::context::SimulationContext;
use faultline_core::{Environment, NodeError, Payload};
use faultline_types::NodeId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use tracing::{debug, trace};

/// Environment of one node incarnation.
///
/// A crash ends the incarnation's environment; the recovered incarnation
/// gets a new environment seeded with a copy of this one's durable log.
pub struct EnvironmentImpl<M: Payload, L: Payload> {
    context: Weak<SimulationContext<M, L>>,
    node: NodeId,
    number_of_nodes: usize,
    can_fail: bool,
    log: Mutex<Vec<L>>,
    finished: AtomicBool,
    crash_requested: AtomicBool,
}

impl<M: Payload, L: Payload> EnvironmentImpl<M, L> {
    pub(crate) fn new(
        context: Weak<SimulationContext<M, L>>,
        node: NodeId,
        number_of_nodes: usize,
        can_fail: bool,
        log: Vec<L>,
    ) -> Self {
        Self {
            context,
            node,
            number_of_nodes,
            can_fail,
            log: Mutex::new(log),
            finished: AtomicBool::new(false),
            crash_requested: AtomicBool::new(false),
        }
    }

    /// Stop accepting sends.
    pub(crate) fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Whether a send decided that this node fails.
    pub(crate) fn crash_requested(&self) -> bool {
        self.crash_requested.load(Ordering::Acquire)
    }

    /// `Err(Crash)` once a send decided that this node fails.
    pub(crate) fn check_crash(&self) -> Result<(), NodeError> {
        if self.crash_requested() {
            Err(NodeError::Crash)
        } else {
            Ok(())
        }
    }
}

impl<M: Payload, L: Payload> Environment<M, L> for EnvironmentImpl<M, L> {
    fn node_id(&self) -> NodeId {
        self.node
    }

    fn number_of_nodes(&self) -> usize {
        self.number_of_nodes
    }

    fn send(&self, message: M, receiver: NodeId) -> Result<(), NodeError> {
        if receiver.index() >= self.number_of_nodes {
            return Err(NodeError::exception(
                "UnknownNode",
                format!("{} sent to {} in a network of {} nodes", self.node, receiver, self.number_of_nodes),
            ));
        }
        if self.is_finished() || self.crash_requested() {
            trace!(node = %self.node, to = %receiver, "Send from finished node dropped");
            return Ok(());
        }
        let Some(context) = self.context.upgrade() else {
            return Ok(());
        };

        let injector = context.injector(self.node);
        injector.on_message_sent();
        if self.can_fail
            && context.failures().has_budget()
            && injector.node_failed()
            && context.failures().try_reserve(self.node)
        {
            debug!(
                node = %self.node,
                messages = injector.current_message_count(),
                "Fault injection crashes node on send"
            );
            self.crash_requested.store(true, Ordering::Release);
            return Err(NodeError::Crash);
        }

        context.transport().send(
            self.node,
            receiver,
            message,
            context.clock(self.node),
            injector,
        );
        Ok(())
    }

    fn append_log(&self, entry: L) {
        self.log.lock().push(entry);
    }

    fn log(&self) -> Vec<L> {
        self.log.lock().clone()
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}
