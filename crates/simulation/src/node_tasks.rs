//! Node incarnations: their tasks, crashes and recoveries.
//!
//! Every incarnation runs three kinds of tasks under its own cancellation
//! token, a child of the invocation's shutdown token:
//!
//! - the main loop: start (or recovery) hook, then the node's actors
//! - one receive loop per sender, handling that sender's messages in order
//! - the failure loop, handling crash notifications
//!
//! A crash cancels the incarnation's token. Errors are settled at the task
//! boundary: a crash signal drives the crash transition, anything else is a
//! fatal error of the invocation.

use crate::context::{CrashNotice, NodeSlot, NodeState, SimulationContext};
use crate::environment::EnvironmentImpl;
use crate::event_log::{Event, EventKind};
use crate::task_counter::TaskGuard;
use crate::task_registry::TaskKind;
use crate::transport::Envelope;
use faultline_core::{Environment, NodeError, NodeInstance, Payload};
use faultline_types::{ActorResult, NodeId};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, trace, Instrument};

impl<M: Payload, L: Payload> SimulationContext<M, L> {
    /// Start the first incarnation of every node.
    ///
    /// One unit per node is charged up front and adopted by the main loops,
    /// so the counter cannot reach zero before every node has started.
    pub(crate) fn start(self: &Arc<Self>) {
        let nodes = self.number_of_nodes();
        self.counter.add(nodes);
        for node in NodeId::all(nodes) {
            self.start_incarnation(node, 0, Vec::new(), false);
        }
    }

    /// Create an incarnation of `node` and spawn its tasks. The caller must
    /// have counted one unit for the main loop.
    fn start_incarnation(
        self: &Arc<Self>,
        node: NodeId,
        incarnation: u32,
        log: Vec<L>,
        recovering: bool,
    ) {
        let main_guard = self.counter.adopt();
        let Some((_, registration)) = self
            .options
            .node_types
            .get_index(self.resolver.class_of(node))
        else {
            self.record_failure(
                node,
                NodeError::exception("Configuration", format!("no node type for {}", node)),
            );
            return;
        };

        let env = Arc::new(EnvironmentImpl::new(
            Arc::downgrade(self),
            node,
            self.number_of_nodes(),
            self.resolver.can_fail(node),
            log,
        ));
        let shared: Arc<dyn Environment<M, L>> = env.clone();
        let instance = (registration.factory)(shared);
        let token = self.shutdown.child_token();
        let receivers = self.transport().reset(node, incarnation);
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();

        *self.slots[node.index()].write() = Some(NodeSlot {
            instance: instance.clone(),
            env: env.clone(),
            token: token.clone(),
            failures: Some(failure_tx),
            incarnation,
            state: if recovering {
                NodeState::Recovering
            } else {
                NodeState::Running
            },
        });
        if recovering {
            self.failures().set_recovered(node);
        }

        let span = debug_span!("node", node = %node, incarnation);
        let inc = Incarnation {
            node,
            number: incarnation,
            instance,
            env,
            token,
        };
        tokio::spawn(
            self.clone()
                .main_loop(inc.clone(), main_guard, recovering)
                .instrument(span.clone()),
        );
        for (sender, receiver) in receivers.into_iter().enumerate() {
            tokio::spawn(
                self.clone()
                    .receive_messages(inc.clone(), NodeId::from_index(sender), receiver)
                    .instrument(span.clone()),
            );
        }
        tokio::spawn(self.clone().receive_failures(inc, failure_rx).instrument(span));
    }

    async fn main_loop(self: Arc<Self>, inc: Incarnation<M, L>, guard: TaskGuard, recovering: bool) {
        let _task = self.tasks.register(inc.node, TaskKind::Main, inc.number);
        let mut guard = Some(guard);
        let outcome = tokio::select! {
            biased;
            _ = inc.token.cancelled() => return,
            outcome = AssertUnwindSafe(self.run_node(&inc, &mut guard, recovering)).catch_unwind() => outcome,
        };
        // The main loop's unit is held until the outcome is settled, so a
        // recovery is counted before this incarnation stops counting.
        self.settle(&inc, flatten(outcome));
        drop(guard);
    }

    async fn run_node(
        &self,
        inc: &Incarnation<M, L>,
        guard: &mut Option<TaskGuard>,
        recovering: bool,
    ) -> Result<(), NodeError> {
        let node = inc.node;
        let hooks = inc.instance.node();
        if recovering {
            let clock = self.inc_clock(node);
            self.log_event(node, clock, EventKind::ProcessRecovery);
            debug!("Running recovery hook");
            hooks.recover().await?;
            inc.check_alive()?;
            self.set_state(inc, NodeState::Running);
        } else {
            hooks.on_start().await?;
            inc.check_alive()?;
        }

        let Some(execution) = self.executions.get(node.index()) else {
            self.set_state(inc, NodeState::Completed);
            return Ok(());
        };

        loop {
            let next = execution.lock().start_next(inc.number);
            let Some((index, actor)) = next else {
                break;
            };
            let clock = self.inc_clock(node);
            self.log_event(
                node,
                clock.clone(),
                EventKind::OperationStart {
                    actor: index,
                    operation: actor.to_string(),
                },
            );
            debug!(actor = index, operation = %actor, "Operation started");

            let outcome = if actor.is_blocking {
                execution.lock().suspend(inc.number, index, clock);
                guard.take();
                let outcome = actor.invoke(inc.instance.handle()).await;
                *guard = Some(self.counter.acquire());
                outcome
            } else {
                actor.invoke(inc.instance.handle()).await
            };
            inc.check_alive()?;

            let result = match outcome {
                Ok(Some(value)) => ActorResult::Value(value),
                Ok(None) => ActorResult::Void,
                Err(error) => {
                    let handled = error
                        .kind()
                        .filter(|kind| actor.handles(kind))
                        .map(str::to_string);
                    match handled {
                        Some(kind) => ActorResult::Exception(kind),
                        None => return Err(error),
                    }
                }
            };
            let clock = self.clock(node);
            trace!(actor = index, result = %result, "Operation completed");
            execution.lock().record(inc.number, index, result, clock);
            self.context_switch(node).await;
        }

        let first_finish = execution.lock().finish(inc.number);
        if first_finish {
            hooks.on_scenario_finish().await?;
            inc.check_alive()?;
        }
        self.set_state(inc, NodeState::Completed);
        debug!("Operations over");
        Ok(())
    }

    async fn receive_messages(
        self: Arc<Self>,
        inc: Incarnation<M, L>,
        sender: NodeId,
        mut receiver: UnboundedReceiver<Envelope<M>>,
    ) {
        let node = inc.node;
        let _task = self
            .tasks
            .register(node, TaskKind::Receive { from: sender }, inc.number);
        loop {
            let envelope = tokio::select! {
                biased;
                _ = inc.token.cancelled() => break,
                envelope = receiver.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            let Envelope {
                id,
                payload,
                clock,
                _guard: guard,
                ..
            } = envelope;
            if inc.token.is_cancelled() {
                break;
            }

            let clock = self.max_clock(node, &clock);
            trace!(from = %sender, %id, "Message received");
            self.log_event(
                node,
                clock,
                EventKind::MessageReceived {
                    sender,
                    id,
                    payload: payload.clone(),
                },
            );

            let outcome = tokio::select! {
                biased;
                _ = inc.token.cancelled() => break,
                outcome = AssertUnwindSafe(inc.instance.node().on_message(payload, sender)).catch_unwind() => outcome,
            };
            // Another task may have crashed this incarnation while the hook ran.
            let alive = self.settle(&inc, flatten(outcome)) && !inc.token.is_cancelled();
            drop(guard);
            if !alive {
                break;
            }
            self.context_switch(node).await;
        }
    }

    async fn receive_failures(
        self: Arc<Self>,
        inc: Incarnation<M, L>,
        mut receiver: UnboundedReceiver<CrashNotice>,
    ) {
        let node = inc.node;
        let _task = self
            .tasks
            .register(node, TaskKind::Failures, inc.number);
        loop {
            let notice = tokio::select! {
                biased;
                _ = inc.token.cancelled() => break,
                notice = receiver.recv() => match notice {
                    Some(notice) => notice,
                    None => break,
                },
            };
            let CrashNotice {
                failed,
                clock,
                _guard: guard,
            } = notice;
            if inc.token.is_cancelled() {
                break;
            }

            let clock = self.max_clock(node, &clock);
            debug!(failed = %failed, "Crash notification received");
            self.log_event(node, clock, EventKind::CrashNotification { failed });

            let outcome = tokio::select! {
                biased;
                _ = inc.token.cancelled() => break,
                outcome = AssertUnwindSafe(inc.instance.node().on_node_unavailable(failed)).catch_unwind() => outcome,
            };
            // Another task may have crashed this incarnation while the hook ran.
            let alive = self.settle(&inc, flatten(outcome)) && !inc.token.is_cancelled();
            drop(guard);
            if !alive {
                break;
            }
        }
    }

    /// Route the outcome of a hook. Returns whether the incarnation is still
    /// alive.
    fn settle(self: &Arc<Self>, inc: &Incarnation<M, L>, outcome: Result<(), NodeError>) -> bool {
        match outcome {
            Err(error) if !error.is_crash() && !inc.env.crash_requested() => {
                self.record_failure(inc.node, error);
                false
            }
            Err(_) => {
                self.crash(inc.node, inc.number);
                false
            }
            Ok(()) if inc.env.crash_requested() => {
                self.crash(inc.node, inc.number);
                false
            }
            Ok(()) => true,
        }
    }

    /// Crash `incarnation` of `node`. Later calls for the same incarnation
    /// are ignored.
    pub(crate) fn crash(self: &Arc<Self>, node: NodeId, incarnation: u32) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let (env, token, instance) = {
            let mut slot = self.slots[node.index()].write();
            let Some(slot) = slot.as_mut() else {
                return;
            };
            if slot.incarnation != incarnation || !slot.state.is_live() {
                return;
            }
            slot.state = NodeState::Crashed;
            // Dropping the sender closes the failure channel.
            slot.failures = None;
            (slot.env.clone(), slot.token.clone(), slot.instance.clone())
        };

        self.failures().set_crashed(node);
        let clock = self.inc_clock(node);
        self.events().push(Event {
            node,
            clock: clock.clone(),
            state: instance.node().state_representation(),
            kind: EventKind::NodeCrash,
        });
        info!(node = %node, incarnation, clock = %clock, "Node crashed");

        for other in NodeId::all(self.number_of_nodes()).filter(|other| *other != node) {
            let slot = self.slots[other.index()].read();
            let Some(slot) = slot.as_ref().filter(|slot| slot.state.is_live()) else {
                continue;
            };
            if let Some(failures) = &slot.failures {
                // A closed channel hands the notice back; dropping it
                // releases its unit.
                let _ = failures.send(CrashNotice {
                    failed: node,
                    clock: clock.clone(),
                    _guard: self.counter.acquire(),
                });
            }
        }

        self.transport().close(node);
        env.finish();
        token.cancel();
        let execution = self.executions.get(node.index());
        if let Some(execution) = execution {
            execution.lock().crash(incarnation, &clock);
        }

        let recovers = self
            .options
            .recovery_mode
            .should_recover(|| self.injector(node).node_recovered());
        if recovers {
            debug!(
                node = %node,
                incarnation = incarnation + 1,
                resume_at = execution.map(|execution| execution.lock().cursor()),
                "Node recovers"
            );
            self.counter.add(1);
            self.start_incarnation(node, incarnation + 1, env.log(), true);
        } else {
            debug!(node = %node, "Node terminated");
            if let Some(slot) = self.slots[node.index()].write().as_mut() {
                slot.state = NodeState::Terminated;
            }
            if let Some(execution) = execution {
                execution.lock().terminate(&clock);
            }
        }
    }

    fn set_state(&self, inc: &Incarnation<M, L>, state: NodeState) {
        if let Some(slot) = self.slots[inc.node.index()].write().as_mut() {
            if slot.incarnation == inc.number && slot.state.is_live() {
                slot.state = state;
            }
        }
    }

    async fn context_switch(&self, node: NodeId) {
        if self.injector(node).context_switch() {
            tokio::task::yield_now().await;
        }
    }
}

/// What every task of one node incarnation shares.
struct Incarnation<M: Payload, L: Payload> {
    node: NodeId,
    number: u32,
    instance: NodeInstance<M>,
    env: Arc<EnvironmentImpl<M, L>>,
    token: CancellationToken,
}

impl<M: Payload, L: Payload> Incarnation<M, L> {
    /// `Err(Crash)` once this incarnation has crashed or asked to crash. A
    /// crash from another task of the node only shows through the token.
    fn check_alive(&self) -> Result<(), NodeError> {
        if self.token.is_cancelled() {
            return Err(NodeError::Crash);
        }
        self.env.check_crash()
    }
}

impl<M: Payload, L: Payload> Clone for Incarnation<M, L> {
    fn clone(&self) -> Self {
        Self {
            node: self.node,
            number: self.number,
            instance: self.instance.clone(),
            env: self.env.clone(),
            token: self.token.clone(),
        }
    }
}

fn flatten(outcome: Result<Result<(), NodeError>, Box<dyn Any + Send>>) -> Result<(), NodeError> {
    outcome.unwrap_or_else(|panic| Err(NodeError::Panic(panic_message(panic.as_ref()))))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
