//! Test subjects for the simulation engine.
//!
//! Every node here speaks [`TestMessage`] and keeps `u64` entries in its
//! durable log. Each node type exposes its operations through an
//! [`OperationRegistry`] built by `operations()`.

use faultline_core::{
    async_trait, Environment, ExecutionResult, ExecutionScenario, Node, NodeError,
    OperationRegistry, Verifier,
};
use faultline_types::NodeId;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::future::pending;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Messages exchanged by the test nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestMessage {
    /// Sequenced message, used to observe delivery order.
    Seq(u64),
    /// Broadcast payload.
    Broadcast(u64),
    /// Crashes a [`RecordingNode`] that handles it.
    Poison,
}

/// Environment type of the test nodes.
pub type TestEnv = Arc<dyn Environment<TestMessage, u64>>;

fn argument(arguments: &[Value], index: usize) -> u64 {
    arguments.get(index).and_then(Value::as_u64).unwrap_or(0)
}

// ═══════════════════════════════════════════════════════════════════════════
// NoopNode
// ═══════════════════════════════════════════════════════════════════════════

/// Does nothing.
pub struct NoopNode {
    _env: TestEnv,
}

impl NoopNode {
    pub fn new(env: TestEnv) -> Self {
        Self { _env: env }
    }

    pub fn operations() -> OperationRegistry<Self> {
        OperationRegistry::new().operation("noop", |_node: Arc<Self>, _args| async move { Ok(None) })
    }
}

#[async_trait]
impl Node<TestMessage> for NoopNode {
    async fn on_message(&self, _message: TestMessage, _sender: NodeId) -> Result<(), NodeError> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RecordingNode
// ═══════════════════════════════════════════════════════════════════════════

/// Sends messages on request and records everything that happens to it.
///
/// Operations:
/// - `send(to, count)`: sends `Seq(0..count)` to `to`
/// - `broadcast(value)`: sends `Broadcast(value)` to every other node
/// - `append(value)`: appends to the durable log, returns the log length
/// - `crash()`: crashes the node
/// - `poison(to, delay_ms)`: sleeps, then sends `Poison` to `to`
/// - `spin(ms)`: blocks its thread for `ms` milliseconds, returns 1
/// - `await_unavailable()`: waits until some node is reported unavailable
/// - `fragile()`: the next crash notification crashes this incarnation
/// - `noop()`: does nothing
///
/// Handling `Poison` crashes the node from its receive loop.
pub struct RecordingNode {
    env: TestEnv,
    received: Mutex<Vec<(NodeId, TestMessage)>>,
    unavailable: Mutex<Vec<NodeId>>,
    starts: AtomicUsize,
    recoveries: AtomicUsize,
    scenario_finishes: AtomicUsize,
    log_at_recovery: Mutex<Option<Vec<u64>>>,
    /// Recovery count observed by each `append` of this incarnation.
    recoveries_seen: Mutex<Vec<usize>>,
    fragile: AtomicBool,
}

impl RecordingNode {
    pub fn new(env: TestEnv) -> Self {
        Self {
            env,
            received: Mutex::new(Vec::new()),
            unavailable: Mutex::new(Vec::new()),
            starts: AtomicUsize::new(0),
            recoveries: AtomicUsize::new(0),
            scenario_finishes: AtomicUsize::new(0),
            log_at_recovery: Mutex::new(None),
            recoveries_seen: Mutex::new(Vec::new()),
            fragile: AtomicBool::new(false),
        }
    }

    pub fn operations() -> OperationRegistry<Self> {
        OperationRegistry::new()
            .operation("send", |node: Arc<Self>, args| async move {
                let to = NodeId(argument(&args, 0) as u32);
                for i in 0..argument(&args, 1) {
                    node.env.send(TestMessage::Seq(i), to)?;
                }
                Ok(None)
            })
            .operation("broadcast", |node: Arc<Self>, args| async move {
                node.env.broadcast(TestMessage::Broadcast(argument(&args, 0)))?;
                Ok(None)
            })
            .operation("append", |node: Arc<Self>, args| async move {
                node.recoveries_seen
                    .lock()
                    .push(node.recoveries.load(Ordering::SeqCst));
                node.env.append_log(argument(&args, 0));
                Ok(Some(json!(node.env.log().len())))
            })
            .operation("crash", |_node: Arc<Self>, _args| async move {
                Err(NodeError::Crash)
            })
            .operation("poison", |node: Arc<Self>, args| async move {
                tokio::time::sleep(Duration::from_millis(argument(&args, 1))).await;
                node.env.send(TestMessage::Poison, NodeId(argument(&args, 0) as u32))?;
                Ok(None)
            })
            .operation("spin", |_node: Arc<Self>, args| async move {
                std::thread::sleep(Duration::from_millis(argument(&args, 0)));
                Ok(Some(json!(1)))
            })
            .operation("await_unavailable", |node: Arc<Self>, _args| async move {
                while node.unavailable.lock().is_empty() {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                Ok(None)
            })
            .operation("fragile", |node: Arc<Self>, _args| async move {
                node.fragile.store(true, Ordering::SeqCst);
                Ok(None)
            })
            .operation("noop", |_node: Arc<Self>, _args| async move { Ok(None) })
    }

    /// Messages received by this incarnation, in handling order.
    pub fn received(&self) -> Vec<(NodeId, TestMessage)> {
        self.received.lock().clone()
    }

    /// Messages received from `sender`.
    pub fn received_from(&self, sender: NodeId) -> Vec<TestMessage> {
        self.received
            .lock()
            .iter()
            .filter(|(from, _)| *from == sender)
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Nodes reported unavailable to this incarnation.
    pub fn unavailable(&self) -> Vec<NodeId> {
        self.unavailable.lock().clone()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn recoveries(&self) -> usize {
        self.recoveries.load(Ordering::SeqCst)
    }

    pub fn scenario_finishes(&self) -> usize {
        self.scenario_finishes.load(Ordering::SeqCst)
    }

    /// Durable log as seen by the recovery hook.
    pub fn log_at_recovery(&self) -> Option<Vec<u64>> {
        self.log_at_recovery.lock().clone()
    }

    pub fn recoveries_seen(&self) -> Vec<usize> {
        self.recoveries_seen.lock().clone()
    }

    pub fn log(&self) -> Vec<u64> {
        self.env.log()
    }
}

#[async_trait]
impl Node<TestMessage> for RecordingNode {
    async fn on_start(&self) -> Result<(), NodeError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_message(&self, message: TestMessage, sender: NodeId) -> Result<(), NodeError> {
        let poisoned = message == TestMessage::Poison;
        self.received.lock().push((sender, message));
        if poisoned {
            return Err(NodeError::Crash);
        }
        Ok(())
    }

    async fn on_node_unavailable(&self, node: NodeId) -> Result<(), NodeError> {
        self.unavailable.lock().push(node);
        if self.fragile.load(Ordering::SeqCst) {
            return Err(NodeError::Crash);
        }
        Ok(())
    }

    async fn on_scenario_finish(&self) -> Result<(), NodeError> {
        self.scenario_finishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn recover(&self) -> Result<(), NodeError> {
        *self.log_at_recovery.lock() = Some(self.env.log());
        self.recoveries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn state_representation(&self) -> Option<String> {
        Some(format!("received={}", self.received.lock().len()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ChattyNode
// ═══════════════════════════════════════════════════════════════════════════

/// Keeps the network busy: `chat(rounds)` broadcasts `rounds` messages,
/// and every received broadcast with a positive value is answered with the
/// value minus one.
pub struct ChattyNode {
    env: TestEnv,
    handled: AtomicUsize,
}

impl ChattyNode {
    pub fn new(env: TestEnv) -> Self {
        Self {
            env,
            handled: AtomicUsize::new(0),
        }
    }

    pub fn operations() -> OperationRegistry<Self> {
        OperationRegistry::new().operation("chat", |node: Arc<Self>, args| async move {
            for round in 0..argument(&args, 0) {
                node.env.broadcast(TestMessage::Broadcast(round % 3))?;
            }
            Ok(None)
        })
    }

    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Node<TestMessage> for ChattyNode {
    async fn on_message(&self, message: TestMessage, sender: NodeId) -> Result<(), NodeError> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        if let TestMessage::Broadcast(value) = message {
            if value > 0 {
                self.env.send(TestMessage::Broadcast(value - 1), sender)?;
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// WaitingNode / FailingNode
// ═══════════════════════════════════════════════════════════════════════════

/// `wait()` waits for a message that never comes.
pub struct WaitingNode {
    _env: TestEnv,
}

impl WaitingNode {
    pub fn new(env: TestEnv) -> Self {
        Self { _env: env }
    }

    pub fn operations() -> OperationRegistry<Self> {
        OperationRegistry::new()
            .operation("wait", |_node: Arc<Self>, _args| async move {
                pending::<()>().await;
                Ok(None)
            })
            .operation("noop", |_node: Arc<Self>, _args| async move { Ok(None) })
    }
}

#[async_trait]
impl Node<TestMessage> for WaitingNode {
    async fn on_message(&self, _message: TestMessage, _sender: NodeId) -> Result<(), NodeError> {
        Ok(())
    }
}

/// `fail()` raises `IllegalState`; `panic()` panics.
pub struct FailingNode {
    _env: TestEnv,
}

impl FailingNode {
    pub fn new(env: TestEnv) -> Self {
        Self { _env: env }
    }

    pub fn operations() -> OperationRegistry<Self> {
        OperationRegistry::new()
            .operation("fail", |_node: Arc<Self>, _args| async move {
                Err(NodeError::exception("IllegalState", "operation always fails"))
            })
            .operation("panic", |_node: Arc<Self>, _args| async move { explode() })
            .operation("value", |_node: Arc<Self>, args| async move {
                Ok(Some(json!(argument(&args, 0))))
            })
    }
}

fn explode() -> Result<Option<Value>, NodeError> {
    panic!("operation panicked")
}

#[async_trait]
impl Node<TestMessage> for FailingNode {
    async fn on_message(&self, _message: TestMessage, _sender: NodeId) -> Result<(), NodeError> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Verifiers
// ═══════════════════════════════════════════════════════════════════════════

/// Accepts every result.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptingVerifier;

impl Verifier for AcceptingVerifier {
    fn verify(&self, _scenario: &ExecutionScenario, _result: &ExecutionResult) -> bool {
        true
    }
}

/// Rejects every result.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectingVerifier;

impl Verifier for RejectingVerifier {
    fn verify(&self, _scenario: &ExecutionScenario, _result: &ExecutionResult) -> bool {
        false
    }
}
