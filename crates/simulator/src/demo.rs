//! Ping/echo demo system.
//!
//! Clients run `ping` actors: each ping appends the next sequence number to
//! the client's durable log and sends it to one of the echo servers, which
//! answers with a pong. Since the log survives crashes, the values returned
//! by a client's pings keep growing across recoveries, which is what
//! [`PingVerifier`] checks.

use faultline_core::{
    async_trait, ConfigError, DistributedOptions, Environment, ExecutionResult,
    ExecutionScenario, Node, NodeError, OperationRegistry, Verifier,
};
use faultline_types::{ActorResult, NodeId};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Messages of the demo system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemoMessage {
    Ping { seq: u64 },
    Pong { seq: u64 },
}

/// Environment of the demo nodes; the durable log holds ping sequence
/// numbers.
pub type DemoEnv = Arc<dyn Environment<DemoMessage, u64>>;

/// Demo options: `clients` ping clients followed by `servers` echo servers.
pub fn options(servers: usize, clients: usize) -> DistributedOptions<DemoMessage, u64> {
    DistributedOptions::new()
        .node_type(clients, true, move |env| PingNode::new(env, clients, servers))
        .node_type(servers, true, EchoNode::new)
        .validation_hook::<PingNode, _>("pongs_answer_pings", |node| {
            let sent = node.env.log().len() as u64;
            match node.pongs().into_iter().find(|seq| *seq >= sent) {
                Some(seq) => Err(format!("pong {} without a ping ({} sent)", seq, sent)),
                None => Ok(()),
            }
        })
}

/// Demo scenario: every client pings `pings` times.
pub fn scenario(clients: usize, pings: usize) -> Result<ExecutionScenario, ConfigError> {
    let ping = PingNode::operations().actor("ping", Vec::new())?;
    Ok(ExecutionScenario::parallel(vec![vec![ping; pings]; clients]))
}

/// Sends pings and collects pongs.
pub struct PingNode {
    env: DemoEnv,
    clients: usize,
    servers: usize,
    pongs: Mutex<Vec<u64>>,
}

impl PingNode {
    pub fn new(env: DemoEnv, clients: usize, servers: usize) -> Self {
        Self {
            env,
            clients,
            servers,
            pongs: Mutex::new(Vec::new()),
        }
    }

    pub fn operations() -> OperationRegistry<Self> {
        OperationRegistry::new().operation("ping", |node: Arc<Self>, _args| async move {
            let seq = node.env.log().len() as u64;
            node.env.append_log(seq);
            node.env.send(DemoMessage::Ping { seq }, node.server_for(seq))?;
            Ok(Some(json!(seq + 1)))
        })
    }

    /// Pongs received by this incarnation.
    pub fn pongs(&self) -> Vec<u64> {
        self.pongs.lock().clone()
    }

    fn server_for(&self, seq: u64) -> NodeId {
        let servers = self.servers.max(1) as u64;
        NodeId::from_index(self.clients + (seq % servers) as usize)
    }
}

#[async_trait]
impl Node<DemoMessage> for PingNode {
    async fn on_message(&self, message: DemoMessage, _sender: NodeId) -> Result<(), NodeError> {
        if let DemoMessage::Pong { seq } = message {
            self.pongs.lock().push(seq);
        }
        Ok(())
    }

    async fn recover(&self) -> Result<(), NodeError> {
        debug!(sent = self.env.log().len(), "Client recovered");
        Ok(())
    }

    fn state_representation(&self) -> Option<String> {
        Some(format!(
            "sent={} pongs={}",
            self.env.log().len(),
            self.pongs.lock().len()
        ))
    }
}

/// Answers every ping with a pong.
pub struct EchoNode {
    env: DemoEnv,
    echoed: AtomicU64,
}

impl EchoNode {
    pub fn new(env: DemoEnv) -> Self {
        Self {
            env,
            echoed: AtomicU64::new(0),
        }
    }

    pub fn echoed(&self) -> u64 {
        self.echoed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Node<DemoMessage> for EchoNode {
    async fn on_message(&self, message: DemoMessage, sender: NodeId) -> Result<(), NodeError> {
        if let DemoMessage::Ping { seq } = message {
            self.env.send(DemoMessage::Pong { seq }, sender)?;
            self.echoed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn state_representation(&self) -> Option<String> {
        Some(format!("echoed={}", self.echoed()))
    }
}

/// Accepts results in which every client's ping values strictly increase.
#[derive(Debug, Default, Clone, Copy)]
pub struct PingVerifier;

impl Verifier for PingVerifier {
    fn verify(&self, _scenario: &ExecutionScenario, result: &ExecutionResult) -> bool {
        result.parallel.iter().all(|results| {
            let values: Vec<u64> = results
                .iter()
                .filter_map(|r| match &r.result {
                    ActorResult::Value(value) => value.as_u64(),
                    _ => None,
                })
                .collect();
            values.windows(2).all(|pair| pair[0] < pair[1])
        })
    }
}
