//! Per-node probabilistic fault decisions.
//!
//! Each node owns one injector for the whole test. Its message counters span
//! invocations: the failure probability of an invocation is derived from the
//! largest number of messages the node has sent in any earlier invocation, so
//! that on average `E` of `N` nodes fail per invocation when `E` failures are
//! expected.

use faultline_core::RecoveryMode;
use faultline_types::NodeId;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Probability that a send survives an unreliable network.
pub const MESSAGE_SENT_PROBABILITY: f64 = 0.95;

/// Probability that a surviving send is delivered exactly once when
/// duplication is enabled.
pub const MESSAGE_SINGLE_DELIVERY_PROBABILITY: f64 = 0.9;

/// Probability that a crashed node recovers in mixed recovery mode.
pub const NODE_RECOVERY_PROBABILITY: f64 = 0.7;

/// Probability of a cooperative yield after an actor or a received message.
pub const CONTEXT_SWITCH_PROBABILITY: f64 = 0.3;

/// Upper bound on the yields before an asynchronous delivery.
const MAX_DELIVERY_YIELDS: usize = 4;

/// Fixed parameters of an injector.
#[derive(Debug, Clone, Copy)]
pub struct FaultConfig {
    /// Whether every send is delivered.
    pub network_reliable: bool,
    /// Whether delivered sends may be duplicated.
    pub message_duplication: bool,
    /// Recovery policy, which selects the failure formula.
    pub recovery_mode: RecoveryMode,
    /// Number of nodes in the network.
    pub number_of_nodes: usize,
}

#[derive(Debug)]
struct FaultState {
    rng: ChaCha8Rng,
    prev_msg_count: u64,
    cur_msg_count: u64,
    expected_failures: usize,
}

/// Random decision source of one node.
#[derive(Debug)]
pub struct FaultInjector {
    node: NodeId,
    config: FaultConfig,
    state: Mutex<FaultState>,
}

impl FaultInjector {
    /// Create an injector for `node`, seeded from the base seed and the node
    /// index so that nodes draw independent streams.
    pub fn new(node: NodeId, config: FaultConfig, seed: u64) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(u64::from(node.0)));
        Self {
            node,
            config,
            state: Mutex::new(FaultState {
                rng,
                prev_msg_count: 0,
                cur_msg_count: 0,
                expected_failures: 0,
            }),
        }
    }

    /// The node this injector decides for.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Whether a send survives the network.
    pub fn message_is_sent(&self) -> bool {
        if self.config.network_reliable {
            return true;
        }
        self.roll(MESSAGE_SENT_PROBABILITY)
    }

    /// Number of copies of a send to deliver: 0 (lost), 1, or 2.
    pub fn duplication_rate(&self) -> usize {
        if !self.message_is_sent() {
            return 0;
        }
        if !self.config.message_duplication {
            return 1;
        }
        if self.roll(MESSAGE_SINGLE_DELIVERY_PROBABILITY) {
            1
        } else {
            2
        }
    }

    /// Probability that the node fails on its current send.
    pub fn fail_probability(&self) -> f64 {
        let state = self.state.lock();
        if state.prev_msg_count == 0 || self.config.number_of_nodes == 0 {
            return 0.0;
        }
        let q = state.expected_failures as f64 / self.config.number_of_nodes as f64;
        let prev = state.prev_msg_count as f64;
        let denominator = match self.config.recovery_mode {
            RecoveryMode::NoRecoveries => {
                prev - (state.cur_msg_count.saturating_sub(1) as f64) * q
            }
            RecoveryMode::AllNodesRecover | RecoveryMode::Mixed => prev,
        };
        if denominator <= 0.0 {
            return 1.0;
        }
        (q / denominator).clamp(0.0, 1.0)
    }

    /// Roll for a node failure on the current send.
    pub fn node_failed(&self) -> bool {
        let p = self.fail_probability();
        p > 0.0 && self.roll(p)
    }

    /// Roll for recovery of a crashed node.
    pub fn node_recovered(&self) -> bool {
        self.roll(NODE_RECOVERY_PROBABILITY)
    }

    /// Roll for a cooperative yield.
    pub fn context_switch(&self) -> bool {
        self.roll(CONTEXT_SWITCH_PROBABILITY)
    }

    /// Number of yields before an asynchronously scheduled delivery.
    pub fn delivery_yields(&self) -> usize {
        self.state.lock().rng.gen_range(0..=MAX_DELIVERY_YIELDS)
    }

    /// Count one send in the current invocation.
    pub fn on_message_sent(&self) {
        self.state.lock().cur_msg_count += 1;
    }

    /// Start a new invocation expecting `expected_failures` failed nodes.
    pub fn reset(&self, expected_failures: usize) {
        let mut state = self.state.lock();
        state.prev_msg_count = state.prev_msg_count.max(state.cur_msg_count);
        state.cur_msg_count = 0;
        state.expected_failures = expected_failures;
    }

    /// Messages sent so far in the current invocation.
    pub fn current_message_count(&self) -> u64 {
        self.state.lock().cur_msg_count
    }

    /// Largest per-invocation message count seen before the current one.
    pub fn previous_message_count(&self) -> u64 {
        self.state.lock().prev_msg_count
    }

    fn roll(&self, probability: f64) -> bool {
        self.state.lock().rng.gen_bool(probability.clamp(0.0, 1.0))
    }
}
