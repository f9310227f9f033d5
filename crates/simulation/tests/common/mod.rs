#![allow(dead_code)]

use faultline_core::{Actor, DistributedOptions, ExecutionScenario, Node};
use faultline_simulation::{DistributedRunner, Event, EventKind};
use faultline_test_helpers::{
    ChattyNode, FailingNode, NoopNode, RecordingNode, TestMessage, WaitingNode,
};
use faultline_types::{ActorResult, ExecutionResult, NodeId};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub type Options = DistributedOptions<TestMessage, u64>;
pub type Runner = DistributedRunner<TestMessage, u64>;

pub const SEED: u64 = 0x5eed;

pub fn options() -> Options {
    DistributedOptions::new()
        .with_seed(SEED)
        .with_timeout(Duration::from_secs(10))
}

pub fn recording(name: &str, args: &[u64]) -> Actor {
    RecordingNode::operations()
        .actor(name, args.iter().map(|a| json!(a)).collect())
        .unwrap()
}

pub fn noop_recording() -> Actor {
    recording("noop", &[])
}

pub fn noop() -> Actor {
    NoopNode::operations().actor("noop", vec![]).unwrap()
}

pub fn chat(rounds: u64) -> Actor {
    ChattyNode::operations().actor("chat", vec![json!(rounds)]).unwrap()
}

pub fn waiting(name: &str) -> Actor {
    WaitingNode::operations().actor(name, vec![]).unwrap()
}

pub fn failing(name: &str, args: Vec<Value>) -> Actor {
    FailingNode::operations().actor(name, args).unwrap()
}

pub fn runner(options: Options, parallel: Vec<Vec<Actor>>) -> Runner {
    DistributedRunner::new(options, ExecutionScenario::parallel(parallel)).unwrap()
}

/// Live incarnation of `node` after the last invocation.
pub fn instance<N: Node<TestMessage>>(runner: &Runner, node: u32) -> Arc<N> {
    runner
        .context()
        .unwrap()
        .instance(NodeId(node))
        .unwrap()
        .downcast::<N>()
        .unwrap()
}

/// Most recent incarnation of `node`, crashed or not.
pub fn last_instance<N: Node<TestMessage>>(runner: &Runner, node: u32) -> Arc<N> {
    runner
        .context()
        .unwrap()
        .last_instance(NodeId(node))
        .unwrap()
        .downcast::<N>()
        .unwrap()
}

pub fn results(result: &ExecutionResult, node: u32) -> Vec<ActorResult> {
    result
        .results_for(NodeId(node))
        .unwrap()
        .iter()
        .map(|r| r.result.clone())
        .collect()
}

pub fn count<M>(events: &[Event<M>], node: u32, matches: impl Fn(&EventKind<M>) -> bool) -> usize {
    events
        .iter()
        .filter(|e| e.node == NodeId(node) && matches(&e.kind))
        .count()
}
