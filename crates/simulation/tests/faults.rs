mod common;

use common::*;
use faultline_core::{ExecutionScenario, NodeError, RecoveryMode};
use faultline_simulation::{DistributedRunner, EventKind, InvocationResult, NodeState, TaskKind};
use faultline_test_helpers::{ChattyNode, FailingNode, RecordingNode, TestMessage, WaitingNode};
use faultline_types::{ActorResult, NodeId};
use serde_json::json;
use std::time::Duration;
use tracing_test::traced_test;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn test_no_crashes_without_expected_failures() {
    let options = options()
        .with_network_reliable(false)
        .node_type(4, true, ChattyNode::new);
    let mut runner = runner(options, vec![vec![chat(6)]; 4]);

    for _ in 0..20 {
        let result = runner.run().await;
        assert!(result.is_completed(), "{}", result);
        let events = runner.events();
        assert!(events.iter().all(|e| e.kind != EventKind::NodeCrash));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fault_injection_crashes_nodes_once_traffic_is_known() {
    // Expecting every node to fail makes the last send of a repeated
    // workload fail with certainty.
    let options = options()
        .with_max_failed_nodes(|nodes| nodes)
        .node_type(3, true, RecordingNode::new);
    let mut runner = runner(options, vec![vec![recording("broadcast", &[1]); 3]; 3]);

    // The first invocation only learns the message counts.
    assert!(runner.run().await.is_completed());
    let events = runner.events();
    assert!(events.iter().all(|e| e.kind != EventKind::NodeCrash));
    assert_eq!(runner.injector(NodeId(0)).current_message_count(), 6);

    let result = runner.run().await;
    let execution = result.execution().expect("crashes are not failures");
    let events = runner.events();
    for node in 0..3 {
        assert_eq!(count(&events, node, |k| *k == EventKind::NodeCrash), 1);
        assert!(results(execution, node).contains(&ActorResult::NoResult));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crash_without_recovery_retires_node() {
    let options = options().node_type(2, true, RecordingNode::new);
    let mut runner = runner(
        options,
        vec![
            vec![
                recording("append", &[1]),
                recording("crash", &[]),
                recording("broadcast", &[5]),
            ],
            vec![noop_recording()],
        ],
    );

    let result = runner.run().await;
    let execution = result.execution().unwrap();
    assert_eq!(
        results(execution, 0),
        vec![
            ActorResult::Value(json!(1)),
            ActorResult::NoResult,
            ActorResult::NoResult
        ]
    );

    let context = runner.context().unwrap();
    assert_eq!(context.node_state(NodeId(0)), NodeState::Terminated);
    assert!(context.instance(NodeId(0)).is_none());
    assert_eq!(context.failures().crash_count(NodeId(0)), 1);

    let survivor = instance::<RecordingNode>(&runner, 1);
    assert!(survivor.received_from(NodeId(0)).is_empty());
    assert_eq!(survivor.unavailable(), vec![NodeId(0)]);

    let events = runner.events();
    assert_eq!(count(&events, 0, |k| *k == EventKind::NodeCrash), 1);
    assert_eq!(count(&events, 0, |k| *k == EventKind::ProcessRecovery), 0);
    assert_eq!(
        count(&events, 1, |k| *k == EventKind::CrashNotification { failed: NodeId(0) }),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn test_recovered_node_keeps_its_log() {
    let options = options()
        .with_recovery_mode(RecoveryMode::AllNodesRecover)
        .node_type(2, true, RecordingNode::new);
    let mut runner = runner(
        options,
        vec![
            vec![
                recording("append", &[1]),
                recording("append", &[2]),
                recording("crash", &[]),
                recording("append", &[3]),
            ],
            vec![noop_recording()],
        ],
    );

    let result = runner.run().await;
    let execution = result.execution().unwrap();
    assert_eq!(
        results(execution, 0),
        vec![
            ActorResult::Value(json!(1)),
            ActorResult::Value(json!(2)),
            ActorResult::NoResult,
            ActorResult::Value(json!(3)),
        ]
    );

    let recovered = instance::<RecordingNode>(&runner, 0);
    assert_eq!(recovered.log_at_recovery(), Some(vec![1, 2]));
    assert_eq!(recovered.log(), vec![1, 2, 3]);
    assert_eq!(recovered.recoveries(), 1);
    assert_eq!(recovered.starts(), 0);
    // The only actor run by the new incarnation saw the recovery first.
    assert_eq!(recovered.recoveries_seen(), vec![1]);
    assert_eq!(recovered.scenario_finishes(), 1);

    let context = runner.context().unwrap();
    assert_eq!(context.incarnation(NodeId(0)), Some(1));
    assert_eq!(context.failures().recovery_count(NodeId(0)), 1);
    assert_eq!(instance::<RecordingNode>(&runner, 1).unavailable(), vec![NodeId(0)]);

    let events = runner.events();
    let recovery = events
        .iter()
        .find(|e| e.kind == EventKind::ProcessRecovery)
        .unwrap();
    let last_start = events
        .iter()
        .find(|e| matches!(e.kind, EventKind::OperationStart { actor: 3, .. }))
        .unwrap();
    assert!(recovery.clock.happens_before(&last_start.clock));
}

/// Node 0 spins through three actors; node 1 poisons it while the first
/// one is still running.
fn poisoned_during_first_actor(mode: RecoveryMode) -> Runner {
    let options = options()
        .with_recovery_mode(mode)
        .node_type(2, true, RecordingNode::new);
    runner(
        options,
        vec![
            vec![
                recording("spin", &[400]),
                recording("spin", &[10]),
                recording("spin", &[10]),
            ],
            vec![recording("poison", &[0, 100])],
        ],
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crash_from_receive_loop_stops_main_loop() {
    let mut runner = poisoned_during_first_actor(RecoveryMode::NoRecoveries);

    let result = runner.run().await;
    let execution = result.execution().unwrap();
    assert_eq!(results(execution, 0), vec![ActorResult::NoResult; 3]);

    let crashed = last_instance::<RecordingNode>(&runner, 0);
    assert_eq!(crashed.received_from(NodeId(1)), vec![TestMessage::Poison]);
    assert_eq!(crashed.scenario_finishes(), 0);
    assert_eq!(runner.context().unwrap().node_state(NodeId(0)), NodeState::Terminated);

    let events = runner.events();
    assert_eq!(count(&events, 0, |k| *k == EventKind::NodeCrash), 1);
    // The crashed incarnation never started the second actor.
    assert_eq!(
        count(&events, 0, |k| matches!(k, EventKind::OperationStart { .. })),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn test_crash_from_receive_loop_hands_actors_to_recovery() {
    let mut runner = poisoned_during_first_actor(RecoveryMode::AllNodesRecover);

    let result = runner.run().await;
    let execution = result.execution().unwrap();
    assert_eq!(
        results(execution, 0),
        vec![
            ActorResult::NoResult,
            ActorResult::Value(json!(1)),
            ActorResult::Value(json!(1))
        ]
    );

    let recovered = instance::<RecordingNode>(&runner, 0);
    assert_eq!(recovered.recoveries(), 1);
    assert_eq!(recovered.scenario_finishes(), 1);
    assert_eq!(runner.context().unwrap().incarnation(NodeId(0)), Some(1));

    let events = runner.events();
    assert_eq!(count(&events, 0, |k| *k == EventKind::NodeCrash), 1);
    for actor in 0..3 {
        assert_eq!(
            count(&events, 0, |k| matches!(
                k,
                EventKind::OperationStart { actor: started, .. } if *started == actor
            )),
            1,
            "actor {} started more than once",
            actor
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crash_from_failure_loop_hands_actors_to_recovery() {
    let options = options()
        .with_recovery_mode(RecoveryMode::AllNodesRecover)
        .node_type(2, true, RecordingNode::new);
    let mut runner = runner(
        options,
        vec![
            vec![
                recording("fragile", &[]),
                recording("spin", &[400]),
                recording("spin", &[10]),
            ],
            vec![recording("spin", &[100]), recording("crash", &[])],
        ],
    );

    let result = runner.run().await;
    let execution = result.execution().unwrap();
    assert_eq!(
        results(execution, 0),
        vec![
            ActorResult::Void,
            ActorResult::NoResult,
            ActorResult::Value(json!(1))
        ]
    );

    let recovered = instance::<RecordingNode>(&runner, 0);
    assert_eq!(recovered.scenario_finishes(), 1);
    let events = runner.events();
    assert_eq!(count(&events, 0, |k| *k == EventKind::NodeCrash), 1);
    assert_eq!(
        count(&events, 0, |k| *k == EventKind::CrashNotification { failed: NodeId(1) }),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crashed_node_handles_no_more_messages() {
    let options = options().node_type(2, true, RecordingNode::new);
    let mut runner = runner(
        options,
        vec![
            vec![noop_recording()],
            vec![
                recording("send", &[0, 10]),
                recording("poison", &[0, 0]),
                // Queued behind the poison on the same channel.
                recording("send", &[0, 10]),
                recording("await_unavailable", &[]),
                recording("send", &[0, 5]),
            ],
        ],
    );

    let result = runner.run().await;
    assert!(result.is_completed(), "{}", result);

    let crashed = last_instance::<RecordingNode>(&runner, 0);
    let mut expected: Vec<_> = (0..10).map(TestMessage::Seq).collect();
    expected.push(TestMessage::Poison);
    assert_eq!(crashed.received_from(NodeId(1)), expected);
    assert_eq!(crashed.received().len(), 11);

    let events = runner.events();
    let crash = events
        .iter()
        .position(|e| e.node == NodeId(0) && e.kind == EventKind::NodeCrash)
        .unwrap();
    assert_eq!(events[crash].state.as_deref(), Some("received=11"));
    assert!(!events[crash..]
        .iter()
        .any(|e| e.node == NodeId(0) && matches!(e.kind, EventKind::MessageReceived { .. })));
    assert_eq!(
        instance::<RecordingNode>(&runner, 1).unavailable(),
        vec![NodeId(0)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_recovery_recovers_some_nodes() {
    let options = options()
        .with_recovery_mode(RecoveryMode::Mixed)
        .node_type(6, true, RecordingNode::new);
    let actors = vec![
        recording("append", &[1]),
        recording("crash", &[]),
        recording("append", &[2]),
    ];
    let mut runner = runner(options, vec![actors; 6]);

    let (mut recovered, mut terminated) = (0, 0);
    for _ in 0..10 {
        let result = runner.run().await;
        let execution = result.execution().unwrap();
        let context = runner.context().unwrap();
        for node in 0..6 {
            let state = context.node_state(NodeId(node));
            let last = if state == NodeState::Terminated {
                terminated += 1;
                assert_eq!(context.incarnation(NodeId(node)), Some(0));
                ActorResult::NoResult
            } else {
                recovered += 1;
                assert_eq!(state, NodeState::Completed);
                assert_eq!(context.incarnation(NodeId(node)), Some(1));
                ActorResult::Value(json!(2))
            };
            assert_eq!(
                results(execution, node),
                vec![ActorResult::Value(json!(1)), ActorResult::NoResult, last]
            );
        }
    }
    assert!(recovered > 0, "no node recovered");
    assert!(terminated > 0, "no node was terminated");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_blocked_main_loop_is_a_deadlock() {
    let options = options()
        .with_timeout(Duration::from_millis(200))
        .node_type(2, false, WaitingNode::new);
    let mut runner = runner(options, vec![vec![waiting("wait")], vec![waiting("noop")]]);

    let result = runner.run().await;
    let InvocationResult::Deadlock { tasks, nodes, .. } = &result else {
        panic!("expected a deadlock, got {}", result);
    };
    assert!(tasks
        .iter()
        .any(|task| task.node == NodeId(0) && task.kind == TaskKind::Main));
    assert!(!tasks
        .iter()
        .any(|task| task.node == NodeId(1) && task.kind == TaskKind::Main));
    assert_eq!(nodes[0], NodeState::Running);
    assert_eq!(nodes[1], NodeState::Completed);
    assert!(result.to_string().starts_with("Deadlock"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_blocking_actor_is_suspended_at_quiescence() {
    let options = options().node_type(1, false, WaitingNode::new);
    let mut runner = runner(options, vec![vec![waiting("noop"), waiting("wait").blocking()]]);

    let result = runner.run().await;
    let execution = result.execution().expect("blocking actors do not deadlock");
    assert_eq!(
        results(execution, 0),
        vec![ActorResult::Void, ActorResult::Suspended]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handled_exception_becomes_a_result() {
    let options = options().node_type(1, false, FailingNode::new);
    let mut runner = runner(
        options,
        vec![vec![
            failing("fail", vec![]).with_handled("IllegalState"),
            failing("value", vec![json!(4)]),
        ]],
    );

    let result = runner.run().await;
    assert_eq!(
        results(result.execution().unwrap(), 0),
        vec![
            ActorResult::Exception("IllegalState".into()),
            ActorResult::Value(json!(4))
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unhandled_exception_aborts_invocation() {
    let options = options().node_type(2, false, FailingNode::new);
    let mut runner = runner(
        options,
        vec![vec![failing("value", vec![json!(1)])], vec![failing("fail", vec![])]],
    );

    match runner.run().await {
        InvocationResult::UnexpectedException { node, error } => {
            assert_eq!(node, NodeId(1));
            assert_eq!(error.kind(), Some("IllegalState"));
        }
        other => panic!("expected an unexpected exception, got {}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panic_is_reported_as_unexpected_exception() {
    let options = options().node_type(1, false, FailingNode::new);
    let mut runner = runner(options, vec![vec![failing("panic", vec![])]]);

    match runner.run().await {
        InvocationResult::UnexpectedException {
            node,
            error: NodeError::Panic(message),
        } => {
            assert_eq!(node, NodeId(0));
            assert!(message.contains("operation panicked"));
        }
        other => panic!("expected a panic, got {}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_validation_failure_reports_reduced_scenario() {
    let options = options()
        .node_type(2, false, RecordingNode::new)
        .validation_hook::<RecordingNode, _>("nothing_received", |node| {
            if node.received().is_empty() {
                Ok(())
            } else {
                Err(format!("received {} messages", node.received().len()))
            }
        });
    let scenario = ExecutionScenario {
        init: vec![noop_recording()],
        parallel: vec![vec![recording("send", &[1, 2])], vec![noop_recording()]],
        post: vec![noop_recording()],
    };
    let mut runner = DistributedRunner::new(options, scenario).unwrap();

    match runner.run().await {
        InvocationResult::ValidationFailure {
            scenario,
            hook,
            node,
            message,
        } => {
            assert_eq!(hook, "nothing_received");
            assert_eq!(node, NodeId(1));
            assert_eq!(message, "received 2 messages");
            assert!(scenario.post.is_empty());
            assert_eq!(scenario.init.len(), 1);
            assert_eq!(scenario.parallel_actors(), 2);
        }
        other => panic!("expected a validation failure, got {}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_invocation_log_is_stored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.txt");
    let options = options()
        .with_timeout(Duration::from_millis(200))
        .store_logs_for_failed_scenario(&path)
        .node_type(1, false, WaitingNode::new);
    let mut runner = runner(options, vec![vec![waiting("noop"), waiting("wait")]]);

    let result = runner.run().await;
    assert!(matches!(result, InvocationResult::Deadlock { .. }));
    assert!(runner.store_events_to_file(&result.to_string()).unwrap());

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("Deadlock"));
    assert!(text.contains("\n\n0 # OperationStart(actor=0, noop()) clock=[1]"));
    assert!(text.contains("0 # OperationStart(actor=1, wait()) clock=[2]"));
}
