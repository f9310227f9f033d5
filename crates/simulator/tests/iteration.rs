use faultline_core::{ConfigError, DistributedOptions, ExecutionScenario, RecoveryMode};
use faultline_simulation::InvocationResult;
use faultline_simulator::{demo, Simulator, SimulatorError};
use faultline_test_helpers::{AcceptingVerifier, RecordingNode, RejectingVerifier, TestMessage, WaitingNode};
use std::time::Duration;
use tracing_test::traced_test;

const SEED: u64 = 42;

fn recording_scenario() -> ExecutionScenario {
    let noop = RecordingNode::operations().actor("noop", vec![]).unwrap();
    ExecutionScenario::parallel(vec![vec![noop.clone()], vec![noop]])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn test_demo_passes_on_reliable_network() {
    let options = demo::options(2, 3)
        .with_seed(SEED)
        .with_invocations_per_iteration(20);
    let mut simulator =
        Simulator::new(options, demo::scenario(3, 4).unwrap(), demo::PingVerifier).unwrap();

    let report = simulator.run_iteration().await.unwrap();
    assert!(report.is_success(), "{}", report);
    assert_eq!(report.invocations, 20);
    assert_eq!(report.crashes, 0);
    assert_eq!(report.seed, SEED);
    assert!(report.events > 0);
    assert_eq!(simulator.runner().invocations(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_demo_survives_crashes_with_recovery() {
    let options = demo::options(2, 3)
        .with_seed(SEED)
        .with_invocations_per_iteration(30)
        .with_max_failed_nodes(|_| 1)
        .with_recovery_mode(RecoveryMode::AllNodesRecover);
    let mut simulator =
        Simulator::new(options, demo::scenario(3, 4).unwrap(), demo::PingVerifier).unwrap();

    let report = simulator.run_iteration().await.unwrap();
    assert!(report.is_success(), "{}", report);
    assert!(report.crashes > 0);
    assert_eq!(report.recoveries, report.crashes);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rejected_results_stop_iteration_and_store_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("failure.txt");
    let options = DistributedOptions::<TestMessage, u64>::new()
        .with_seed(SEED)
        .with_invocations_per_iteration(10)
        .store_logs_for_failed_scenario(&path)
        .node_type(2, false, RecordingNode::new);
    let mut simulator = Simulator::new(options, recording_scenario(), RejectingVerifier).unwrap();

    let report = simulator.run_iteration().await.unwrap();
    assert_eq!(report.invocations, 1);
    assert!(report.log_stored);
    let failure = report.failure.as_ref().unwrap();
    assert!(failure.is_incorrect_results());
    assert_eq!(failure.invocation, 1);

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("Invalid execution results on invocation 1"));
    assert!(text.contains("0 # OperationStart(actor=0, noop())"));
    assert!(text.contains("1 # OperationStart(actor=0, noop())"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deadlock_stops_iteration() {
    let wait = WaitingNode::operations().actor("wait", vec![]).unwrap();
    let options = DistributedOptions::<TestMessage, u64>::new()
        .with_seed(SEED)
        .with_invocations_per_iteration(5)
        .with_timeout(Duration::from_millis(100))
        .node_type(1, false, WaitingNode::new);
    let mut simulator = Simulator::new(
        options,
        ExecutionScenario::parallel(vec![vec![wait]]),
        AcceptingVerifier,
    )
    .unwrap();

    let report = simulator.run_iteration().await.unwrap();
    assert_eq!(report.invocations, 1);
    assert!(!report.log_stored);
    let failure = report.failure.unwrap();
    assert!(matches!(failure.outcome, InvocationResult::Deadlock { .. }));
}

#[test]
fn test_invalid_configuration_is_reported() {
    let options = DistributedOptions::<TestMessage, u64>::new();
    let result = Simulator::new(options, recording_scenario(), AcceptingVerifier);
    assert!(matches!(
        result,
        Err(SimulatorError::Config(ConfigError::NoNodeTypes))
    ));
}
