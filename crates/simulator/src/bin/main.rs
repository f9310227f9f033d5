//! Faultline Simulator CLI
//!
//! Runs iterations of the ping/echo demo under configurable network and
//! failure conditions.

use clap::Parser;
use faultline_core::{MessageOrder, RecoveryMode};
use faultline_simulator::{demo, Simulator};
use faultline_types::NodeId;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "faultline-sim")]
#[command(about = "Run the ping/echo demo under simulated network faults")]
#[command(version)]
struct Cli {
    /// Number of echo servers
    #[arg(long, default_value = "2", value_parser = clap::value_parser!(u16).range(1..))]
    servers: u16,

    /// Number of ping clients (one scenario thread each)
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u16).range(1..))]
    clients: u16,

    /// Pings per client
    #[arg(long, default_value = "5")]
    pings: usize,

    /// Invocations per iteration
    #[arg(short, long, default_value = "1000")]
    invocations: usize,

    /// Lose messages with a fixed probability
    #[arg(long)]
    unreliable: bool,

    /// Delivery order per node pair (fifo, async)
    #[arg(long, default_value = "fifo", value_parser = parse_message_order)]
    order: MessageOrder,

    /// Deliver some messages twice
    #[arg(long)]
    duplication: bool,

    /// Expected number of failed nodes per invocation
    #[arg(long, default_value = "0")]
    max_failed: usize,

    /// Recovery policy for crashed nodes (none, all, mixed)
    #[arg(long, default_value = "none", value_parser = parse_recovery_mode)]
    recovery: RecoveryMode,

    /// Cut these nodes off from every other node (comma-separated indices)
    #[arg(long, value_delimiter = ',')]
    isolate: Vec<u32>,

    /// Invocation timeout in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// Store the event log of a failed invocation here
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Base seed for fault injection (random when omitted)
    #[arg(long)]
    seed: Option<u64>,
}

fn parse_message_order(s: &str) -> Result<MessageOrder, String> {
    match s.to_lowercase().as_str() {
        "fifo" => Ok(MessageOrder::Fifo),
        "async" | "asynchronous" => Ok(MessageOrder::Asynchronous),
        _ => Err(format!("Unknown message order: {}", s)),
    }
}

fn parse_recovery_mode(s: &str) -> Result<RecoveryMode, String> {
    match s.to_lowercase().as_str() {
        "none" | "no-recoveries" => Ok(RecoveryMode::NoRecoveries),
        "all" | "all-nodes-recover" => Ok(RecoveryMode::AllNodesRecover),
        "mixed" => Ok(RecoveryMode::Mixed),
        _ => Err(format!("Unknown recovery mode: {}", s)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let servers = usize::from(cli.servers);
    let clients = usize::from(cli.clients);
    let max_failed = cli.max_failed;

    let mut options = demo::options(servers, clients)
        .with_invocations_per_iteration(cli.invocations)
        .with_network_reliable(!cli.unreliable)
        .with_message_order(cli.order)
        .with_message_duplication(cli.duplication)
        .with_max_failed_nodes(move |nodes| max_failed.min(nodes))
        .with_recovery_mode(cli.recovery)
        .with_timeout(Duration::from_millis(cli.timeout_ms));
    if !cli.isolate.is_empty() {
        let isolated = cli.isolate.clone();
        options = options.with_network_partitions(move |from: NodeId, to: NodeId| {
            isolated.contains(&from.0) == isolated.contains(&to.0)
        });
    }
    if let Some(path) = cli.log_file {
        options = options.store_logs_for_failed_scenario(path);
    }
    if let Some(seed) = cli.seed {
        options = options.with_seed(seed);
    }

    let scenario = demo::scenario(clients, cli.pings)?;
    let mut simulator = Simulator::new(options, scenario, demo::PingVerifier)?;

    println!(
        "Running {} invocations on {} clients and {} servers...",
        cli.invocations, clients, servers
    );
    let report = simulator.run_iteration().await?;
    report.print();

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
