//! Distributed execution simulation engine.
//!
//! Runs one randomized trial (an invocation) of a distributed algorithm:
//! every node runs concurrently on the tokio runtime, talks over a simulated
//! network that may lose, duplicate, reorder and partition messages, and may
//! crash and recover when fault injection says so. Causality is tracked with
//! vector clocks; the invocation ends at quiescence, on the first fatal
//! error, or at the timeout (reported as a deadlock).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  DistributedRunner                      │
//! │   options, AddressResolver, FaultInjector per node      │
//! │                                                         │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     SimulationContext (fresh per invocation)       │ │
//! │  │     clocks, node slots, EventLog, FailureInfo      │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     per node: main loop, receive loop per sender,  │ │
//! │  │     failure loop; under the node's cancel token    │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     MessageTransport: channel per ordered pair     │ │
//! │  │     TaskCounter: quiescence gate                   │ │
//! │  └────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod address_resolver;
mod context;
mod environment;
mod event_log;
mod execution;
mod failure_info;
mod fault_injector;
mod node_tasks;
mod result;
mod runner;
mod task_counter;
mod task_registry;
mod transport;

pub use address_resolver::AddressResolver;
pub use context::{NodeState, SimulationContext};
pub use environment::EnvironmentImpl;
pub use event_log::{Event, EventKind, EventLog};
pub use failure_info::FailureInfo;
pub use fault_injector::{
    FaultConfig, FaultInjector, CONTEXT_SWITCH_PROBABILITY, MESSAGE_SENT_PROBABILITY,
    MESSAGE_SINGLE_DELIVERY_PROBABILITY, NODE_RECOVERY_PROBABILITY,
};
pub use result::InvocationResult;
pub use runner::DistributedRunner;
pub use task_counter::{TaskCounter, TaskGuard};
pub use task_registry::{TaskHandle, TaskInfo, TaskKind, TaskRegistry};
pub use transport::{Delivery, Envelope, MessageTransport};
