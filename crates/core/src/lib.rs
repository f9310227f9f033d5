//! Core abstractions for faultline.
//!
//! This crate defines the contract between the simulation engine and the
//! algorithm under test:
//!
//! - [`Node`] - hooks implemented by the algorithm
//! - [`Environment`] - capabilities handed to the algorithm
//! - [`OperationRegistry`] / [`Actor`] / [`ExecutionScenario`] - what each
//!   node runs
//! - [`DistributedOptions`] - network, failure and recovery configuration
//! - [`Verifier`] - seam to the external consistency checker
//!
//! It contains no runtime: the engine lives in `faultline-simulation`.

mod config;
mod error;
mod scenario;
mod traits;
mod verifier;

pub use config::{
    DistributedOptions, MessageOrder, NodeFactory, NodeTypeInfo, NodeTypeRegistration,
    PartitionPredicate, RecoveryMode, ValidationHook, DEFAULT_INVOCATIONS, DEFAULT_TIMEOUT,
};
pub use error::{ConfigError, NodeError};
pub use scenario::{Actor, ExecutionScenario, OperationFn, OperationFuture, OperationRegistry};
pub use traits::{Environment, Node, NodeInstance, Payload};
pub use verifier::Verifier;

// Re-exported so node implementations need only this crate.
pub use async_trait::async_trait;
pub use faultline_types::{
    ActorResult, ExecutionResult, MessageId, NodeId, ResultWithClock, VectorClock,
};
