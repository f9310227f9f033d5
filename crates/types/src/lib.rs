//! Core data types for faultline.
//!
//! These types are shared by the engine and by anything that consumes its
//! output (verifiers, reporting). They are plain data with no async or
//! runtime dependencies.
//!
//! - [`NodeId`] / [`MessageId`] - identities
//! - [`VectorClock`] - causal timestamps
//! - [`ActorResult`], [`ResultWithClock`], [`ExecutionResult`] - the result
//!   trace handed to a verifier

mod clock;
mod identifiers;
mod result;

pub use clock::VectorClock;
pub use identifiers::{MessageId, NodeId};
pub use result::{ActorResult, ExecutionResult, ResultWithClock};
