//! Seam to the external consistency verifier.

use crate::ExecutionScenario;
use faultline_types::ExecutionResult;

/// Checks a completed invocation against a sequential specification.
///
/// The engine only produces the causally stamped result trace; deciding
/// whether it is linearizable (or satisfies any other consistency model)
/// is the verifier's job.
pub trait Verifier: Send + Sync {
    /// Whether `result` is a correct outcome of `scenario`.
    fn verify(&self, scenario: &ExecutionScenario, result: &ExecutionResult) -> bool;
}
