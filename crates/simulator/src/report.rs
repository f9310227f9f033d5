//! Iteration reports.

use faultline_core::ExecutionScenario;
use faultline_simulation::InvocationResult;
use std::fmt;
use std::time::Duration;

/// The invocation that ended an iteration.
#[derive(Debug, Clone)]
pub struct IterationFailure {
    /// 1-based number of the failing invocation.
    pub invocation: u64,
    /// The scenario that was run.
    pub scenario: ExecutionScenario,
    /// What the invocation produced. A `Completed` outcome here was rejected
    /// by the verifier.
    pub outcome: InvocationResult,
}

impl IterationFailure {
    /// Whether the invocation completed but its results were rejected.
    pub fn is_incorrect_results(&self) -> bool {
        self.outcome.is_completed()
    }
}

impl fmt::Display for IterationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_incorrect_results() {
            writeln!(f, "Invalid execution results on invocation {}", self.invocation)?;
            writeln!(f, "{}", self.scenario)?;
            write!(f, "{}", self.outcome)
        } else {
            writeln!(f, "Invocation {} failed", self.invocation)?;
            write!(f, "{}", self.outcome)
        }
    }
}

/// Summary of one iteration.
#[derive(Debug, Clone, Default)]
pub struct IterationReport {
    /// Base seed of the fault injectors.
    pub seed: u64,
    /// Invocations run, including a failing one.
    pub invocations: u64,
    /// Node crashes across all invocations.
    pub crashes: u64,
    /// Node recoveries across all invocations.
    pub recoveries: u64,
    /// Logged events across all invocations.
    pub events: u64,
    /// Wall-clock time of the iteration.
    pub elapsed: Duration,
    /// The first failure, if any.
    pub failure: Option<IterationFailure>,
    /// Whether the failing invocation's event log was written to a file.
    pub log_stored: bool,
}

impl IterationReport {
    pub(crate) fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    /// Whether every invocation passed.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Average wall-clock time per invocation.
    pub fn average_invocation_time(&self) -> Duration {
        match u32::try_from(self.invocations) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(invocations) => self.elapsed / invocations,
        }
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("{}", self);
    }
}

impl fmt::Display for IterationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Iteration Report ===")?;
        writeln!(f, "Seed:          {}", self.seed)?;
        writeln!(f, "Invocations:   {}", self.invocations)?;
        writeln!(f, "Crashes:       {}", self.crashes)?;
        writeln!(f, "Recoveries:    {}", self.recoveries)?;
        writeln!(f, "Events:        {}", self.events)?;
        writeln!(
            f,
            "Elapsed:       {:?} ({:?} per invocation)",
            self.elapsed,
            self.average_invocation_time()
        )?;
        match &self.failure {
            None => write!(f, "Result:        passed"),
            Some(failure) => {
                writeln!(f, "Result:        FAILED")?;
                write!(f, "{}", failure)
            }
        }
    }
}
