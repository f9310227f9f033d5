//! Iteration driver.

use crate::error::SimulatorError;
use crate::report::{IterationFailure, IterationReport};
use faultline_core::{DistributedOptions, ExecutionScenario, Payload, Verifier};
use faultline_simulation::{DistributedRunner, InvocationResult};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs one scenario repeatedly and verifies every completed invocation.
///
/// Fault injectors live as long as the simulator, so later invocations use
/// the message counts observed by earlier ones to place crashes. The driver
/// does no search of its own: it only repeats invocations.
pub struct Simulator<M: Payload, L: Payload> {
    runner: DistributedRunner<M, L>,
    verifier: Box<dyn Verifier>,
}

impl<M: Payload, L: Payload> Simulator<M, L> {
    /// Validate the configuration and build the simulator.
    pub fn new(
        options: DistributedOptions<M, L>,
        scenario: ExecutionScenario,
        verifier: impl Verifier + 'static,
    ) -> Result<Self, SimulatorError> {
        let runner = DistributedRunner::new(options, scenario)?;
        Ok(Self {
            runner,
            verifier: Box::new(verifier),
        })
    }

    /// The underlying invocation runner.
    pub fn runner(&self) -> &DistributedRunner<M, L> {
        &self.runner
    }

    /// Run `invocations_per_iteration` invocations, stopping at the first
    /// failure.
    ///
    /// A failure is any outcome other than a completed invocation whose
    /// results the verifier accepts. Its event log is stored when a log file
    /// is configured.
    pub async fn run_iteration(&mut self) -> Result<IterationReport, SimulatorError> {
        let invocations = self.runner.options().invocations_per_iteration;
        let started = Instant::now();
        let mut report = IterationReport::new(self.runner.seed());
        info!(
            invocations,
            nodes = self.runner.number_of_nodes(),
            seed = self.runner.seed(),
            "Starting iteration"
        );

        for _ in 0..invocations {
            let outcome = self.runner.run().await;
            report.invocations += 1;
            if let Some(context) = self.runner.context() {
                let failures = context.failures();
                report.crashes += u64::from(failures.total_crashes());
                report.recoveries += self
                    .runner
                    .resolver()
                    .nodes()
                    .map(|node| u64::from(failures.recovery_count(node)))
                    .sum::<u64>();
                report.events += context.events().len() as u64;
            }

            let passed = match &outcome {
                InvocationResult::Completed(result) => {
                    self.verifier.verify(self.runner.scenario(), result)
                }
                _ => false,
            };
            if passed {
                debug!(invocation = self.runner.invocations(), "Invocation passed");
                continue;
            }

            let failure = IterationFailure {
                invocation: self.runner.invocations(),
                scenario: self.runner.scenario().clone(),
                outcome,
            };
            warn!(
                invocation = failure.invocation,
                incorrect_results = failure.is_incorrect_results(),
                "Invocation failed"
            );
            report.log_stored = self.runner.store_events_to_file(&failure.to_string())?;
            report.failure = Some(failure);
            break;
        }

        report.elapsed = started.elapsed();
        info!(
            invocations = report.invocations,
            crashes = report.crashes,
            recoveries = report.recoveries,
            passed = report.is_success(),
            "Iteration finished"
        );
        Ok(report)
    }
}
