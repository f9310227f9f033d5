//! Faultline Simulator
//!
//! Repeats invocations of one scenario on top of the simulation engine and
//! hands every completed invocation to a [`Verifier`](faultline_core::Verifier).
//!
//! # Architecture
//!
//! The simulator builds on `faultline-simulation` to provide:
//!
//! - **Iteration driver**: runs `invocations_per_iteration` invocations,
//!   stopping at the first failure and storing its event log
//! - **Reports**: crash, recovery and event totals per iteration
//! - **Demo**: a ping/echo system used by the `faultline-sim` binary
//!
//! # Example
//!
//! ```ignore
//! use faultline_simulator::{demo, Simulator};
//!
//! let options = demo::options(2, 3).with_invocations_per_iteration(100);
//! let mut simulator = Simulator::new(options, demo::scenario(3, 4), demo::PingVerifier)?;
//! let report = simulator.run_iteration().await?;
//!
//! assert!(report.is_success());
//! ```

pub mod demo;
mod error;
mod report;
mod runner;

pub use error::SimulatorError;
pub use report::{IterationFailure, IterationReport};
pub use runner::Simulator;
