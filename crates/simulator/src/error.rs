//! Simulator errors.

use faultline_core::ConfigError;
use std::io;
use thiserror::Error;

/// Errors of the iteration driver.
#[derive(Debug, Error)]
pub enum SimulatorError {
    /// The options or scenario were rejected before any invocation ran.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Writing the event log of a failed invocation failed.
    #[error("failed to store event log: {0}")]
    Io(#[from] io::Error),
}
