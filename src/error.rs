//! Custom error types for the bench tool.
//!
//! This module defines the primary error type, `BenchError`, used by the session engine,
//! the serial link and the console. Using the `thiserror` crate, it provides a centralized
//! and consistent way to classify what went wrong, from operator typos to a device that
//! never settles.
//!
//! ## Error Hierarchy
//!
//! - **`InvalidInput`**: Malformed numeric or enum input typed by the operator. The console
//!   reports it and prompts again; no state changes.
//! - **`TelemetryParse`**: A `speed=` line whose payload is not a number. The line is dropped
//!   with a diagnostic and the running test continues.
//! - **`SessionConflict`**: A new test was requested while another one is still running.
//! - **`IndexOutOfRange`**: `remove`/`show` addressed a history slot that does not exist.
//! - **`Timeout`** / **`Cancelled`**: The test was stopped before its termination predicate
//!   fired. Both leave the session in the `Aborted` state.
//! - **`Link`**: Transport failure while talking to the device.
//! - **`Config`**: Wraps errors from `figment` when loading the configuration.
//!
//! None of these is fatal to the interactive loop: the console prints the error and
//! carries on.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the bench error type.
pub type BenchResult<T> = std::result::Result<T, BenchError>;

/// Every failure the bench tool can report.
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Malformed telemetry payload '{payload}': {source}")]
    TelemetryParse {
        payload: String,
        #[source]
        source: std::num::ParseFloatError,
    },

    #[error("Test #{0} is still running; wait for it to finish before starting another")]
    SessionConflict(u64),

    #[error("No test at index {index} (history holds {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Test #{id} did not settle within {timeout:?}")]
    Timeout { id: u64, timeout: Duration },

    #[error("Test #{0} was cancelled")]
    Cancelled(u64),

    #[error("Link error: {0}")]
    Link(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial support not enabled. Rebuild with --features serial")]
    SerialFeatureDisabled,
}

impl BenchError {
    /// Whether the error comes from what the operator typed rather than from the bench.
    pub fn is_operator_error(&self) -> bool {
        matches!(
            self,
            BenchError::InvalidInput(_) | BenchError::IndexOutOfRange { .. }
        )
    }
}

impl From<figment::Error> for BenchError {
    fn from(value: figment::Error) -> Self {
        BenchError::Config(Box::new(value))
    }
}

impl From<anyhow::Error> for BenchError {
    fn from(value: anyhow::Error) -> Self {
        BenchError::Link(format!("{value:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_parse_error_names_payload() {
        let source = "abc".parse::<f64>().unwrap_err();
        let err = BenchError::TelemetryParse {
            payload: "abc".into(),
            source,
        };
        assert!(err.to_string().contains("'abc'"));
    }

    #[test]
    fn operator_errors_are_classified() {
        assert!(BenchError::InvalidInput("kp".into()).is_operator_error());
        assert!(BenchError::IndexOutOfRange { index: 3, len: 1 }.is_operator_error());
        assert!(!BenchError::SessionConflict(1).is_operator_error());
        assert!(!BenchError::Cancelled(2).is_operator_error());
    }

    #[test]
    fn anyhow_context_is_kept_in_link_error() {
        let err: BenchError = anyhow::anyhow!("port closed")
            .context("Serial write failed")
            .into();
        match err {
            BenchError::Link(msg) => {
                assert!(msg.contains("Serial write failed"));
                assert!(msg.contains("port closed"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
