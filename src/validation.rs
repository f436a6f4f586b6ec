//! Validation of operator input typed at the console.
//!
//! Every function returns [`BenchError::InvalidInput`] naming the offending field, so the
//! console can report it and prompt again without touching any state.

use crate::error::{BenchError, BenchResult};
use crate::session::ControlMode;

/// Parses a finite floating-point value, or returns `default` for blank input.
///
/// # Arguments
///
/// * `field` - Name used in the error message.
/// * `input` - The raw text typed by the operator.
/// * `default` - Value used when `input` is blank.
pub fn parse_number(field: &str, input: &str, default: f64) -> BenchResult<f64> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(default);
    }
    match input.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(BenchError::InvalidInput(format!(
            "{field} must be a number, got '{input}'"
        ))),
    }
}

/// Parses a control mode (`v` or `p`), or returns `default` for blank input.
pub fn parse_mode(input: &str, default: ControlMode) -> BenchResult<ControlMode> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(default);
    }
    input.parse()
}

/// Parses a history index.
pub fn parse_index(input: &str) -> BenchResult<usize> {
    let input = input.trim();
    input
        .parse::<usize>()
        .map_err(|_| BenchError::InvalidInput(format!("index must be a whole number, got '{input}'")))
}
