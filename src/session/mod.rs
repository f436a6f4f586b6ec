//! Test-session engine.
//!
//! A [`TestSession`] is one configure → run → collect → terminate cycle for a chosen
//! gain set. The [`SessionController`] owns the single active session and the history of
//! finished ones, routes device lines to the active session, and drives the command
//! sequence when the operator starts a test.
//!
//! # Execution contexts
//!
//! ```text
//! console task                     SessionController                 link dispatcher task
//!      │ request_test                    │                                    │
//!      │────────────────────────────────▶│ activate + start()                 │
//!      │                                 │── PR+kp … PR+consigne ──▶ device   │
//!      │   (awaiting state watch)        │                                    │ on_line("speed=…")
//!      │                                 │◀───────────────────────────────────│
//!      │                                 │ add_sample → predicate fires       │
//!      │                                 │── PR+log=0, PR+reset ──▶ device    │
//!      │◀──────── Completed ─────────────│                                    │
//!      │ file into history               │                                    │
//! ```
//!
//! Only the dispatcher task writes samples; the console task only observes the state
//! watch until the session is terminal, then reads the series.

mod controller;
mod mode;
mod test_session;

pub use controller::SessionController;
pub use mode::ControlMode;
pub use test_session::TestSession;

use crate::error::BenchError;
use std::fmt;

/// Proportional, integral and derivative gains of the control loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gains {
    /// Proportional gain
    pub kp: f64,
    /// Integral gain
    pub ki: f64,
    /// Derivative gain
    pub kd: f64,
}

impl Gains {
    /// Bundle three gains.
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }
}

impl fmt::Display for Gains {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kp={}, ki={}, kd={}", self.kp, self.ki, self.kd)
    }
}

/// One telemetry point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Milliseconds since the first sample of the test
    pub t_ms: u64,
    /// Reported value (speed in rad/s)
    pub value: f64,
}

/// Why a session stopped without its termination predicate firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The device did not settle within the configured timeout.
    Timeout,
    /// The operator cancelled the test.
    Cancelled,
    /// The configuration sequence could not be sent.
    LinkFailure,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Timeout => write!(f, "timed out"),
            AbortReason::Cancelled => write!(f, "cancelled"),
            AbortReason::LinkFailure => write!(f, "link failure"),
        }
    }
}

/// Lifecycle of a session: `Created → Running → {Completed | Aborted}`.
///
/// Transitions are monotonic; a terminal session is never resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Built but not started.
    Created,
    /// Configuration sent, collecting samples.
    Running,
    /// Termination predicate fired.
    Completed,
    /// Stopped early.
    Aborted(AbortReason),
}

impl SessionState {
    /// `Completed` or `Aborted`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Created => write!(f, "created"),
            SessionState::Running => write!(f, "running"),
            SessionState::Completed => write!(f, "completed"),
            SessionState::Aborted(reason) => write!(f, "aborted ({reason})"),
        }
    }
}

/// What `add_sample` did with a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Session not running or past its cutoff; nothing appended.
    Ignored,
    /// Appended, test still running.
    Appended,
    /// Appended, and the termination predicate fired.
    Completed,
}

pub(crate) fn abort_error(id: u64, reason: AbortReason, timeout: std::time::Duration) -> BenchError {
    match reason {
        AbortReason::Timeout => BenchError::Timeout { id, timeout },
        AbortReason::Cancelled => BenchError::Cancelled(id),
        AbortReason::LinkFailure => {
            BenchError::Link(format!("Test #{id} stopped: configuration could not be sent"))
        }
    }
}
