//! # PID Bench Core Library
//!
//! This crate drives calibration runs against a motor controller board over a serial
//! link: it pushes a gain set and a setpoint, records the speed telemetry the board
//! streams back, stops the run when the response has played out, and keeps every run for
//! comparison. The binary (`main.rs`) is a thin interactive frontend over this library.
//!
//! ## Crate Structure
//!
//! - **`config`**: Layered configuration (defaults, TOML file, `PID_BENCH_*` environment).
//! - **`console`**: The interactive prompt loop.
//! - **`error`**: The `BenchError` enum shared by every module.
//! - **`link`**: The `Link` contract, its serial implementation, a mock, and an emulated
//!   controller board.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`protocol`**: The `PR+` line protocol spoken by the firmware.
//! - **`report`**: Step-response figures and comparison tables.
//! - **`session`**: Test sessions, their termination rules, and the controller that
//!   serializes them.
//! - **`validation`**: Parsing of operator input.

pub mod config;
pub mod console;
pub mod error;
pub mod link;
pub mod logging;
pub mod protocol;
pub mod report;
pub mod session;
pub mod validation;
