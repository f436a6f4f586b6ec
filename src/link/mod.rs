//! Line-oriented link to the controller board.
//!
//! The session engine only depends on the [`Link`] contract: send one command line, and
//! drop whatever input is buffered but not yet handled. Received lines travel the other
//! way, delivered one at a time to a [`LineHandler`] on the link's own background task.
//!
//! - [`SerialLink`]: production implementation over any async byte stream
//!   (a `tokio-serial` port, or an in-memory pipe in tests).
//! - [`MockLink`]: records sent lines without any I/O.
//! - [`simulator`]: an emulated controller board for `--dry-run` and end-to-end tests.

pub mod mock;
pub mod serial;
pub mod simulator;

pub use mock::MockLink;
pub use serial::{Inbound, SerialLink, SerialPortIO};

use crate::error::BenchResult;
use crate::protocol::DeviceCommand;
use async_trait::async_trait;

/// Outbound half of the device connection.
#[async_trait]
pub trait Link: Send + Sync {
    /// Send one line; the link appends its line terminator.
    async fn send(&self, line: &str) -> BenchResult<()>;

    /// Drop input that was received but not yet delivered to the handler.
    async fn discard_input(&self) -> BenchResult<()>;

    /// Human readable description for logs.
    fn describe(&self) -> String;

    /// Send a typed protocol command.
    async fn command(&self, command: DeviceCommand) -> BenchResult<()> {
        self.send(&command.to_string()).await
    }
}

/// Receives every line read from the device, in order.
#[async_trait]
pub trait LineHandler: Send + Sync {
    /// Called once per received line on the link's receiver task.
    async fn on_line(&self, line: String);
}
