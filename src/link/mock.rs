//! Mock link for testing
//!
//! This link implements the [`Link`] trait without any hardware. It provides:
//! - A log of every line sent, for test verification
//! - A count of discard requests
//! - Controllable failure injection

use super::Link;
use crate::error::{BenchError, BenchResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Mock link for testing
///
/// # Example
///
/// ```
/// use pid_bench::link::{Link, MockLink};
///
/// # tokio_test_block_on(async {
/// let link = MockLink::new();
/// link.send("PR+ping").await.unwrap();
/// assert_eq!(link.sent(), vec!["PR+ping".to_string()]);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MockLink {
    sent: Mutex<Vec<String>>,
    discards: AtomicUsize,
    should_fail_next: AtomicBool,
}

impl MockLink {
    /// Create a new mock link
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `send` fail
    pub fn trigger_failure(&self) {
        self.should_fail_next.store(true, Ordering::SeqCst);
    }

    /// Copy of every line sent so far
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Number of times `line` was sent
    pub fn count(&self, line: &str) -> usize {
        self.sent.lock().iter().filter(|l| l.as_str() == line).count()
    }

    /// Number of `discard_input` calls
    pub fn discards(&self) -> usize {
        self.discards.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Link for MockLink {
    async fn send(&self, line: &str) -> BenchResult<()> {
        if self.should_fail_next.swap(false, Ordering::SeqCst) {
            return Err(BenchError::Link("Mock send failure".to_string()));
        }
        self.sent.lock().push(line.to_string());
        Ok(())
    }

    async fn discard_input(&self) -> BenchResult<()> {
        self.discards.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "MockLink".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DeviceCommand;

    #[tokio::test]
    async fn records_commands_in_order() {
        let link = MockLink::new();
        link.command(DeviceCommand::Log(true)).await.unwrap();
        link.command(DeviceCommand::Reset).await.unwrap();
        assert_eq!(link.sent(), vec!["PR+log=1", "PR+reset"]);
        assert_eq!(link.count("PR+reset"), 1);
    }

    #[tokio::test]
    async fn failure_is_one_shot() {
        let link = MockLink::new();
        link.trigger_failure();
        assert!(link.send("PR+ping").await.is_err());
        assert!(link.send("PR+ping").await.is_ok());
        assert_eq!(link.sent().len(), 1);
    }

    #[tokio::test]
    async fn counts_discards() {
        let link = MockLink::new();
        link.discard_input().await.unwrap();
        link.discard_input().await.unwrap();
        assert_eq!(link.discards(), 2);
    }
}
