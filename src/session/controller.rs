use crate::config::SessionSettings;
use crate::error::{BenchError, BenchResult};
use crate::link::{LineHandler, Link};
use crate::protocol::{self, DeviceCommand, DeviceLine};
use crate::session::{
    abort_error, AbortReason, ControlMode, Gains, SampleOutcome, SessionState, TestSession,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

/// Owns the active session and the history of finished ones.
///
/// The active slot is shared between the console task, which fills it in
/// [`SessionController::request_test`], and the link's receiver task, which feeds it
/// through [`SessionController::on_line`]. The history is only touched by the console
/// task.
pub struct SessionController {
    link: Arc<dyn Link>,
    settings: SessionSettings,
    active: Mutex<Option<Arc<TestSession>>>,
    history: Mutex<Vec<Arc<TestSession>>>,
    cancel: Mutex<Option<watch::Sender<bool>>>,
    next_id: AtomicU64,
    info_sink: Option<mpsc::UnboundedSender<String>>,
}

enum Wake {
    Finished(BenchResult<SessionState>),
    Expired,
    Cancelled,
}

impl SessionController {
    /// Create a controller sending commands through `link`.
    pub fn new(link: Arc<dyn Link>, settings: SessionSettings) -> Self {
        Self {
            link,
            settings,
            active: Mutex::new(None),
            history: Mutex::new(Vec::new()),
            cancel: Mutex::new(None),
            next_id: AtomicU64::new(1),
            info_sink: None,
        }
    }

    /// Forward informational device output to `sink` in addition to the log.
    pub fn with_info_sink(mut self, sink: mpsc::UnboundedSender<String>) -> Self {
        self.info_sink = Some(sink);
        self
    }

    /// The running session, if any.
    pub fn active(&self) -> Option<Arc<TestSession>> {
        self.active
            .lock()
            .as_ref()
            .filter(|session| !session.is_finished())
            .cloned()
    }

    /// Run one test to completion.
    ///
    /// Rejected with [`BenchError::SessionConflict`] while another test is running. The
    /// calling task awaits the session; it is released when the termination predicate
    /// fires, when the completion timeout expires, or when [`Self::cancel_active`] is
    /// called. In every case the session ends up in the history.
    #[instrument(skip(self), err)]
    pub async fn request_test(
        &self,
        mode: ControlMode,
        gains: Gains,
        setpoint: f64,
    ) -> BenchResult<Arc<TestSession>> {
        let (session, mut cancel_rx) = self.activate(mode, gains, setpoint)?;
        let timeout = self.settings.timeout();

        let wake = tokio::select! {
            result = session.start() => Wake::Finished(result),
            _ = expiry(timeout) => Wake::Expired,
            Ok(()) = cancel_rx.changed() => Wake::Cancelled,
        };

        let result = match wake {
            Wake::Finished(Ok(SessionState::Completed)) => Ok(()),
            Wake::Finished(Ok(state)) => match state {
                SessionState::Aborted(reason) => Err(self.abort_error(&session, reason)),
                other => Err(BenchError::Link(format!(
                    "Test #{} stopped in unexpected state {other}",
                    session.id()
                ))),
            },
            Wake::Finished(Err(e)) => Err(e),
            Wake::Expired => self.stop(&session, AbortReason::Timeout).await,
            Wake::Cancelled => self.stop(&session, AbortReason::Cancelled).await,
        };

        self.retire(&session);
        result.map(|()| session)
    }

    fn activate(
        &self,
        mode: ControlMode,
        gains: Gains,
        setpoint: f64,
    ) -> BenchResult<(Arc<TestSession>, watch::Receiver<bool>)> {
        let mut active = self.active.lock();
        if let Some(current) = active.as_ref().filter(|s| !s.is_finished()) {
            return Err(BenchError::SessionConflict(current.id()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(TestSession::new(
            id,
            mode,
            gains,
            setpoint,
            self.settings,
            self.link.clone(),
        ));
        *active = Some(session.clone());

        let (cancel_tx, cancel_rx) = watch::channel(false);
        *self.cancel.lock() = Some(cancel_tx);

        info!(id, %mode, %gains, setpoint, "Starting test");
        Ok((session, cancel_rx))
    }

    async fn stop(&self, session: &TestSession, reason: AbortReason) -> BenchResult<()> {
        if session.abort(reason).await {
            return Err(self.abort_error(session, reason));
        }
        // The predicate fired while we were waking up.
        match session.wait_finished().await {
            SessionState::Completed => Ok(()),
            SessionState::Aborted(reason) => Err(self.abort_error(session, reason)),
            other => Err(BenchError::Link(format!(
                "Test #{} stopped in unexpected state {other}",
                session.id()
            ))),
        }
    }

    fn abort_error(&self, session: &TestSession, reason: AbortReason) -> BenchError {
        abort_error(session.id(), reason, self.settings.completion_timeout)
    }

    fn retire(&self, session: &Arc<TestSession>) {
        self.clear_active(session);
        self.cancel.lock().take();
        self.history.lock().push(session.clone());
    }

    fn clear_active(&self, session: &Arc<TestSession>) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| Arc::ptr_eq(a, session)) {
            *active = None;
        }
    }

    /// Ask the running test to stop. Returns `false` when nothing is running.
    pub fn cancel_active(&self) -> bool {
        match self.cancel.lock().as_ref() {
            Some(cancel) => {
                cancel.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Route one line received from the device.
    pub async fn handle_line(&self, line: &str) {
        match protocol::parse_line(line) {
            Ok(DeviceLine::Telemetry(value)) => {
                let Some(session) = self.active() else {
                    debug!(value, "Telemetry received with no test running");
                    return;
                };
                if session.add_sample(value).await == SampleOutcome::Completed {
                    self.clear_active(&session);
                }
            }
            Ok(DeviceLine::Info(text)) => {
                info!(target: "device", "{text}");
                if let Some(sink) = &self.info_sink {
                    let _ = sink.send(text);
                }
            }
            Err(e) => warn!(error = %e, "Dropping telemetry line"),
        }
    }

    /// Ask the device to answer `pong`.
    pub async fn ping(&self) -> BenchResult<()> {
        self.link.command(DeviceCommand::Ping).await
    }

    /// Finished sessions, oldest first.
    pub fn list(&self) -> Vec<Arc<TestSession>> {
        self.history.lock().clone()
    }

    /// Finished session at `index`.
    pub fn get(&self, index: usize) -> BenchResult<Arc<TestSession>> {
        let history = self.history.lock();
        history
            .get(index)
            .cloned()
            .ok_or(BenchError::IndexOutOfRange {
                index,
                len: history.len(),
            })
    }

    /// Drop the finished session at `index`.
    pub fn remove(&self, index: usize) -> BenchResult<Arc<TestSession>> {
        let mut history = self.history.lock();
        if index >= history.len() {
            return Err(BenchError::IndexOutOfRange {
                index,
                len: history.len(),
            });
        }
        let removed = history.remove(index);
        info!(id = removed.id(), index, "Removed test");
        Ok(removed)
    }

    /// Drop every finished session. The running test, if any, is unaffected.
    pub fn clear(&self) -> usize {
        let mut history = self.history.lock();
        let removed = history.len();
        history.clear();
        info!(removed, "Cleared test history");
        removed
    }
}

#[async_trait]
impl LineHandler for SessionController {
    async fn on_line(&self, line: String) {
        self.handle_line(&line).await;
    }
}

async fn expiry(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}
