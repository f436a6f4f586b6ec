use crate::config::SessionSettings;
use crate::error::BenchResult;
use crate::link::Link;
use crate::protocol::DeviceCommand;
use crate::session::{AbortReason, ControlMode, Gains, Sample, SampleOutcome, SessionState};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// One calibration run for a gain set.
///
/// Configuration is fixed at construction. The series is written only by the link's
/// receiver task through [`TestSession::add_sample`]; the state is published on a watch
/// channel so the task that called [`TestSession::start`] can await the terminal state.
pub struct TestSession {
    id: u64,
    mode: ControlMode,
    gains: Gains,
    setpoint: f64,
    settings: SessionSettings,
    link: Arc<dyn Link>,
    data: Mutex<SessionData>,
    state_tx: watch::Sender<SessionState>,
}

struct SessionData {
    state: SessionState,
    samples: Vec<Sample>,
    started_at: Option<DateTime<Local>>,
    finished_at: Option<DateTime<Local>>,
}

impl TestSession {
    /// Build a session in the `Created` state.
    pub fn new(
        id: u64,
        mode: ControlMode,
        gains: Gains,
        setpoint: f64,
        settings: SessionSettings,
        link: Arc<dyn Link>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Created);
        Self {
            id,
            mode,
            gains,
            setpoint,
            settings,
            link,
            data: Mutex::new(SessionData {
                state: SessionState::Created,
                samples: Vec::new(),
                started_at: None,
                finished_at: None,
            }),
            state_tx,
        }
    }

    /// Session number, unique for the process lifetime
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Control mode
    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    /// Gains under test
    pub fn gains(&self) -> Gains {
        self.gains
    }

    /// Target value
    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    /// Published state.
    ///
    /// Lags the internal state while shutdown commands are in flight, so a session only
    /// reads as terminal once the device has been told to stop.
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Whether the published state is terminal.
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Copy of the captured series.
    pub fn samples(&self) -> Vec<Sample> {
        self.data.lock().samples.clone()
    }

    /// Number of captured samples.
    pub fn len(&self) -> usize {
        self.data.lock().samples.len()
    }

    /// Whether no sample has been captured yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wall-clock time at which the configuration was sent.
    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.data.lock().started_at
    }

    /// Wall-clock time at which the session became terminal.
    pub fn finished_at(&self) -> Option<DateTime<Local>> {
        self.data.lock().finished_at
    }

    /// Wall-clock time from start to the terminal state.
    pub fn elapsed(&self) -> Option<Duration> {
        let data = self.data.lock();
        (data.finished_at? - data.started_at?).to_std().ok()
    }

    /// Send the configuration sequence and wait for the terminal state.
    ///
    /// Calling this on a session that was already started is a no-op: it logs a warning
    /// and returns the current state without touching the device or the series.
    #[instrument(skip(self), fields(id = self.id, mode = %self.mode), err)]
    pub async fn start(&self) -> BenchResult<SessionState> {
        {
            let mut data = self.data.lock();
            if data.state != SessionState::Created {
                warn!(state = %data.state, "Test has already been run");
                return Ok(data.state);
            }
            data.state = SessionState::Running;
            data.started_at = Some(Local::now());
        }
        self.state_tx.send_replace(SessionState::Running);

        info!(gains = %self.gains, setpoint = self.setpoint, "Configuring controller");
        for command in self.mode.configuration_sequence(self.gains, self.setpoint) {
            if let Err(e) = self.link.command(command).await {
                self.abort(AbortReason::LinkFailure).await;
                return Err(e);
            }
        }

        Ok(self.wait_finished().await)
    }

    /// Wait until the published state is terminal.
    pub async fn wait_finished(&self) -> SessionState {
        let mut rx = self.state_tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state.is_terminal() {
                return state;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }

    /// Append one telemetry value and evaluate the termination predicate.
    ///
    /// Only the receiver task calls this. When the predicate fires, logging is disabled,
    /// the controller is reset, buffered input is discarded, and then the waiter in
    /// [`TestSession::start`] is released.
    pub async fn add_sample(&self, value: f64) -> SampleOutcome {
        {
            let mut data = self.data.lock();
            if data.state != SessionState::Running {
                return SampleOutcome::Ignored;
            }
            let len = data.samples.len();
            if !self.mode.accepts_sample(len, &self.settings) {
                return SampleOutcome::Ignored;
            }
            data.samples.push(Sample {
                t_ms: len as u64 * self.settings.sample_interval_ms,
                value,
            });
            if !self.mode.is_terminal(&data.samples, &self.settings) {
                return SampleOutcome::Appended;
            }
            data.state = SessionState::Completed;
            data.finished_at = Some(Local::now());
            info!(id = self.id, samples = data.samples.len(), "Test complete");
        }

        self.shut_down_device().await;
        self.state_tx.send_replace(SessionState::Completed);
        SampleOutcome::Completed
    }

    /// Stop a session before its predicate fires.
    ///
    /// Returns `false` if the session was already terminal.
    pub async fn abort(&self, reason: AbortReason) -> bool {
        {
            let mut data = self.data.lock();
            if data.state.is_terminal() {
                return false;
            }
            data.state = SessionState::Aborted(reason);
            data.finished_at = Some(Local::now());
        }
        warn!(id = self.id, %reason, "Test aborted");

        self.shut_down_device().await;
        self.state_tx.send_replace(SessionState::Aborted(reason));
        true
    }

    async fn shut_down_device(&self) {
        for command in [DeviceCommand::Log(false), DeviceCommand::Reset] {
            if let Err(e) = self.link.command(command).await {
                warn!(id = self.id, %command, error = %e, "Failed to send shutdown command");
            }
        }
        if let Err(e) = self.link.discard_input().await {
            debug!(id = self.id, error = %e, "Failed to discard buffered input");
        }
    }
}

impl fmt::Display for TestSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}({}, consigne={}) [{}, {} samples]",
            self.id,
            self.mode,
            self.gains,
            self.setpoint,
            self.state(),
            self.len()
        )
    }
}

impl fmt::Debug for TestSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSession")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("gains", &self.gains)
            .field("setpoint", &self.setpoint)
            .field("state", &self.state())
            .field("samples", &self.len())
            .field("link", &self.link.describe())
            .finish()
    }
}
