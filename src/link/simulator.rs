//! Emulated controller board.
//!
//! Speaks the same `PR+` protocol as the firmware over an in-memory pipe, so the whole
//! bench can run without hardware (`pid-bench run --dry-run`) and end-to-end tests can
//! drive real sessions through a [`SerialLink`](super::SerialLink).
//!
//! The board runs the firmware's control loop every sample period:
//! 1. integrate the motor model over the elapsed period
//! 2. read the integer encoder count and derive the shaft speed in rad/s
//! 3. run the PID on speed (velocity servo) or on encoder ticks (position servo)
//! 4. print `PR+speed=<value>` when logging is enabled
//!
//! The motor is a first-order lag with a drive deadband and stiction, so a motor
//! holding position reports a speed of exactly `0.00`.

use super::serial::DynSerial;
use crate::protocol::COMMAND_PREFIX;
use std::f64::consts::PI;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Encoder pulses per motor revolution.
const PULSES_PER_REV: f64 = 48.0;
/// Gearbox reduction between motor and output shaft.
const GEAR_RATIO: f64 = 20.4;
/// Distance travelled per output shaft revolution, in position-servo units.
const DISTANCE_PER_REV: f64 = 0.8;
/// Largest drive command accepted by the motor driver.
const DRIVE_LIMIT: f64 = 400.0;

/// Steady-state shaft speed per unit of drive, in rad/s.
const MOTOR_GAIN: f64 = 0.1;
/// Motor time constant, in seconds.
const MOTOR_TAU: f64 = 0.05;
/// Drive commands below this magnitude do not turn the motor.
const DRIVE_DEADBAND: f64 = 20.0;
/// An undriven shaft slower than this stops dead.
const STICTION_SPEED: f64 = 0.5;

const TICKS_PER_RAD: f64 = PULSES_PER_REV * GEAR_RATIO / (2.0 * PI);

/// Firmware state machine, advanced by [`SimulatedBoard::tick`].
#[derive(Debug, Clone)]
pub struct SimulatedBoard {
    dt: f64,
    kp: f64,
    ki: f64,
    kd: f64,
    setpoint: f64,
    position_servo: bool,
    log: bool,
    integral: f64,
    previous_error: f64,
    drive: f64,
    shaft_speed: f64,
    angle_ticks: f64,
    encoder: i64,
    total_ticks: i64,
}

impl SimulatedBoard {
    /// Board running its control loop every `period`.
    pub fn new(period: Duration) -> Self {
        Self {
            dt: period.as_secs_f64(),
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            setpoint: 0.0,
            position_servo: false,
            log: false,
            integral: 0.0,
            previous_error: 0.0,
            drive: 0.0,
            shaft_speed: 0.0,
            angle_ticks: 0.0,
            encoder: 0,
            total_ticks: 0,
        }
    }

    /// Whether telemetry is being printed.
    pub fn is_logging(&self) -> bool {
        self.log
    }

    /// Encoder ticks accumulated since the last reset.
    pub fn total_ticks(&self) -> i64 {
        self.total_ticks
    }

    /// Handle one received line and return the acknowledgement, if any.
    ///
    /// Lines without the `PR+` prefix and unknown commands are ignored. Malformed numeric
    /// arguments read as zero.
    pub fn handle_command(&mut self, line: &str) -> Option<String> {
        let command = line.trim().strip_prefix(COMMAND_PREFIX)?;
        let (name, args) = command.split_once('=').unwrap_or((command, ""));
        let number = || args.trim().parse::<f64>().unwrap_or(0.0);
        let flag = || args.trim().parse::<i64>().is_ok_and(|v| v != 0);

        let reply = match name {
            "ping" => "pong".to_string(),
            "kp" => {
                self.kp = number();
                format!("Kp={:.2}", self.kp)
            }
            "ki" => {
                self.ki = number();
                format!("Ki={:.2}", self.ki)
            }
            "kd" => {
                self.kd = number();
                format!("Kd={:.2}", self.kd)
            }
            "consigne" => {
                self.setpoint = if self.position_servo {
                    number() * PULSES_PER_REV * GEAR_RATIO / DISTANCE_PER_REV
                } else {
                    number()
                };
                format!("consigne={:.2}", self.setpoint)
            }
            "log" => {
                self.log = flag();
                format!("log={}", u8::from(self.log))
            }
            "asservissement_position" => {
                self.position_servo = flag();
                format!("asservissement_position={}", u8::from(self.position_servo))
            }
            "reset" => {
                self.reset();
                "reset".to_string()
            }
            other => {
                debug!(command = other, "Simulator ignoring unknown command");
                return None;
            }
        };
        Some(format!("{COMMAND_PREFIX}{reply}"))
    }

    fn reset(&mut self) {
        self.setpoint = 0.0;
        self.integral = 0.0;
        self.previous_error = 0.0;
        self.drive = 0.0;
        self.shaft_speed = 0.0;
        self.total_ticks = 0;
    }

    /// Run one sample period and return the telemetry line when logging.
    pub fn tick(&mut self) -> Option<String> {
        self.advance_motor();

        let count = self.angle_ticks.floor() as i64;
        let delta = count - self.encoder;
        self.encoder = count;
        self.total_ticks += delta;
        let speed = delta as f64 / TICKS_PER_RAD / self.dt;

        let error = if self.position_servo {
            self.setpoint - self.total_ticks as f64
        } else {
            self.setpoint - speed
        };
        let derivative = self.kd * (error - self.previous_error) / self.dt;
        let mut drive = self.kp * error + self.integral + derivative;
        self.integral += self.ki * self.dt * error;
        self.previous_error = error;

        if self.setpoint == 0.0 {
            drive = 0.0;
        }
        self.drive = drive.clamp(-DRIVE_LIMIT, DRIVE_LIMIT);

        self.log
            .then(|| format!("{COMMAND_PREFIX}speed={speed:.2}"))
    }

    fn advance_motor(&mut self) {
        let target = if self.drive.abs() < DRIVE_DEADBAND {
            0.0
        } else {
            MOTOR_GAIN * self.drive
        };
        self.shaft_speed += (target - self.shaft_speed) * (self.dt / MOTOR_TAU).min(1.0);
        if target == 0.0 && self.shaft_speed.abs() < STICTION_SPEED {
            self.shaft_speed = 0.0;
        }
        self.angle_ticks += self.shaft_speed * self.dt * TICKS_PER_RAD;
    }
}

/// Start an emulated board and return the host end of its pipe.
///
/// Must be called from within a Tokio runtime. The board stops when the host end is
/// dropped.
pub fn spawn_simulated_device(period: Duration) -> DynSerial {
    let (host, device) = tokio::io::duplex(4096);
    tokio::spawn(run_board(SimulatedBoard::new(period), device, period));
    Box::new(host)
}

async fn run_board(mut board: SimulatedBoard, io: tokio::io::DuplexStream, period: Duration) {
    let (read_half, mut write_half) = tokio::io::split(io);
    let mut lines = BufReader::new(read_half).lines();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let output = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    trace!(%line, "Simulator received");
                    board.handle_command(&line)
                }
                Ok(None) | Err(_) => break,
            },
            _ = ticker.tick() => board.tick(),
        };

        if let Some(output) = output {
            if write_half
                .write_all(format!("{output}\r\n").as_bytes())
                .await
                .is_err()
            {
                break;
            }
        }
    }
    debug!("Simulated board stopped");
}
