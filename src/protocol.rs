//! `PR+` line protocol spoken by the motor controller firmware.
//!
//! Protocol Overview:
//! - Format: ASCII, one command or report per line
//! - Baud: 115200, 8N1, no flow control
//! - Command terminator: LF (\n)
//! - Commands: `PR+<name>` or `PR+<name>=<value>`
//! - Every command is acknowledged with an echo such as `PR+Kp=1.50`
//! - While logging is enabled the firmware prints `PR+speed=<value>` every sample period
//!
//! Only `speed=` reports carry telemetry; everything else the device prints (command
//! acknowledgements, `Motor fault`, `pong`) is informational text.

use crate::error::{BenchError, BenchResult};
use std::fmt;

/// Prefix carried by every command and report.
pub const COMMAND_PREFIX: &str = "PR+";

/// Key of the telemetry report.
pub const TELEMETRY_KEY: &str = "speed=";

/// A command understood by the firmware.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceCommand {
    /// Proportional gain.
    Kp(f64),
    /// Integral gain.
    Ki(f64),
    /// Derivative gain.
    Kd(f64),
    /// `true` servos on position, `false` on velocity.
    PositionServo(bool),
    /// Enable or disable telemetry streaming.
    Log(bool),
    /// Target value ("consigne").
    Setpoint(f64),
    /// Clear the controller state and stop the motor.
    Reset,
    /// Liveness check, answered with `PR+pong`.
    Ping,
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCommand::Kp(v) => write!(f, "{COMMAND_PREFIX}kp={v}"),
            DeviceCommand::Ki(v) => write!(f, "{COMMAND_PREFIX}ki={v}"),
            DeviceCommand::Kd(v) => write!(f, "{COMMAND_PREFIX}kd={v}"),
            DeviceCommand::PositionServo(on) => {
                write!(f, "{COMMAND_PREFIX}asservissement_position={}", u8::from(*on))
            }
            DeviceCommand::Log(on) => write!(f, "{COMMAND_PREFIX}log={}", u8::from(*on)),
            DeviceCommand::Setpoint(v) => write!(f, "{COMMAND_PREFIX}consigne={v}"),
            DeviceCommand::Reset => write!(f, "{COMMAND_PREFIX}reset"),
            DeviceCommand::Ping => write!(f, "{COMMAND_PREFIX}ping"),
        }
    }
}

/// Classification of one line received from the device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceLine {
    /// A `speed=<value>` report.
    Telemetry(f64),
    /// Anything else, with the command prefix stripped.
    Info(String),
}

/// Classify a received line.
///
/// The `PR+` prefix is optional so that both raw firmware output and lines from a link
/// that already strips the prefix are accepted. A `speed=` line with a non-numeric payload
/// is a [`BenchError::TelemetryParse`].
pub fn parse_line(raw: &str) -> BenchResult<DeviceLine> {
    let line = raw.trim();
    let body = line.strip_prefix(COMMAND_PREFIX).unwrap_or(line);

    match body.strip_prefix(TELEMETRY_KEY) {
        Some(payload) => payload
            .trim()
            .parse::<f64>()
            .map(DeviceLine::Telemetry)
            .map_err(|source| BenchError::TelemetryParse {
                payload: payload.to_string(),
                source,
            }),
        None => Ok(DeviceLine::Info(body.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_commands_with_prefix() {
        assert_eq!(DeviceCommand::Kp(1.5).to_string(), "PR+kp=1.5");
        assert_eq!(DeviceCommand::Ki(850.0).to_string(), "PR+ki=850");
        assert_eq!(DeviceCommand::Kd(0.25).to_string(), "PR+kd=0.25");
        assert_eq!(
            DeviceCommand::PositionServo(true).to_string(),
            "PR+asservissement_position=1"
        );
        assert_eq!(
            DeviceCommand::PositionServo(false).to_string(),
            "PR+asservissement_position=0"
        );
        assert_eq!(DeviceCommand::Log(true).to_string(), "PR+log=1");
        assert_eq!(DeviceCommand::Log(false).to_string(), "PR+log=0");
        assert_eq!(DeviceCommand::Setpoint(20.0).to_string(), "PR+consigne=20");
        assert_eq!(DeviceCommand::Reset.to_string(), "PR+reset");
        assert_eq!(DeviceCommand::Ping.to_string(), "PR+ping");
    }

    #[test]
    fn parses_telemetry_with_and_without_prefix() {
        assert_eq!(parse_line("speed=12.5").unwrap(), DeviceLine::Telemetry(12.5));
        assert_eq!(
            parse_line("PR+speed=-3.25\r").unwrap(),
            DeviceLine::Telemetry(-3.25)
        );
        assert_eq!(parse_line("speed=0.00").unwrap(), DeviceLine::Telemetry(0.0));
    }

    #[test]
    fn other_lines_are_informational() {
        assert_eq!(
            parse_line("battery low").unwrap(),
            DeviceLine::Info("battery low".into())
        );
        assert_eq!(
            parse_line("PR+Kp=1.50").unwrap(),
            DeviceLine::Info("Kp=1.50".into())
        );
        assert_eq!(parse_line("PR+pong").unwrap(), DeviceLine::Info("pong".into()));
    }

    #[test]
    fn malformed_speed_is_a_parse_error() {
        let err = parse_line("speed=fast").unwrap_err();
        assert!(matches!(err, BenchError::TelemetryParse { ref payload, .. } if payload == "fast"));
        assert!(parse_line("PR+speed=").is_err());
    }
}
