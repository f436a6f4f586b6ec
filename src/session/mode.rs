use crate::config::SessionSettings;
use crate::error::BenchError;
use crate::protocol::DeviceCommand;
use crate::session::{Gains, Sample};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which physical quantity the controller servos to.
///
/// The mode supplies everything that differs between test variants: the configuration
/// sequence sent at start and the predicate that ends the test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    /// Run for a fixed horizon and record the speed step response.
    #[serde(alias = "v")]
    Velocity,
    /// Move to a target distance and stop once the motor is at rest.
    #[serde(alias = "p")]
    Position,
}

impl ControlMode {
    /// Commands that arm the controller, in the order the firmware needs them.
    ///
    /// Gains go first so that the loop already uses them when the mode and setpoint
    /// commands make it act.
    pub fn configuration_sequence(&self, gains: Gains, setpoint: f64) -> [DeviceCommand; 6] {
        [
            DeviceCommand::Kp(gains.kp),
            DeviceCommand::Ki(gains.ki),
            DeviceCommand::Kd(gains.kd),
            DeviceCommand::PositionServo(matches!(self, ControlMode::Position)),
            DeviceCommand::Log(true),
            DeviceCommand::Setpoint(setpoint),
        ]
    }

    /// Whether one more sample may be appended to a series of `len` samples.
    pub fn accepts_sample(&self, len: usize, settings: &SessionSettings) -> bool {
        match self {
            ControlMode::Velocity => len <= settings.velocity_cutoff(),
            ControlMode::Position => true,
        }
    }

    /// Termination predicate, evaluated after every appended sample.
    pub fn is_terminal(&self, samples: &[Sample], settings: &SessionSettings) -> bool {
        match self {
            ControlMode::Velocity => samples.len() > settings.velocity_cutoff(),
            ControlMode::Position => {
                samples.len() > settings.position_max_samples
                    || at_rest(samples, settings.settle_window)
            }
        }
    }
}

/// The `window` samples preceding the latest one sum to exactly zero.
///
/// Exact float equality is intended: the firmware derives speed from integer encoder
/// ticks, so a motor at rest reports `0.00` and anything else is non-zero.
fn at_rest(samples: &[Sample], window: usize) -> bool {
    let len = samples.len();
    if len < window + 1 {
        return false;
    }
    let sum: f64 = samples[len - 1 - window..len - 1]
        .iter()
        .map(|s| s.value)
        .sum();
    sum == 0.0
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMode::Velocity => write!(f, "velocity"),
            ControlMode::Position => write!(f, "position"),
        }
    }
}

impl FromStr for ControlMode {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "v" | "velocity" | "vitesse" => Ok(ControlMode::Velocity),
            "p" | "position" => Ok(ControlMode::Position),
            other => Err(BenchError::InvalidInput(format!(
                "unknown control mode '{other}' (expected v or p)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, &value)| Sample {
                t_ms: i as u64 * 10,
                value,
            })
            .collect()
    }

    #[test]
    fn sequence_orders_gains_before_setpoint() {
        let seq = ControlMode::Position.configuration_sequence(Gains::new(1.0, 2.0, 3.0), 5.0);
        let rendered: Vec<String> = seq.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            [
                "PR+kp=1",
                "PR+ki=2",
                "PR+kd=3",
                "PR+asservissement_position=1",
                "PR+log=1",
                "PR+consigne=5",
            ]
        );
        let seq = ControlMode::Velocity.configuration_sequence(Gains::new(1.0, 2.0, 3.0), 5.0);
        assert_eq!(seq[3], DeviceCommand::PositionServo(false));
    }

    #[test]
    fn velocity_terminates_past_horizon() {
        let settings = SessionSettings::default();
        let mode = ControlMode::Velocity;
        assert!(!mode.is_terminal(&series(&[1.0; 200]), &settings));
        assert!(mode.is_terminal(&series(&[1.0; 201]), &settings));
        assert!(mode.accepts_sample(200, &settings));
        assert!(!mode.accepts_sample(201, &settings));
    }

    #[test]
    fn position_settles_on_zero_window() {
        let settings = SessionSettings::default();
        let mode = ControlMode::Position;

        let mut values = vec![0.0; 9];
        assert!(!mode.is_terminal(&series(&values), &settings));
        values.push(4.0);
        assert!(mode.is_terminal(&series(&values), &settings));

        // Cancelling values still sum to zero.
        let values = [3.0, -3.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        assert!(mode.is_terminal(&series(&values), &settings));

        let values = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.01, 0.0];
        assert!(!mode.is_terminal(&series(&values), &settings));
    }

    #[test]
    fn position_caps_sample_count() {
        let settings = SessionSettings {
            position_max_samples: 20,
            ..SessionSettings::default()
        };
        let mode = ControlMode::Position;
        assert!(!mode.is_terminal(&series(&[1.0; 20]), &settings));
        assert!(mode.is_terminal(&series(&[1.0; 21]), &settings));
        assert!(mode.accepts_sample(10_000, &settings));
    }

    #[test]
    fn parses_mode_names() {
        assert_eq!("v".parse::<ControlMode>().unwrap(), ControlMode::Velocity);
        assert_eq!(" P ".parse::<ControlMode>().unwrap(), ControlMode::Position);
        assert_eq!("vitesse".parse::<ControlMode>().unwrap(), ControlMode::Velocity);
        assert!("x".parse::<ControlMode>().is_err());
    }
}
