//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading for the bench tool.
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults (115200 baud, 10 ms sample interval, 2000 ms velocity horizon)
//! 2. `config/pid_bench.toml` (or the file passed with `--config`)
//! 3. Environment variables prefixed with `PID_BENCH_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use pid_bench::config::BenchConfig;
//!
//! let config = BenchConfig::load()?;
//! println!("Serial port: {}", config.link.port);
//! # Ok::<(), pid_bench::error::BenchError>(())
//! ```

use crate::error::{BenchError, BenchResult};
use crate::session::{ControlMode, Gains};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/pid_bench.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial link to the controller board
    pub link: LinkSettings,
    /// Sampling and termination settings shared by every test
    pub session: SessionSettings,
    /// Values pre-filled at the `test` prompt
    pub defaults: TestDefaults,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "PID bench".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Serial link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Serial port path (e.g., "/dev/ttyACM0", "COM9")
    pub port: String,
    /// Communication speed
    pub baud_rate: u32,
    /// Appended to every command line
    pub line_terminator: String,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            line_terminator: "\n".to_string(),
        }
    }
}

/// Sampling and termination settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Firmware sample period; sample `n` is stamped `n * sample_interval_ms`
    pub sample_interval_ms: u64,
    /// Length of a velocity test
    pub plot_horizon_ms: u64,
    /// Hard cap on the length of a position test
    pub position_max_samples: usize,
    /// Number of zero-speed samples that mark a position test as settled
    pub settle_window: usize,
    /// How long `test` waits for the device before aborting (0 disables)
    #[serde(with = "humantime_serde")]
    pub completion_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            sample_interval_ms: 10,
            plot_horizon_ms: 2000,
            position_max_samples: 10_000,
            settle_window: 9,
            completion_timeout: Duration::from_secs(60),
        }
    }
}

impl SessionSettings {
    /// Number of samples after which a velocity test is complete.
    pub fn velocity_cutoff(&self) -> usize {
        (self.plot_horizon_ms / self.sample_interval_ms.max(1)) as usize
    }

    /// Completion timeout, `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (!self.completion_timeout.is_zero()).then_some(self.completion_timeout)
    }
}

/// Initial values offered by the console.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestDefaults {
    /// Proportional gain
    pub kp: f64,
    /// Integral gain
    pub ki: f64,
    /// Derivative gain
    pub kd: f64,
    /// Target value
    pub setpoint: f64,
    /// Control mode
    pub mode: ControlMode,
}

impl Default for TestDefaults {
    fn default() -> Self {
        Self {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            setpoint: 20.0,
            mode: ControlMode::Velocity,
        }
    }
}

impl TestDefaults {
    /// Gains part of the defaults.
    pub fn gains(&self) -> Gains {
        Gains::new(self.kp, self.ki, self.kd)
    }
}

impl BenchConfig {
    /// Load configuration from `config/pid_bench.toml` and environment variables
    ///
    /// Environment variables can override configuration with prefix PID_BENCH_
    /// Example: PID_BENCH_LINK__PORT=/dev/ttyUSB1
    pub fn load() -> BenchResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> BenchResult<Self> {
        let config = Self::figment(path.as_ref()).extract()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(BenchConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("PID_BENCH_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> BenchResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(BenchError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.link.port.trim().is_empty() {
            return Err(BenchError::Configuration(
                "Serial port name cannot be empty".to_string(),
            ));
        }
        if self.link.baud_rate == 0 {
            return Err(BenchError::Configuration(
                "Baud rate must be greater than 0".to_string(),
            ));
        }

        let session = &self.session;
        if session.sample_interval_ms == 0 {
            return Err(BenchError::Configuration(
                "sample_interval_ms must be greater than 0".to_string(),
            ));
        }
        if session.plot_horizon_ms < session.sample_interval_ms {
            return Err(BenchError::Configuration(format!(
                "plot_horizon_ms ({}) must cover at least one sample interval ({} ms)",
                session.plot_horizon_ms, session.sample_interval_ms
            )));
        }
        if session.settle_window == 0 {
            return Err(BenchError::Configuration(
                "settle_window must be at least 1".to_string(),
            ));
        }
        if session.position_max_samples <= session.settle_window {
            return Err(BenchError::Configuration(format!(
                "position_max_samples ({}) must exceed settle_window ({})",
                session.position_max_samples, session.settle_window
            )));
        }

        if ![self.defaults.kp, self.defaults.ki, self.defaults.kd, self.defaults.setpoint]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(BenchError::Configuration(
                "Default gains and setpoint must be finite numbers".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BenchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.link.baud_rate, 115_200);
        assert_eq!(config.session.velocity_cutoff(), 200);
        assert_eq!(config.defaults.setpoint, 20.0);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = BenchConfig::default();
        config.application.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = BenchConfig::default();
        config.session.sample_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settle_window_must_fit_in_cap() {
        let mut config = BenchConfig::default();
        config.session.position_max_samples = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_disables_it() {
        let settings = SessionSettings {
            completion_timeout: Duration::ZERO,
            ..SessionSettings::default()
        };
        assert_eq!(settings.timeout(), None);
        assert_eq!(
            SessionSettings::default().timeout(),
            Some(Duration::from_secs(60))
        );
    }
}
