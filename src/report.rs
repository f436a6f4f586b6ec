//! Step-response summary of captured series.
//!
//! Velocity tests are judged against their setpoint: overshoot, 10–90 % rise time,
//! settling time into a ±5 % band and the mean of the final tenth of the series. Position
//! tests report speed telemetry, so only the peak speed and the time to rest apply.

use crate::session::{ControlMode, Sample, TestSession};
use std::fmt::Write as _;

/// Half-width of the settling band, as a fraction of the setpoint.
const SETTLING_BAND: f64 = 0.05;

/// Figures derived from one captured series.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StepResponse {
    /// Number of samples
    pub samples: usize,
    /// Timestamp of the last sample
    pub duration_ms: u64,
    /// Largest value
    pub peak: f64,
    /// Mean of the last tenth of the series
    pub final_value: f64,
    /// `setpoint - final_value`
    pub steady_state_error: f64,
    /// Peak above setpoint, in percent of the setpoint
    pub overshoot_pct: Option<f64>,
    /// Time from 10 % to 90 % of the setpoint
    pub rise_time_ms: Option<u64>,
    /// Time after which the series stays within the settling band
    pub settling_time_ms: Option<u64>,
}

impl StepResponse {
    /// Analyse a series. Returns `None` for an empty series.
    pub fn analyse(mode: ControlMode, samples: &[Sample], setpoint: f64) -> Option<Self> {
        let last = samples.last()?;
        let peak = samples
            .iter()
            .map(|s| s.value)
            .fold(f64::NEG_INFINITY, f64::max);
        let tail = &samples[samples.len() - (samples.len() / 10).max(1)..];
        let final_value = tail.iter().map(|s| s.value).sum::<f64>() / tail.len() as f64;

        let mut response = Self {
            samples: samples.len(),
            duration_ms: last.t_ms,
            peak,
            final_value,
            steady_state_error: setpoint - final_value,
            ..Self::default()
        };

        if mode == ControlMode::Velocity && setpoint != 0.0 {
            response.overshoot_pct = Some(((peak - setpoint) / setpoint.abs() * 100.0).max(0.0));
            response.rise_time_ms = rise_time(samples, setpoint);
            response.settling_time_ms = settling_time(samples, setpoint);
        }
        Some(response)
    }
}

fn first_crossing(samples: &[Sample], level: f64, setpoint: f64) -> Option<u64> {
    samples
        .iter()
        .find(|s| s.value * setpoint.signum() >= level * setpoint.signum())
        .map(|s| s.t_ms)
}

fn rise_time(samples: &[Sample], setpoint: f64) -> Option<u64> {
    let low = first_crossing(samples, 0.1 * setpoint, setpoint)?;
    let high = first_crossing(samples, 0.9 * setpoint, setpoint)?;
    high.checked_sub(low)
}

fn settling_time(samples: &[Sample], setpoint: f64) -> Option<u64> {
    let band = SETTLING_BAND * setpoint.abs();
    let outside = samples
        .iter()
        .rposition(|s| (s.value - setpoint).abs() > band);
    match outside {
        None => samples.first().map(|s| s.t_ms),
        Some(i) => samples.get(i + 1).map(|s| s.t_ms),
    }
}

fn opt_ms(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v} ms"))
}

/// Render a table comparing `sessions`, numbered by their history index.
pub fn render<'a>(sessions: impl IntoIterator<Item = (usize, &'a TestSession)>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>3}  {:<8} {:>8} {:>8} {:>8} {:>9} {:>7} {:>8} {:>8} {:>10} {:>10}",
        "idx", "mode", "kp", "ki", "kd", "consigne", "n", "peak", "final", "overshoot", "settle"
    );

    for (index, session) in sessions {
        let gains = session.gains();
        let _ = write!(
            out,
            "{:>3}  {:<8} {:>8} {:>8} {:>8} {:>9}",
            index,
            session.mode().to_string(),
            gains.kp,
            gains.ki,
            gains.kd,
            session.setpoint()
        );
        match StepResponse::analyse(session.mode(), &session.samples(), session.setpoint()) {
            Some(r) => {
                let overshoot = r
                    .overshoot_pct
                    .map_or_else(|| "-".to_string(), |o| format!("{o:.1} %"));
                let settle = match session.mode() {
                    ControlMode::Velocity => opt_ms(r.settling_time_ms),
                    ControlMode::Position => opt_ms(Some(r.duration_ms)),
                };
                let _ = writeln!(
                    out,
                    " {:>7} {:>8.2} {:>8.2} {:>10} {:>10}",
                    r.samples, r.peak, r.final_value, overshoot, settle
                );
            }
            None => {
                let _ = writeln!(out, " {:>7} {:>8} {:>8} {:>10} {:>10}", 0, "-", "-", "-", "-");
            }
        }
    }
    out
}

/// When the session ran, e.g. `started 14:02:11, took 0.52 s`.
pub fn timing(session: &TestSession) -> String {
    let Some(started) = session.started_at() else {
        return "not started".to_string();
    };
    let mut out = format!("started {}", started.format("%H:%M:%S"));
    if let Some(elapsed) = session.elapsed() {
        let _ = write!(out, ", took {:.2} s", elapsed.as_secs_f64());
    }
    out
}

/// Render the figures of one session in detail.
pub fn render_detail(session: &TestSession) -> String {
    let mut out = format!("{session}\n  {}\n", timing(session));
    let Some(r) = StepResponse::analyse(session.mode(), &session.samples(), session.setpoint())
    else {
        out.push_str("  no samples captured\n");
        return out;
    };

    let _ = writeln!(out, "  duration          {} ms", r.duration_ms);
    let _ = writeln!(out, "  peak              {:.2}", r.peak);
    let _ = writeln!(out, "  final value       {:.2}", r.final_value);
    let _ = writeln!(out, "  steady-state err  {:.2}", r.steady_state_error);
    if let Some(o) = r.overshoot_pct {
        let _ = writeln!(out, "  overshoot         {o:.1} %");
    }
    let _ = writeln!(out, "  rise time         {}", opt_ms(r.rise_time_ms));
    let _ = writeln!(out, "  settling time     {}", opt_ms(r.settling_time_ms));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionSettings;
    use crate::link::MockLink;
    use crate::session::Gains;
    use std::sync::Arc;

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
    fn empty_series_has_no_response() {
        assert!(StepResponse::analyse(ControlMode::Velocity, &[], 20.0).is_none());
    }

    #[test]
    fn velocity_step_figures() {
        let values = [0.0, 4.0, 12.0, 19.0, 23.0, 21.0, 20.5, 20.0, 20.0, 20.0];
        let r = StepResponse::analyse(ControlMode::Velocity, &series(&values), 20.0).unwrap();

        assert_eq!(r.samples, 10);
        assert_eq!(r.duration_ms, 90);
        assert_eq!(r.peak, 23.0);
        assert!((r.overshoot_pct.unwrap() - 15.0).abs() < 1e-9);
        // 10 % (2.0) first reached at 10 ms, 90 % (18.0) at 30 ms.
        assert_eq!(r.rise_time_ms, Some(20));
        // Last sample outside 19..=21 is 23.0 at 40 ms.
        assert_eq!(r.settling_time_ms, Some(50));
        assert_eq!(r.final_value, 20.0);
        assert_eq!(r.steady_state_error, 0.0);
    }

    #[test]
    fn undershooting_series_has_no_overshoot() {
        let values = [0.0, 5.0, 10.0, 15.0, 17.0];
        let r = StepResponse::analyse(ControlMode::Velocity, &series(&values), 20.0).unwrap();
        assert_eq!(r.overshoot_pct, Some(0.0));
        assert_eq!(r.rise_time_ms, None);
        assert_eq!(r.settling_time_ms, None);
    }

    #[test]
    fn negative_setpoint_uses_magnitude() {
        let values = [0.0, -5.0, -15.0, -19.0, -20.0];
        let r = StepResponse::analyse(ControlMode::Velocity, &series(&values), -20.0).unwrap();
        assert_eq!(r.rise_time_ms, Some(20));
        assert_eq!(r.settling_time_ms, Some(30));
    }

    #[test]
    fn position_reports_only_peak_and_duration() {
        let values = [0.0, 8.0, 3.0, 0.0, 0.0];
        let r = StepResponse::analyse(ControlMode::Position, &series(&values), 5.0).unwrap();
        assert_eq!(r.peak, 8.0);
        assert_eq!(r.duration_ms, 40);
        assert!(r.overshoot_pct.is_none());
        assert!(r.settling_time_ms.is_none());
    }

    #[test]
    fn unstarted_session_detail() {
        let session = TestSession::new(
            3,
            ControlMode::Velocity,
            Gains::new(1.0, 0.0, 0.0),
            20.0,
            SessionSettings::default(),
            Arc::new(MockLink::new()),
        );
        assert_eq!(timing(&session), "not started");
        let detail = render_detail(&session);
        assert!(detail.starts_with("#3 velocity"));
        assert!(detail.contains("  not started\n  no samples captured"));
    }
}
