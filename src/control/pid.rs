//! Feedback controller turning valve demand into a boiler setpoint
//!
//! ```text
//!   scaled  = scale(max_percent, valve_min, valve_max)
//!   error   = demand_target - scaled
//!   output  = baseline(weather) + kp*error + ki*integral + kd*d(error)/dt
//! ```
//!
//! `step` is a pure function of its inputs: the caller passes elapsed time
//! and the returned state replaces the old one.

use chrono::{DateTime, Utc};

use super::feedforward;
use crate::config::{Config, ControlConfig};
use crate::demand::{DemandSnapshot, WeatherInputs};

/// Gains below this magnitude count as disabled
const GAIN_EPSILON: f64 = 1e-12;

/// Controller memory carried from one cycle to the next
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub integral_accum: f64,
    pub previous_error: Option<f64>,
    /// Last emitted setpoint (°C)
    pub output: f64,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl ControllerState {
    /// Fresh state emitting the configured fallback setpoint
    #[must_use]
    pub fn new(control: &ControlConfig) -> Self {
        Self {
            kp: control.kp,
            ki: control.ki,
            kd: control.kd,
            integral_accum: 0.0,
            previous_error: None,
            output: clamp_to_band(
                control.fallback_setpoint,
                control.setpoint_min,
                control.setpoint_max,
            ),
            last_run_at: None,
        }
    }

    /// Forget integral and derivative history, keep the current output
    #[must_use]
    pub fn reset(&self) -> Self {
        Self {
            integral_accum: 0.0,
            previous_error: None,
            last_run_at: None,
            ..self.clone()
        }
    }
}

/// Clamp `value` into the band spanned by `a` and `b`, whichever is lower
///
/// A NaN value maps to the lower bound.
#[must_use]
pub fn clamp_to_band(value: f64, a: f64, b: f64) -> f64 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    if value.is_nan() {
        return lo;
    }
    value.clamp(lo, hi)
}

/// Map a valve opening onto `[0, 100]` relative to the configured valve range
#[must_use]
pub fn scale_valve(percent: f64, valve_min: f64, valve_max: f64) -> f64 {
    if valve_max <= valve_min {
        return percent.clamp(0.0, 100.0);
    }
    if percent <= valve_min {
        0.0
    } else if percent >= valve_max {
        100.0
    } else {
        (percent - valve_min) / (valve_max - valve_min) * 100.0
    }
}

/// Advance the controller by one cycle
///
/// On an invalid snapshot the state is returned untouched and the previous
/// output is held, clamped to the current safe band. Gains are taken from
/// `config` at entry, so edits apply from the next call on.
#[must_use]
pub fn step(
    state: &ControllerState,
    snapshot: &DemandSnapshot,
    weather: &WeatherInputs,
    config: &Config,
    elapsed_seconds: f64,
) -> (ControllerState, f64) {
    let c = &config.control;

    if !snapshot.is_valid() || !snapshot.max_percent.is_finite() {
        let held = clamp_to_band(state.output, c.setpoint_min, c.setpoint_max);
        return (state.clone(), held);
    }

    let dt = if elapsed_seconds.is_finite() && elapsed_seconds > 0.0 {
        elapsed_seconds
    } else {
        0.0
    };

    let scaled = scale_valve(snapshot.max_percent, c.valve_min, c.valve_max);
    let error = c.demand_target - scaled;

    let integral_accum = if c.ki.abs() < GAIN_EPSILON {
        0.0
    } else {
        let limit = c.integral_range / c.ki.abs();
        clamp_to_band(error.mul_add(dt, state.integral_accum), -limit, limit)
    };

    let derivative = match state.previous_error {
        Some(previous) if dt > 0.0 => (error - previous) / dt,
        _ => 0.0,
    };

    let base = feedforward::baseline(&config.feedforward, weather);
    let raw = base + c.kp * error + c.ki * integral_accum + c.kd * derivative;

    let output = if raw.is_finite() {
        clamp_to_band(raw, c.setpoint_min, c.setpoint_max)
    } else {
        tracing::warn!(raw, "controller produced a non-finite output, holding");
        clamp_to_band(state.output, c.setpoint_min, c.setpoint_max)
    };

    tracing::debug!(
        scaled,
        error,
        base,
        p = c.kp * error,
        i = c.ki * integral_accum,
        d = c.kd * derivative,
        output,
        "controller step"
    );

    let next = ControllerState {
        kp: c.kp,
        ki: c.ki,
        kd: c.kd,
        integral_accum,
        previous_error: Some(error),
        output,
        last_run_at: Some(snapshot.computed_at),
    };
    (next, output)
}
