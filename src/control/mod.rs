//! Boiler setpoint control

pub mod feedforward;
pub mod pid;

pub use feedforward::baseline;
pub use pid::{ControllerState, clamp_to_band, scale_valve, step};
