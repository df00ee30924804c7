//! Heat demand acquisition
//!
//! Valve openings are polled per device, reduced to one [`DemandSnapshot`]
//! and complemented by optional outdoor weather inputs.

pub mod aggregate;
pub mod poller;
pub mod weather;

use chrono::{DateTime, Utc};

use crate::directory::DeviceKey;

pub use aggregate::{DemandSnapshot, aggregate};
pub use poller::poll;
pub use weather::{WeatherInputs, WeatherStation};

/// One valve's opening as seen in one poll cycle
#[derive(Debug, Clone, PartialEq)]
pub struct LevelReading {
    pub device: DeviceKey,
    pub room_name: Option<String>,
    /// Opening in percent, `None` when the fetch failed
    pub level_percent: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

impl LevelReading {
    #[must_use]
    pub const fn is_present(&self) -> bool {
        self.level_percent.is_some()
    }
}
