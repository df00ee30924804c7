//! Demand aggregation

use chrono::{DateTime, Utc};

use super::LevelReading;

/// Summary of one poll cycle's present readings
///
/// With no present readings the snapshot is invalid and its percentages are
/// NaN: a silent valve fleet is not the same as zero demand.
#[derive(Debug, Clone, PartialEq)]
pub struct DemandSnapshot {
    /// Number of present readings
    pub count: usize,
    /// Number of valves polled, present or not
    pub polled: usize,
    pub average_percent: f64,
    pub max_percent: f64,
    /// Room of the first reading at `max_percent`
    pub max_room: Option<String>,
    pub computed_at: DateTime<Utc>,
}

impl DemandSnapshot {
    /// Snapshot carrying no demand information
    #[must_use]
    pub const fn invalid(polled: usize, computed_at: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            polled,
            average_percent: f64::NAN,
            max_percent: f64::NAN,
            max_room: None,
            computed_at,
        }
    }

    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.count > 0
    }
}

/// Reduce readings to count, mean and maximum of the present levels
///
/// Ties for the maximum go to the earliest reading.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn aggregate(readings: &[LevelReading], computed_at: DateTime<Utc>) -> DemandSnapshot {
    let mut count = 0usize;
    let mut sum = 0.0;
    let mut top: Option<(f64, &LevelReading)> = None;

    for reading in readings {
        let Some(level) = reading.level_percent else {
            continue;
        };
        count += 1;
        sum += level;
        if top.is_none_or(|(best, _)| level > best) {
            top = Some((level, reading));
        }
    }

    let Some((max_percent, max_reading)) = top else {
        return DemandSnapshot::invalid(readings.len(), computed_at);
    };

    DemandSnapshot {
        count,
        polled: readings.len(),
        average_percent: sum / count as f64,
        max_percent,
        max_room: max_reading.room_name.clone(),
        computed_at,
    }
}
