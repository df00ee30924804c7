//! Per-valve level polling

use chrono::Utc;
use serde_json::json;

use super::LevelReading;
use crate::directory::{DeviceDirectory, ValveDevice};
use crate::hub::types::parse_number;
use crate::hub::{HubClient, Session};
use crate::{Error, Result};

/// Hub value key holding the valve opening as a 0..1 fraction
const LEVEL_KEY: &str = "LEVEL";

/// Fetch the current opening of every valve, in directory order
///
/// A valve the hub cannot report on, or reports nonsense for, gets an
/// absent reading and the poll moves on.
///
/// # Errors
///
/// Returns error on network, auth or session failures, which affect every
/// valve alike and abort the cycle
pub async fn poll(
    client: &HubClient,
    session: &mut Session,
    directory: &DeviceDirectory,
) -> Result<Vec<LevelReading>> {
    let mut readings = Vec::with_capacity(directory.len());

    for device in directory.devices() {
        let level_percent = match fetch_level(client, session, device).await {
            Ok(level) => level,
            Err(e @ (Error::Rpc { .. } | Error::Protocol(_))) => {
                tracing::warn!(device = %device.key(), error = %e, "valve level unavailable");
                None
            }
            Err(e) => return Err(e),
        };

        readings.push(LevelReading {
            device: device.key(),
            room_name: device.room_name.clone(),
            level_percent,
            observed_at: Utc::now(),
        });
    }

    let present = readings.iter().filter(|r| r.is_present()).count();
    tracing::debug!(devices = readings.len(), present, "poll complete");
    Ok(readings)
}

async fn fetch_level(
    client: &HubClient,
    session: &mut Session,
    device: &ValveDevice,
) -> Result<Option<f64>> {
    let params = json!({
        "interface": device.interface,
        "address": format!("{}:1", device.address),
        "valueKey": LEVEL_KEY,
    });
    let value = client.call(session, "Interface.getValue", params).await?;

    let level = parse_number(&value).map(fraction_to_percent);
    if level.is_none() {
        tracing::warn!(device = %device.key(), %value, "invalid valve level");
    }
    Ok(level)
}

/// Convert the hub's 0..1 fraction to a percentage within `[0, 100]`
#[must_use]
pub fn fraction_to_percent(fraction: f64) -> f64 {
    (fraction * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_scaling() {
        assert!((fraction_to_percent(0.42) - 42.0).abs() < 1e-9);
        assert!((fraction_to_percent(0.0)).abs() < f64::EPSILON);
        assert!((fraction_to_percent(1.0) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn fraction_out_of_range_is_clamped() {
        assert!((fraction_to_percent(1.005) - 100.0).abs() < f64::EPSILON);
        assert!((fraction_to_percent(-0.2)).abs() < f64::EPSILON);
    }
}
