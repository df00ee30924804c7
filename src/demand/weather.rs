//! Outdoor weather inputs for the feed-forward baseline

use serde_json::json;

use crate::config::WeatherOverrides;
use crate::directory::discovery::{DEFAULT_INTERFACE, is_hub_internal};
use crate::hub::types::{DeviceDetails, parse_id_list, parse_number};
use crate::hub::{HubClient, Session};
use crate::{Error, Result};

/// Outdoor conditions; absent fields count as neutral
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeatherInputs {
    /// °C
    pub outdoor_temp: Option<f64>,
    /// km/h
    pub wind_speed: Option<f64>,
    /// lux
    pub illumination: Option<f64>,
}

impl WeatherInputs {
    /// Replace measured values with configured overrides where set
    #[must_use]
    pub fn with_overrides(self, overrides: &WeatherOverrides) -> Self {
        Self {
            outdoor_temp: overrides.outdoor_temp.or(self.outdoor_temp),
            wind_speed: overrides.wind_speed.or(self.wind_speed),
            illumination: overrides.illumination.or(self.illumination),
        }
    }
}

/// A hub weather station
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeatherStation {
    pub interface: String,
    pub address: String,
}

/// Find the first hub device whose type contains `device_type`
///
/// # Errors
///
/// Returns error if the device list cannot be fetched or the session fails
pub async fn find_station(
    client: &HubClient,
    session: &mut Session,
    device_type: &str,
) -> Result<Option<WeatherStation>> {
    let listed = client.call(session, "Device.listAll", json!({})).await?;
    let ids = parse_id_list(&listed)
        .ok_or_else(|| Error::Protocol("Device.listAll did not return a list".to_string()))?;

    for id in ids.iter().filter(|id| !is_hub_internal(id)) {
        let details = match client.call(session, "Device.get", json!({ "id": id })).await {
            Ok(value) => serde_json::from_value::<DeviceDetails>(value).unwrap_or_default(),
            Err(Error::Rpc { .. } | Error::Protocol(_)) => continue,
            Err(e) => return Err(e),
        };

        let matches = details
            .device_type
            .as_deref()
            .is_some_and(|t| t.contains(device_type));
        if let (true, Some(address)) = (matches, details.address) {
            let station = WeatherStation {
                interface: details
                    .interface
                    .unwrap_or_else(|| DEFAULT_INTERFACE.to_string()),
                address,
            };
            tracing::info!(address = %station.address, "weather station found");
            return Ok(Some(station));
        }
    }

    tracing::info!(device_type, "no weather station on hub");
    Ok(None)
}

/// Read the station's current values; a failed value is left absent
pub async fn read_station(
    client: &HubClient,
    session: &mut Session,
    station: &WeatherStation,
) -> WeatherInputs {
    let outdoor_temp = read_value(client, session, station, "ACTUAL_TEMPERATURE").await;
    let wind_speed = read_value(client, session, station, "WIND_SPEED").await;
    let illumination = read_value(client, session, station, "ILLUMINATION").await;

    WeatherInputs {
        outdoor_temp,
        wind_speed,
        illumination,
    }
}

async fn read_value(
    client: &HubClient,
    session: &mut Session,
    station: &WeatherStation,
    key: &str,
) -> Option<f64> {
    let params = json!({
        "interface": station.interface,
        "address": format!("{}:1", station.address),
        "valueKey": key,
    });
    match client.call(session, "Interface.getValue", params).await {
        Ok(value) => parse_number(&value),
        Err(e) => {
            tracing::debug!(key, error = %e, "weather value unavailable");
            None
        }
    }
}
