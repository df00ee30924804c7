//! Valve discovery against the hub

use serde_json::json;

use super::{DeviceDirectory, ValveDevice};
use crate::hub::types::{DeviceDetails, RoomDetails, parse_id_list};
use crate::hub::{HubClient, Session};
use crate::{Error, Result};

/// Interface assumed when the hub omits it
pub const DEFAULT_INTERFACE: &str = "HmIP-RF";

/// Numeric device ids below this belong to the hub itself
const FIRST_USER_DEVICE_ID: u64 = 100;

/// Enumerate hub devices whose type contains `device_type`
///
/// Rooms are resolved through the device's first channel (device id + 1).
/// A failed single room lookup leaves `room_name` empty; a device whose
/// details cannot be decoded is skipped.
///
/// # Errors
///
/// Returns error if the device or room list cannot be fetched or the session
/// fails (network, auth or expiry) while fetching details
pub async fn discover(
    client: &HubClient,
    session: &mut Session,
    device_type: &str,
) -> Result<DeviceDirectory> {
    let listed = client.call(session, "Device.listAll", json!({})).await?;
    let device_ids = parse_id_list(&listed)
        .ok_or_else(|| Error::Protocol("Device.listAll did not return a list".to_string()))?;

    let rooms = fetch_rooms(client, session).await?;

    let mut devices = Vec::new();
    for id in &device_ids {
        if is_hub_internal(id) {
            continue;
        }
        let numeric_id = id.trim().parse::<u64>().ok();

        let Some(details) = fetch_device(client, session, id).await? else {
            continue;
        };

        let Some(address) = details.address.filter(|a| !a.is_empty()) else {
            continue;
        };
        if !details
            .device_type
            .as_deref()
            .is_some_and(|t| t.contains(device_type))
        {
            continue;
        }

        let room_name = numeric_id.and_then(|n| room_of_channel(&rooms, n + 1));
        if room_name.is_none() {
            tracing::debug!(id, %address, "no room found for valve");
        }

        devices.push(ValveDevice {
            interface: details
                .interface
                .filter(|i| !i.is_empty())
                .unwrap_or_else(|| DEFAULT_INTERFACE.to_string()),
            address,
            room_name,
        });
    }

    let directory = DeviceDirectory::new(device_type, devices);
    tracing::info!(
        device_type,
        scanned = device_ids.len(),
        found = directory.len(),
        "discovery complete"
    );
    Ok(directory)
}

/// Fetch one device's details; undecodable or refused lookups are skipped
async fn fetch_device(
    client: &HubClient,
    session: &mut Session,
    id: &str,
) -> Result<Option<DeviceDetails>> {
    match client.call(session, "Device.get", json!({ "id": id })).await {
        Ok(value) => match serde_json::from_value::<DeviceDetails>(value) {
            Ok(details) => Ok(Some(details)),
            Err(e) => {
                tracing::debug!(id, error = %e, "skipping device with unexpected details");
                Ok(None)
            }
        },
        Err(e @ (Error::Rpc { .. } | Error::Protocol(_))) => {
            tracing::debug!(id, error = %e, "skipping device the hub would not describe");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Fetch all rooms
///
/// The room list itself must be available, otherwise every valve would be
/// persisted without a room. Individual room lookups that fail only
/// contribute nothing.
async fn fetch_rooms(client: &HubClient, session: &mut Session) -> Result<Vec<RoomDetails>> {
    let listed = client.call(session, "Room.listAll", json!({})).await?;
    let ids = parse_id_list(&listed)
        .ok_or_else(|| Error::Protocol("Room.listAll did not return a list".to_string()))?;

    let mut rooms = Vec::with_capacity(ids.len());
    for id in &ids {
        match client.call(session, "Room.get", json!({ "id": id })).await {
            Ok(value) => match serde_json::from_value::<RoomDetails>(value) {
                Ok(room) => rooms.push(room),
                Err(e) => tracing::debug!(id, error = %e, "skipping unreadable room"),
            },
            Err(e @ (Error::Rpc { .. } | Error::Protocol(_))) => {
                tracing::debug!(id, error = %e, "room lookup failed");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(rooms)
}

/// Whether `id` names one of the hub's own devices rather than a user device
pub(crate) fn is_hub_internal(id: &str) -> bool {
    id.trim()
        .parse::<u64>()
        .is_ok_and(|n| n < FIRST_USER_DEVICE_ID)
}

fn room_of_channel(rooms: &[RoomDetails], channel_id: u64) -> Option<String> {
    rooms
        .iter()
        .find(|r| r.contains_channel(channel_id))
        .and_then(|r| r.name.clone())
        .filter(|n| !n.is_empty())
}
